pub mod attribute;
pub mod framebuffer;
pub mod hdma;
pub mod lcd;
pub mod palette;
pub mod tile;

#[cfg(test)]
mod tests;

use log::trace;

use crate::bus::{
    Bus, HardwareMode, Interrupt, Screen, LCD_CONTROL_REGISTER, LCD_STATUS_REGISTER, LYC_REGISTER,
    LY_REGISTER, SCX_REGISTER, SCY_REGISTER, VRAM_BANK_SIZE, WX_REGISTER, WY_REGISTER,
};
use crate::ppu::attribute::Attribute;
use crate::ppu::framebuffer::{
    PRIORITY_BG_COLOR_0, PRIORITY_BG_OPAQUE, PRIORITY_SPRITE, PRIORITY_SPRITE_BEHIND_BG,
    PRIORITY_WINDOW,
};
use crate::ppu::lcd::{LcdControl, LcdStatus, Mode};
use crate::ppu::palette::{Palette, PaletteStore};

pub use crate::ppu::framebuffer::{Framebuffer, SCREEN_HEIGHT, SCREEN_WIDTH};

// The LCD controller operates on a 4.194 MHz dot clock. An entire frame is
// 154 scanlines of 456 dots each, 70224 dots total; scanlines 144 through 153
// are the V-Blank period.
pub const SCANLINE_DURATION: u32 = 456;
pub const FRAME_DURATION: u32 = SCANLINE_DURATION * TOTAL_LINES as u32;

const TOTAL_LINES: u8 = 154;
const VBLANK_START_LINE: u8 = SCREEN_HEIGHT as u8;

/// Which compositor pass a pixel comes from; decides the arbitration tag it
/// is written with.
#[derive(Copy, Clone)]
enum Layer {
    Background,
    Window,
    Sprite { behind_background: bool },
}

impl Layer {
    fn priority(&self, color_index: u8) -> u8 {
        match self {
            // The background tags its own transparent color lower than its
            // opaque ones so that behind-background sprites can slot between.
            Layer::Background if color_index == 0 => PRIORITY_BG_COLOR_0,
            Layer::Background => PRIORITY_BG_OPAQUE,
            Layer::Window => PRIORITY_WINDOW,
            Layer::Sprite { behind_background: true } => PRIORITY_SPRITE_BEHIND_BG,
            Layer::Sprite { behind_background: false } => PRIORITY_SPRITE,
        }
    }
}

/// The pixel processing unit: a scanline compositor driven in lockstep with
/// the CPU through [`Ppu::tick`].
///
/// The PPU owns its palettes and framebuffer; VRAM, OAM and the LCD registers
/// stay with the host and are borrowed through a [`Bus`] for the duration of
/// each call.
pub struct Ppu {
    mode: HardwareMode,
    palettes: PaletteStore,
    framebuffer: Framebuffer,
    screen: Option<Box<dyn Screen>>,
    sprites_drawn: [u8; SCREEN_HEIGHT],
    lcd_cycles: u32,
    vblank_count: u64,
}

impl Ppu {
    pub fn new(mode: HardwareMode, header_checksum: u8) -> Ppu {
        Ppu {
            mode,
            palettes: PaletteStore::new(mode, header_checksum),
            framebuffer: Framebuffer::new(),
            screen: None,
            sprites_drawn: [0x00; SCREEN_HEIGHT],
            lcd_cycles: 0,
            vblank_count: 0,
        }
    }

    /// Attach the surface finished frames are pushed to. Without one the PPU
    /// still composes every line, it just skips presentation.
    pub fn attach_screen(&mut self, screen: Box<dyn Screen>) {
        self.screen = Some(screen);
    }

    pub fn palettes(&self) -> &PaletteStore {
        &self.palettes
    }

    pub fn palettes_mut(&mut self) -> &mut PaletteStore {
        &mut self.palettes
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// Frames completed since power-on (V-Blanks raised).
    pub fn vblank_count(&self) -> u64 {
        self.vblank_count
    }

    /// Sprites composed onto `line` during the current frame, 10 at most.
    pub fn sprites_drawn(&self, line: u8) -> u8 {
        self.sprites_drawn
            .get(usize::from(line))
            .copied()
            .unwrap_or(0)
    }

    /// Advance the PPU by `cycles` CPU cycles.
    ///
    /// Every 456 accumulated cycles finish one scanline: the line the LY
    /// register currently names is composed, LY advances, the STAT mode and
    /// coincidence bits are refreshed, H-Blank DMA is ticked outside of
    /// V-Blank, and the LCD interrupts are requested where enabled. Finishing
    /// line 143 presents the frame and requests V-Blank.
    pub fn tick<B: Bus>(&mut self, bus: &mut B, cycles: u32) {
        self.lcd_cycles += cycles;
        while self.lcd_cycles >= SCANLINE_DURATION {
            self.lcd_cycles -= SCANLINE_DURATION;

            let line = bus.get_byte(LY_REGISTER);
            let lcdc = LcdControl::from_bits_truncate(bus.get_byte(LCD_CONTROL_REGISTER));
            let lcd_enabled = lcdc.contains(LcdControl::LCD_DISPLAY);

            if lcd_enabled {
                self.draw(bus, line);
            }

            let next_line = (line + 1) % TOTAL_LINES;
            bus.set_byte(LY_REGISTER, next_line);

            // "In V-Blank" refers to the line just finished, not the one LY
            // now names.
            let in_vblank = line >= VBLANK_START_LINE;

            if !in_vblank {
                trace!("hdma tick at line {}", line);
                bus.tick_hdma();
            }

            if lcd_enabled {
                let mut status = LcdStatus::from_bits_truncate(bus.get_byte(LCD_STATUS_REGISTER));
                status.set_mode_flag(if in_vblank { Mode::VBlank } else { Mode::HBlank });
                if !in_vblank {
                    if status.contains(LcdStatus::COINCIDENCE_INTERRUPT) {
                        if bus.get_byte(LYC_REGISTER) == next_line {
                            status.insert(LcdStatus::COINCIDENCE_FLAG);
                            bus.request_interrupt(Interrupt::LcdStat);
                        } else {
                            status.remove(LcdStatus::COINCIDENCE_FLAG);
                        }
                    }
                    if status.contains(LcdStatus::MODE_0_H_INTERRUPT) {
                        bus.request_interrupt(Interrupt::LcdStat);
                    }
                }
                bus.set_byte(LCD_STATUS_REGISTER, status.bits());

                if line == VBLANK_START_LINE - 1 {
                    self.present();
                    self.vblank_count += 1;
                    bus.request_interrupt(Interrupt::VBlank);
                    if status.contains(LcdStatus::MODE_1_V_INTERRUPT) {
                        bus.request_interrupt(Interrupt::LcdStat);
                    }
                }
            } else if line == VBLANK_START_LINE - 1 {
                // The surface still gets a (stale) frame while the LCD is
                // off; only interrupts and STAT stay quiet.
                self.present();
            }
        }
    }

    fn present(&mut self) {
        if let Some(screen) = self.screen.as_mut() {
            trace!("presenting frame {}", self.vblank_count);
            screen.present(&self.framebuffer);
        }
    }

    /// Compose one visible scanline: background, then sprites, then window,
    /// each layer arbitrated against the framebuffer's stored tags. Calling
    /// with `line` inside V-Blank is a no-op.
    pub fn draw<B: Bus>(&mut self, bus: &B, line: u8) {
        if line >= VBLANK_START_LINE {
            return;
        }
        if line == 0 {
            self.framebuffer.clear();
        }
        self.sprites_drawn[usize::from(line)] = 0;

        let lcdc = LcdControl::from_bits_truncate(bus.get_byte(LCD_CONTROL_REGISTER));
        if lcdc.contains(LcdControl::BG_WINDOW_DISPLAY) {
            self.draw_background(bus, lcdc, line);
        }
        if lcdc.contains(LcdControl::SPRITE_DISPLAY_ENABLE) {
            self.draw_sprites(bus, lcdc, line);
        }
        if lcdc.contains(LcdControl::WINDOW_DISPLAY) {
            self.draw_window(bus, lcdc, line);
        }
    }

    fn draw_background<B: Bus>(&mut self, bus: &B, lcdc: LcdControl, line: u8) {
        let vram = bus.vram();
        let scy = usize::from(bus.get_byte(SCY_REGISTER));
        let scx = usize::from(bus.get_byte(SCX_REGISTER));
        let map_offset = lcdc.background_map_offset();

        let tile_y = ((usize::from(line) + scy) / 8) % 32;
        let row = (usize::from(line) + scy) % 8;

        // 21 columns: a misaligned horizontal scroll clips the first tile and
        // exposes part of a 21st.
        for x in 0..=20 {
            let tile_x = (x + scx / 8) % 32;
            let map_index = map_offset + tile_y * 32 + tile_x;
            let tile_index = resolve_tile_index(vram[map_index], lcdc);
            let attribute = self.map_attribute(vram, map_index);
            let palette = self.palettes.bg(attribute.cgb_palette);
            let screen_x = (x * 8) as i32 - (scx % 8) as i32;
            self.blit_tile_row(
                vram,
                &attribute,
                attribute.vram_bank,
                tile_index,
                row,
                palette,
                screen_x,
                line,
                Layer::Background,
            );
        }
    }

    fn draw_window<B: Bus>(&mut self, bus: &B, lcdc: LcdControl, line: u8) {
        let wy = i32::from(bus.get_byte(WY_REGISTER));
        // The window X register is offset by 7.
        let wx = i32::from(bus.get_byte(WX_REGISTER)) - 7;
        if wy > i32::from(line) || wx >= SCREEN_WIDTH as i32 {
            return;
        }

        let vram = bus.vram();
        let map_offset = lcdc.window_map_offset();
        let tile_y = (i32::from(line) - wy) as usize / 8;
        let row = (i32::from(line) - wy) as usize % 8;

        for x in wx / 8..=20 {
            let map_index = map_offset + tile_y * 32 + x as usize;
            let tile_index = resolve_tile_index(vram[map_index], lcdc);
            let attribute = self.map_attribute(vram, map_index);
            let palette = self.palettes.bg(attribute.cgb_palette);
            let screen_x = wx + x * 8;
            self.blit_tile_row(
                vram,
                &attribute,
                attribute.vram_bank,
                tile_index,
                row,
                palette,
                screen_x,
                line,
                Layer::Window,
            );
        }
    }

    // OAM holds 40 entries of 4 bytes: Y position (minus 16), X position
    // (minus 8), tile number, attributes. Entries are scanned in table order
    // and at most ten sprites land on any one line; in 8x16 mode the upper
    // tile is "NN AND FEh" and the lower tile "NN OR 01h".
    fn draw_sprites<B: Bus>(&mut self, bus: &B, lcdc: LcdControl, line: u8) {
        let vram = bus.vram();
        let oam = bus.oam();
        let height = lcdc.sprite_height();
        let tall = height == 16;
        let screen_line = i32::from(line);

        for entry in oam.chunks_exact(4) {
            if self.sprites_drawn[usize::from(line)] == 10 {
                break;
            }

            let y = i32::from(entry[0]) - 16;
            let x = i32::from(entry[1]) - 8;
            let tile_number = usize::from(entry[2]);
            let attribute = Attribute::from(entry[3]);

            if screen_line < y || screen_line >= y + height {
                continue;
            }

            let (bank, palette) = match self.mode {
                HardwareMode::Cgb => (attribute.vram_bank, self.palettes.obj(attribute.cgb_palette)),
                HardwareMode::Dmg => (0, self.palettes.obj(attribute.dmg_palette)),
            };
            let layer = Layer::Sprite {
                behind_background: attribute.bg_over_obj,
            };

            let (tile_index, row) = if tall {
                // The Y flip mirrors the whole 16-pixel sprite, so it swaps
                // which tile is on top as well as the rows within each half.
                let top = if attribute.y_flip {
                    tile_number | 0x01
                } else {
                    tile_number & 0xFE
                };
                let bottom = if attribute.y_flip {
                    tile_number & 0xFE
                } else {
                    tile_number | 0x01
                };
                if screen_line < y + 8 {
                    (top, (screen_line - y) as usize)
                } else {
                    (bottom, (screen_line - y - 8) as usize)
                }
            } else {
                (tile_number, (screen_line - y) as usize)
            };

            self.blit_tile_row(vram, &attribute, bank, tile_index, row, palette, x, line, layer);
            self.sprites_drawn[usize::from(line)] += 1;
        }
    }

    /// Fetch one row of a tile and arbitrate its eight pixels into the
    /// framebuffer, clipping at the screen edges. Sprite layers skip color 0
    /// (transparent).
    #[allow(clippy::too_many_arguments)]
    fn blit_tile_row(
        &mut self,
        vram: &[u8],
        attribute: &Attribute,
        bank: usize,
        tile_index: usize,
        row: usize,
        palette: Palette,
        screen_x: i32,
        line: u8,
        layer: Layer,
    ) {
        let transparent = matches!(layer, Layer::Sprite { .. });
        let pixels = tile::fetch_tile_row(
            vram,
            bank,
            tile_index,
            row,
            attribute.x_flip,
            attribute.y_flip,
        );
        for (i, &color_index) in pixels.iter().enumerate() {
            let x = screen_x + i as i32;
            if !(0..SCREEN_WIDTH as i32).contains(&x) || (transparent && color_index == 0) {
                continue;
            }
            self.framebuffer.set_pixel(
                x as usize,
                usize::from(line),
                layer.priority(color_index),
                palette.color(color_index),
            );
        }
    }

    /// The attribute byte shadowing a tile map entry in VRAM bank 1. DMG
    /// hardware has no second bank, so everything decodes as zero there.
    fn map_attribute(&self, vram: &[u8], map_index: usize) -> Attribute {
        match self.mode {
            HardwareMode::Cgb => Attribute::from(vram[VRAM_BANK_SIZE + map_index]),
            HardwareMode::Dmg => Attribute::from(0x00),
        }
    }
}

/// Map a tile map byte to a pattern index, honouring the LCDC addressing
/// mode: unsigned into the 8000h table, or signed around the 9000h base.
fn resolve_tile_index(raw: u8, lcdc: LcdControl) -> usize {
    if lcdc.signed_tile_addressing() {
        (i32::from(raw as i8) + 256) as usize
    } else {
        usize::from(raw)
    }
}
