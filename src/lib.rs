//! A cycle-driven Gameboy / Gameboy Color pixel processing unit.
//!
//! The PPU converts VRAM tile data, the background and window maps, object
//! attribute memory, and palette RAM into a 160x144 framebuffer while keeping
//! the LCD status register and the two LCD interrupts in lockstep with a host
//! CPU. The host implements [`Bus`] (register access, VRAM/OAM slices,
//! interrupt requests, an optional H-Blank DMA hook) and drives the PPU by
//! calling [`Ppu::tick`] with the cycles its CPU just executed; finished
//! frames are pushed to an attached [`Screen`].
//!
//! The CPU core, MMU, cartridge, and display surface are deliberately not
//! part of this crate; they are collaborators behind the [`Bus`] and
//! [`Screen`] seams.

pub mod bus;
pub mod memory;
pub mod ppu;

pub use crate::bus::{Bus, HardwareMode, Interrupt, Screen};
pub use crate::memory::Memory;
pub use crate::ppu::{Framebuffer, Ppu, SCREEN_HEIGHT, SCREEN_WIDTH};
