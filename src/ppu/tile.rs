use crate::bus::VRAM_BANK_SIZE;

/// Bytes per 8x8 tile: 8 rows of 2 bytes (2 bits per pixel, planar).
pub const TILE_SIZE: usize = 16;

/// Number of tile patterns addressable within one VRAM bank. Indices 0-255
/// cover the unsigned table at 0x0000-0x0FFF, 256-383 the signed table's own
/// half at 0x1000-0x17FF.
pub const TILE_COUNT: usize = 384;

/// Decode one 8-pixel row of a tile into 2-bit palette indices.
///
/// Each row is two bytes: the first holds the low bit of every pixel, the
/// second the high bit, with pixel 0 in bit 7 and pixel 7 in bit 0. The flip
/// flags mirror the lookup within the tile, so callers always pass the
/// unflipped `row` and read pixels left to right.
pub fn fetch_tile_row(
    vram: &[u8],
    bank: usize,
    tile_index: usize,
    row: usize,
    x_flip: bool,
    y_flip: bool,
) -> [u8; 8] {
    debug_assert!(tile_index < TILE_COUNT);
    debug_assert!(row < 8);

    let base = bank * VRAM_BANK_SIZE + tile_index * TILE_SIZE;
    let row = if y_flip { 7 - row } else { row };
    let low = vram[base + row * 2];
    let high = vram[base + row * 2 + 1];

    let mut pixels = [0; 8];
    for (i, pixel) in pixels.iter_mut().enumerate() {
        let i = if x_flip { 7 - i } else { i };
        let bit = 7 - i;
        *pixel = ((high >> bit) & 0x01) << 1 | ((low >> bit) & 0x01);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bus::VRAM_SIZE;

    fn vram_with_tile(bank: usize, tile_index: usize, rows: &[[u8; 2]]) -> Vec<u8> {
        let mut vram = vec![0x00; VRAM_SIZE];
        let base = bank * VRAM_BANK_SIZE + tile_index * TILE_SIZE;
        for (row, bytes) in rows.iter().enumerate() {
            vram[base + row * 2] = bytes[0];
            vram[base + row * 2 + 1] = bytes[1];
        }
        vram
    }

    #[test]
    fn combines_low_and_high_planes() {
        // Pixel columns 0..7 get indices 0, 1, 2, 3, 0, 1, 2, 3.
        let vram = vram_with_tile(0, 2, &[[0b0101_0101, 0b0011_0011]]);
        let row = fetch_tile_row(&vram, 0, 2, 0, false, false);
        assert_eq!(row, [0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn x_flip_mirrors_the_row() {
        let vram = vram_with_tile(0, 2, &[[0b0101_0101, 0b0011_0011]]);
        let row = fetch_tile_row(&vram, 0, 2, 0, true, false);
        assert_eq!(row, [3, 2, 1, 0, 3, 2, 1, 0]);
    }

    #[test]
    fn y_flip_reads_the_opposite_row() {
        let mut rows = [[0x00, 0x00]; 8];
        rows[7] = [0xFF, 0x00];
        let vram = vram_with_tile(0, 5, &rows);
        assert_eq!(fetch_tile_row(&vram, 0, 5, 0, false, true), [1; 8]);
        assert_eq!(fetch_tile_row(&vram, 0, 5, 7, false, true), [0; 8]);
    }

    #[test]
    fn second_bank_and_signed_table_are_plain_offsets() {
        let vram = vram_with_tile(1, 300, &[[0x00, 0xFF]]);
        assert_eq!(fetch_tile_row(&vram, 1, 300, 0, false, false), [2; 8]);
    }
}
