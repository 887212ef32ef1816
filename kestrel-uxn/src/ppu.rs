//! Dual-layer packed pixel buffer
//!
//! Pixels are stored 8 to a 32-bit word, 4 bits each: the low two bits of a
//! nibble are the background color, the high two bits the foreground.  The
//! buffer tracks a dirty word range so a renderer only touches the lines
//! that changed since the last frame.
extern crate alloc;
use alloc::{vec, vec::Vec};

/// Pixels per packed word
const PIXELS_PER_WORD: u32 = 8;

/// Which of the two pixel layers a write targets
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layer {
    /// Drawn below the foreground
    Background,
    /// Drawn above the background; color 0 is transparent when compositing
    Foreground,
}

impl Layer {
    /// Bit position of this layer's 2-bit field within a pixel nibble
    #[inline]
    fn shift(&self) -> u32 {
        match self {
            Layer::Background => 0,
            Layer::Foreground => 2,
        }
    }
}

/// Blending table for sprite draws
///
/// Rows 0-3 map a source channel to an output color for each of the 16 blend
/// modes; row 4 marks the modes in which channel 0 still paints.
const BLENDING: [[u8; 16]; 5] = [
    [0, 0, 0, 0, 1, 0, 1, 1, 2, 2, 0, 2, 3, 3, 3, 0],
    [0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3],
    [1, 2, 3, 1, 1, 2, 3, 1, 1, 2, 3, 1, 1, 2, 3, 1],
    [2, 3, 1, 2, 2, 3, 1, 2, 2, 3, 1, 2, 2, 3, 1, 2],
    [1, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0, 1, 1, 1, 1, 0],
];

/// Packed dual-layer pixel buffer with dirty-range tracking
pub struct Ppu {
    width: u16,
    height: u16,
    /// Words per scanline
    stride: u32,
    pixels: Vec<u32>,
    /// Lowest dirty word index (inclusive)
    i0: u32,
    /// Highest dirty word index (inclusive)
    i1: u32,
    redraw: bool,
}

impl Ppu {
    /// Builds a buffer of the given size, fully dirty
    pub fn new(width: u16, height: u16) -> Self {
        let mut out = Self {
            width: 0,
            height: 0,
            stride: 0,
            pixels: vec![],
            i0: 0,
            i1: 0,
            redraw: false,
        };
        out.resize(width, height);
        out
    }

    /// Buffer width in pixels
    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Buffer height in pixels
    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Words per scanline
    #[inline]
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The packed words themselves, for renderers
    #[inline]
    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Whether anything changed since the last [`Ppu::frame_reset`]
    #[inline]
    pub fn needs_redraw(&self) -> bool {
        self.redraw
    }

    /// Dirty word range as `(first, last)` indices, both inclusive
    ///
    /// Only meaningful while [`Ppu::needs_redraw`] is true.
    #[inline]
    pub fn dirty_range(&self) -> (u32, u32) {
        (self.i0, self.i1)
    }

    /// Dirty scanline range as `(first, one past last)`
    pub fn dirty_lines(&self) -> (u16, u16) {
        let y0 = self.i0 / self.stride;
        let y1 = self.i1 / self.stride + 1;
        (y0 as u16, (y1 as u16).min(self.height))
    }

    /// Reallocates the buffer, zeroing it and marking everything dirty
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.stride = (u32::from(width) + PIXELS_PER_WORD - 1)
            / PIXELS_PER_WORD;
        self.pixels = vec![0u32; (self.stride * u32::from(height)) as usize];
        self.i0 = 0;
        self.i1 = (self.pixels.len() as u32).saturating_sub(1);
        self.redraw = true;
    }

    /// Clears the redraw flag and collapses the dirty range
    ///
    /// `i0` moves past the end of the buffer and `i1` to 0, so the next
    /// write establishes a fresh bound.
    pub fn frame_reset(&mut self) {
        self.redraw = false;
        self.i0 = self.pixels.len() as u32;
        self.i1 = 0;
    }

    /// Reads the combined 4-bit nibble at the given pixel
    ///
    /// Out-of-bounds reads return 0.
    pub fn read(&self, x: u16, y: u16) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        let i = u32::from(y) * self.stride + u32::from(x) / PIXELS_PER_WORD;
        let shift = (u32::from(x) % PIXELS_PER_WORD) * 4;
        ((self.pixels[i as usize] >> shift) & 0xf) as u8
    }

    /// Writes a 2-bit color to one layer of one pixel
    ///
    /// Out-of-bounds writes are silently ignored.  The dirty range widens
    /// only if the stored word actually changes.
    pub fn write(&mut self, layer: Layer, x: u16, y: u16, color: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = u32::from(y) * self.stride + u32::from(x) / PIXELS_PER_WORD;
        let shift = (u32::from(x) % PIXELS_PER_WORD) * 4 + layer.shift();
        let prev = self.pixels[i as usize];
        let next = (prev & !(0x3 << shift)) | (u32::from(color & 0x3) << shift);
        if next != prev {
            self.pixels[i as usize] = next;
            self.redraw = true;
            self.i0 = self.i0.min(i);
            self.i1 = self.i1.max(i);
        }
    }

    /// Draws one 8x8 1-bit-per-pixel tile
    ///
    /// `data` is 8 row bytes, most significant bit leftmost.  `color` picks
    /// a blend mode; a pixel is painted only if its channel is non-zero or
    /// the blend mode is opaque.
    pub fn blit_1bpp(
        &mut self,
        layer: Layer,
        x: u16,
        y: u16,
        data: &[u8; 8],
        color: u8,
        flip_x: bool,
        flip_y: bool,
    ) {
        let color = usize::from(color & 0xf);
        for v in 0..8u16 {
            let row = data[usize::from(if flip_y { 7 - v } else { v })];
            for h in 0..8u16 {
                let bit = if flip_x { h } else { 7 - h };
                let ch = (row >> bit) & 0x1;
                if ch != 0 || BLENDING[4][color] != 0 {
                    self.write(
                        layer,
                        x.wrapping_add(h),
                        y.wrapping_add(v),
                        BLENDING[usize::from(ch)][color],
                    );
                }
            }
        }
    }

    /// Draws one 8x8 2-bit-per-pixel tile
    ///
    /// `data` holds the low bitplane in bytes 0-7 and the high bitplane in
    /// bytes 8-15.
    pub fn blit_2bpp(
        &mut self,
        layer: Layer,
        x: u16,
        y: u16,
        data: &[u8; 16],
        color: u8,
        flip_x: bool,
        flip_y: bool,
    ) {
        let color = usize::from(color & 0xf);
        for v in 0..8u16 {
            let i = usize::from(if flip_y { 7 - v } else { v });
            let lo = data[i];
            let hi = data[i + 8];
            for h in 0..8u16 {
                let bit = if flip_x { h } else { 7 - h };
                let ch = ((lo >> bit) & 0x1) | (((hi >> bit) & 0x1) << 1);
                if ch != 0 || BLENDING[4][color] != 0 {
                    self.write(
                        layer,
                        x.wrapping_add(h),
                        y.wrapping_add(v),
                        BLENDING[usize::from(ch)][color],
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pixel_roundtrip() {
        let mut ppu = Ppu::new(64, 40);
        ppu.frame_reset();
        ppu.write(Layer::Background, 10, 3, 2);
        ppu.write(Layer::Foreground, 10, 3, 1);
        assert_eq!(ppu.read(10, 3), 0x6); // fg 1 in bits 2-3, bg 2 in bits 0-1
        assert!(ppu.needs_redraw());
        let i = 3 * ppu.stride() + 10 / 8;
        assert_eq!(ppu.dirty_range(), (i, i));
    }

    #[test]
    fn noop_write_leaves_range_clean() {
        let mut ppu = Ppu::new(64, 40);
        ppu.write(Layer::Background, 5, 5, 3);
        ppu.frame_reset();
        // same value again; the word does not change
        ppu.write(Layer::Background, 5, 5, 3);
        assert!(!ppu.needs_redraw());
        let (i0, i1) = ppu.dirty_range();
        assert_eq!(i0, ppu.pixels().len() as u32);
        assert_eq!(i1, 0);
    }

    #[test]
    fn out_of_bounds_ignored() {
        let mut ppu = Ppu::new(16, 16);
        ppu.frame_reset();
        ppu.write(Layer::Background, 16, 0, 3);
        ppu.write(Layer::Background, 0, 16, 3);
        ppu.write(Layer::Foreground, 0xffff, 0xffff, 3);
        assert!(!ppu.needs_redraw());
        assert_eq!(ppu.read(16, 0), 0);
    }

    #[test]
    fn resize_marks_everything_dirty() {
        let mut ppu = Ppu::new(8, 8);
        ppu.write(Layer::Background, 1, 1, 2);
        ppu.frame_reset();
        ppu.resize(24, 16);
        assert_eq!(ppu.width(), 24);
        assert_eq!(ppu.height(), 16);
        assert_eq!(ppu.stride(), 3);
        assert_eq!(ppu.pixels().len(), 48);
        assert!(ppu.needs_redraw());
        assert_eq!(ppu.dirty_range(), (0, 47));
        // contents are zeroed
        assert_eq!(ppu.read(1, 1), 0);
    }

    #[test]
    fn odd_width_stride_rounds_up() {
        let ppu = Ppu::new(13, 2);
        assert_eq!(ppu.stride(), 2);
        assert_eq!(ppu.pixels().len(), 4);
    }

    #[test]
    fn dirty_lines_span() {
        let mut ppu = Ppu::new(64, 40);
        ppu.frame_reset();
        ppu.write(Layer::Background, 0, 10, 1);
        ppu.write(Layer::Background, 63, 12, 1);
        assert_eq!(ppu.dirty_lines(), (10, 13));
    }

    #[test]
    fn blit_1bpp_solid_row() {
        let mut ppu = Ppu::new(32, 32);
        ppu.frame_reset();
        let tile = [0xff, 0, 0, 0, 0, 0, 0, 0];
        ppu.blit_1bpp(Layer::Background, 8, 8, &tile, 0x1, false, false);
        for x in 8..16 {
            assert_eq!(ppu.read(x, 8), BLENDING[1][1]);
        }
        assert_eq!(ppu.read(8, 9), 0);
    }

    #[test]
    fn blit_1bpp_transparent_mode_skips_zero_channel() {
        let mut ppu = Ppu::new(16, 16);
        // paint an underlayer first
        ppu.write(Layer::Background, 0, 0, 3);
        ppu.frame_reset();
        // mode 5 is transparent for channel 0
        let tile = [0x00; 8];
        ppu.blit_1bpp(Layer::Background, 0, 0, &tile, 0x5, false, false);
        assert_eq!(ppu.read(0, 0), 3);
        assert!(!ppu.needs_redraw());
    }

    #[test]
    fn blit_1bpp_flip() {
        let mut ppu = Ppu::new(16, 16);
        // one pixel in the top-left corner of the tile
        let tile = [0x80, 0, 0, 0, 0, 0, 0, 0];
        ppu.blit_1bpp(Layer::Background, 0, 0, &tile, 0x1, true, true);
        assert_eq!(ppu.read(0, 0) & 0x3, BLENDING[0][1]);
        assert_eq!(ppu.read(7, 7) & 0x3, BLENDING[1][1]);
    }

    #[test]
    fn blit_2bpp_channels() {
        let mut ppu = Ppu::new(16, 16);
        // low plane sets bit 0, high plane sets bit 1 for the first pixel
        let mut tile = [0u8; 16];
        tile[0] = 0x80; // channel bit 0
        tile[8] = 0x80; // channel bit 1
        ppu.blit_2bpp(Layer::Background, 0, 0, &tile, 0x1, false, false);
        // channel 3 through mode 1
        assert_eq!(ppu.read(0, 0) & 0x3, BLENDING[3][1]);
    }
}
