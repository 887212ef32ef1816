use std::mem::offset_of;
use uxn::{ppu::Layer, ppu::Ppu, Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct ScreenPorts {
    vector: U16<BigEndian>,
    width: U16<BigEndian>,
    height: U16<BigEndian>,
    auto: u8,
    _pad: u8,
    x: U16<BigEndian>,
    y: U16<BigEndian>,
    addr: U16<BigEndian>,
    pixel: u8,
    sprite: u8,
}

static_assertions::assert_eq_size!(ScreenPorts, [u8; 16]);

impl Ports for ScreenPorts {
    const BASE: u8 = 0x20;
}

impl ScreenPorts {
    // The DEI hook fires on the first byte of a short register; the DEO
    // action fires once the second byte has landed.
    const WIDTH_R: u8 = Self::BASE | offset_of!(Self, width) as u8;
    const WIDTH_W: u8 = Self::WIDTH_R + 1;
    const HEIGHT_R: u8 = Self::BASE | offset_of!(Self, height) as u8;
    const HEIGHT_W: u8 = Self::HEIGHT_R + 1;
    const PIXEL: u8 = Self::BASE | offset_of!(Self, pixel) as u8;
    const SPRITE: u8 = Self::BASE | offset_of!(Self, sprite) as u8;
}

mod auto {
    pub const X: u8 = 1 << 0;
    pub const Y: u8 = 1 << 1;
    pub const ADDR: u8 = 1 << 2;
}

pub struct Screen {
    ppu: Ppu,
}

impl Screen {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            ppu: Ppu::new(width, height),
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.ppu.width(), self.ppu.height())
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    /// Returns the screen vector
    pub fn event(&mut self, vm: &Uxn) -> u16 {
        vm.dev::<ScreenPorts>().vector.get()
    }

    /// Takes the dirty scanline range, resetting it for the next frame
    pub fn frame(&mut self) -> Option<(u16, u16)> {
        if self.ppu.needs_redraw() {
            let lines = self.ppu.dirty_lines();
            self.ppu.frame_reset();
            Some(lines)
        } else {
            None
        }
    }

    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<ScreenPorts>();
        match target {
            ScreenPorts::HEIGHT_W => {
                let w = v.width.get();
                let h = v.height.get();
                if (w, h) != self.size() {
                    self.ppu.resize(w, h);
                }
            }
            ScreenPorts::PIXEL => {
                self.pixel(vm);
            }
            ScreenPorts::SPRITE => {
                self.sprite(vm);
            }
            _ => (),
        }
    }

    pub fn dei(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev_mut::<ScreenPorts>();
        match target {
            // either byte of a size short answers with the live value, so
            // byte-wide reads of the low half work too
            ScreenPorts::WIDTH_R | ScreenPorts::WIDTH_W => {
                v.width.set(self.ppu.width());
            }
            ScreenPorts::HEIGHT_R | ScreenPorts::HEIGHT_W => {
                v.height.set(self.ppu.height());
            }
            _ => (),
        }
    }

    /// Executes the `pixel` operation
    fn pixel(&mut self, vm: &mut Uxn) {
        let v = vm.dev::<ScreenPorts>();
        let p = v.pixel;
        let layer = if p & (1 << 6) != 0 {
            Layer::Foreground
        } else {
            Layer::Background
        };
        let x = v.x.get();
        let y = v.y.get();
        let a = v.auto;
        self.ppu.write(layer, x, y, p & 0x3);

        let v = vm.dev_mut::<ScreenPorts>();
        if a & auto::X != 0 {
            v.x.set(x.wrapping_add(1));
        }
        if a & auto::Y != 0 {
            v.y.set(y.wrapping_add(1));
        }
    }

    /// Executes the `sprite` operation, reading tile data from VM RAM
    fn sprite(&mut self, vm: &mut Uxn) {
        let v = vm.dev::<ScreenPorts>();
        let p = v.sprite;
        let layer = if p & (1 << 6) != 0 {
            Layer::Foreground
        } else {
            Layer::Background
        };
        let color = p & 0xf;
        let flip_x = p & (1 << 4) != 0;
        let flip_y = p & (1 << 5) != 0;
        let two_bpp = p & (1 << 7) != 0;

        let x = v.x.get();
        let y = v.y.get();
        let a = v.auto;
        let addr = v.addr.get();

        if two_bpp {
            let mut data = [0u8; 16];
            for (i, b) in data.iter_mut().enumerate() {
                *b = vm.ram_read_byte(addr.wrapping_add(i as u16));
            }
            self.ppu
                .blit_2bpp(layer, x, y, &data, color, flip_x, flip_y);
        } else {
            let mut data = [0u8; 8];
            for (i, b) in data.iter_mut().enumerate() {
                *b = vm.ram_read_byte(addr.wrapping_add(i as u16));
            }
            self.ppu
                .blit_1bpp(layer, x, y, &data, color, flip_x, flip_y);
        }

        let v = vm.dev_mut::<ScreenPorts>();
        if a & auto::X != 0 {
            v.x.set(x.wrapping_add(8));
        }
        if a & auto::Y != 0 {
            v.y.set(y.wrapping_add(8));
        }
        if a & auto::ADDR != 0 {
            let step = if two_bpp { 16 } else { 8 };
            v.addr.set(addr.wrapping_add(step));
        }
    }
}
