use log::info;
use std::mem::offset_of;
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct SystemPorts {
    _vector: U16<BigEndian>,
    wst: u8,
    rst: u8,
    _pad: [u8; 4],
    red: U16<BigEndian>,
    green: U16<BigEndian>,
    blue: U16<BigEndian>,
    debug: u8,
    state: u8,
}

static_assertions::assert_eq_size!(SystemPorts, [u8; 16]);

impl Ports for SystemPorts {
    const BASE: u8 = 0x00;
}

impl SystemPorts {
    const WST: u8 = offset_of!(Self, wst) as u8;
    const RST: u8 = offset_of!(Self, rst) as u8;
    const DEBUG: u8 = offset_of!(Self, debug) as u8;
    const STATE: u8 = offset_of!(Self, state) as u8;

    /// Looks up the color for the given index
    ///
    /// The three channel registers each hold four 4-bit values; indices past
    /// 3 fold back onto the first four colors.
    pub fn color(&self, i: u8) -> u32 {
        let i = 3 - (if i < 4 { i } else { i / 4 });
        let r = u32::from(self.red.get() >> (i * 4)) & 0xf;
        let g = u32::from(self.green.get() >> (i * 4)) & 0xf;
        let b = u32::from(self.blue.get() >> (i * 4)) & 0xf;
        let color = (r << 16) | (g << 8) | b;
        color | (color << 4)
    }
}

pub struct System {
    exit: Option<i32>,
}

impl System {
    pub fn new() -> Self {
        Self { exit: None }
    }

    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<SystemPorts>();
        match target {
            SystemPorts::WST => {
                let wst = v.wst;
                vm.stack_mut().set_len(wst)
            }
            SystemPorts::RST => {
                let rst = v.rst;
                vm.ret_mut().set_len(rst)
            }
            SystemPorts::DEBUG => {
                if v.debug != 0 {
                    self.inspect(vm);
                }
            }
            SystemPorts::STATE => {
                if v.state != 0 {
                    self.exit = Some((v.state & !0x80) as i32);
                }
            }
            _ => (),
        }
    }

    pub fn dei(&mut self, vm: &mut Uxn, target: u8) {
        match target {
            SystemPorts::WST => {
                let wst = vm.stack().len();
                vm.dev_mut::<SystemPorts>().wst = wst;
            }
            SystemPorts::RST => {
                let rst = vm.ret().len();
                vm.dev_mut::<SystemPorts>().rst = rst;
            }
            _ => (),
        }
    }

    /// Logs the top of both stacks
    fn inspect(&self, vm: &Uxn) {
        for (name, st) in [("WST", vm.stack()), ("RST", vm.ret())] {
            let mut line = format!("{name} ");
            let n = st.len();
            for i in (0..8).rev() {
                line += &format!("{:02x}", st.peek_byte_at(i));
                line.push(if i == n { '|' } else { ' ' });
            }
            info!("{line}<");
        }
    }

    /// Clears and returns the exit code (if present)
    pub fn exit(&mut self) -> Option<i32> {
        self.exit.take()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use zerocopy::FromZeroes;

    #[test]
    fn palette_decode() {
        let mut p = SystemPorts::new_zeroed();
        p.red.set(0x2ce9);
        p.green.set(0x01c0);
        p.blue.set(0x2ce5);
        assert_eq!(p.color(0), 0x220022);
        assert_eq!(p.color(1), 0xcc11cc);
        assert_eq!(p.color(2), 0xeeccee);
        assert_eq!(p.color(3), 0x990055);
        // indices past 3 fold down
        assert_eq!(p.color(4), p.color(1));
        assert_eq!(p.color(9), p.color(2));
        assert_eq!(p.color(15), p.color(3));
    }
}
