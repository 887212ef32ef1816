use log::{error, trace};
use std::{
    io::{Read, Seek, SeekFrom, Write},
    mem::offset_of,
};
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct FilePorts {
    _vector: U16<BigEndian>,
    success: U16<BigEndian>,
    offset_hi: U16<BigEndian>,
    offset_lo: U16<BigEndian>,
    name: U16<BigEndian>,
    length: U16<BigEndian>,
    read: U16<BigEndian>,
    write: U16<BigEndian>,
}

static_assertions::assert_eq_size!(FilePorts, [u8; 16]);

impl Ports for FilePorts {
    const BASE: u8 = 0xa0;
}

impl FilePorts {
    const READ: u8 = Self::BASE | (offset_of!(Self, read) + 1) as u8;
    const WRITE: u8 = Self::BASE | (offset_of!(Self, write) + 1) as u8;

    fn offset(&self) -> u64 {
        (u64::from(self.offset_hi.get()) << 16) | u64::from(self.offset_lo.get())
    }

    /// Reads the NUL-terminated filename out of VM RAM
    ///
    /// Returns `None` if the name is not valid UTF-8, or if no terminator
    /// is found within the 64 KiB address space.
    fn filename(&self, vm: &Uxn) -> Option<String> {
        let mut addr = self.name.get();
        let mut out = vec![];
        while out.last() != Some(&0) {
            if out.len() == 0x10000 {
                return None;
            }
            out.push(vm.ram_read_byte(addr));
            addr = addr.wrapping_add(1);
        }
        out.pop();
        String::from_utf8(out).ok()
    }
}

pub struct File {
    /// Scratch buffer for transfers
    buf: Vec<u8>,
}

impl File {
    pub fn new() -> Self {
        Self { buf: vec![] }
    }

    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        match target {
            FilePorts::READ => self.read(vm),
            FilePorts::WRITE => self.write(vm),
            _ => (),
        }
    }

    /// Reads `length` bytes from the named file into VM RAM
    ///
    /// Any failure clears the success register and logs; nothing is fatal to
    /// the running program.
    fn read(&mut self, vm: &mut Uxn) {
        vm.dev_mut::<FilePorts>().success.set(0);
        let ports = vm.dev::<FilePorts>();
        let Some(filename) = ports.filename(vm) else {
            error!("could not read filename");
            return;
        };
        let offset = ports.offset();
        let addr = ports.read.get();
        self.buf.resize(usize::from(ports.length.get()), 0u8);

        trace!("reading file {filename}");
        let mut f = match std::fs::File::open(&filename) {
            Ok(f) => f,
            Err(e) => {
                error!("could not open {filename:?}: {e}");
                return;
            }
        };
        if let Err(e) = f.seek(SeekFrom::Start(offset)) {
            error!("could not seek in {filename:?}: {e}");
            return;
        }
        let n = match f.read(&mut self.buf) {
            Ok(n) => n,
            Err(e) => {
                error!("failed to read {filename:?}: {e}");
                return;
            }
        };

        vm.dev_mut::<FilePorts>().success.set(n as u16);
        for (i, &b) in self.buf[..n].iter().enumerate() {
            vm.ram_write_byte(addr.wrapping_add(i as u16), b);
        }
    }

    /// Writes `length` bytes from VM RAM into the named file
    ///
    /// A non-zero seek offset appends; otherwise the file is truncated.
    fn write(&mut self, vm: &mut Uxn) {
        vm.dev_mut::<FilePorts>().success.set(0);
        let ports = vm.dev::<FilePorts>();
        let Some(filename) = ports.filename(vm) else {
            error!("could not read filename");
            return;
        };
        let offset = ports.offset();
        let addr = ports.write.get();
        let length = ports.length.get();

        self.buf.clear();
        for i in 0..length {
            self.buf.push(vm.ram_read_byte(addr.wrapping_add(i)));
        }

        trace!("writing file {filename}");
        let mut opts = std::fs::OpenOptions::new();
        opts.write(true).create(true);
        if offset != 0 {
            opts.append(true);
        } else {
            opts.truncate(true);
        }
        let mut f = match opts.open(&filename) {
            Ok(f) => f,
            Err(e) => {
                error!("could not open {filename:?}: {e}");
                return;
            }
        };
        match f.write(&self.buf) {
            Ok(n) => vm.dev_mut::<FilePorts>().success.set(n as u16),
            Err(e) => error!("failed to write {filename:?}: {e}"),
        }
    }
}
