use crate::Event;
use std::{io::Read, mem::offset_of, sync::mpsc};
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct ConsolePorts {
    vector: U16<BigEndian>,
    read: u8,
    _pad: [u8; 5],
    write: u8,
    error: u8,
    _pad2: [u8; 6],
}

static_assertions::assert_eq_size!(ConsolePorts, [u8; 16]);

impl Ports for ConsolePorts {
    const BASE: u8 = 0x10;
}

impl ConsolePorts {
    const READ: u8 = Self::BASE | offset_of!(Self, read) as u8;
    const WRITE: u8 = Self::BASE | offset_of!(Self, write) as u8;
    const ERROR: u8 = Self::BASE | offset_of!(Self, error) as u8;
}

/// Spawns a worker thread that listens on `stdin` and emits characters
///
/// The thread exits when `stdin` closes or the receiver is dropped.
pub fn spawn_worker() -> mpsc::Receiver<u8> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut i = std::io::stdin().lock();
        let mut buf = [0u8; 32];
        loop {
            let Ok(n) = i.read(&mut buf) else {
                return;
            };
            if n == 0 {
                return;
            }
            for &c in &buf[..n] {
                if tx.send(c).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

pub struct Console {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            stdout: vec![],
            stderr: vec![],
        }
    }

    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<ConsolePorts>();
        match target {
            ConsolePorts::WRITE => {
                self.stdout.push(v.write);
            }
            ConsolePorts::ERROR => {
                self.stderr.push(v.error);
            }
            _ => (),
        }
    }

    /// Builds the event for an incoming byte
    ///
    /// The byte lands in the `read` register just before the vector runs.
    pub fn event(&mut self, vm: &Uxn, c: u8) -> Event {
        let p = vm.dev::<ConsolePorts>();
        Event {
            vector: p.vector.get(),
            data: Some(crate::EventData {
                addr: ConsolePorts::READ,
                value: c,
                clear: false,
            }),
        }
    }

    /// Takes the `stdout` buffer, leaving it empty
    pub fn stdout(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stdout)
    }

    /// Takes the `stderr` buffer, leaving it empty
    pub fn stderr(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.stderr)
    }
}
