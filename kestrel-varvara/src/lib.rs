//! Peripheral devices for the Kestrel CPU
#![warn(missing_docs)]
use std::io::Write;

use log::{error, warn};

mod console;
mod controller;
mod datetime;
mod file;
mod mouse;
mod screen;
mod system;

pub use console::spawn_worker as spawn_console_worker;
pub use controller::Key;
pub use mouse::MouseState;

use uxn::{Device, Fault, Ports, StackId, Uxn};

/// Write to execute before calling the event vector
#[derive(Copy, Clone, Debug)]
struct EventData {
    addr: u8,
    value: u8,
    clear: bool,
}

/// Internal events, accumulated by devices then applied to the CPU
#[derive(Copy, Clone, Debug)]
struct Event {
    /// Tuple of `(address, value)` to write in device memory
    data: Option<EventData>,

    /// Vector to trigger
    vector: u16,
}

/// Output accumulated since the last call to [`Varvara::output`]
pub struct Output {
    /// Outgoing console characters sent to the `write` port
    pub stdout: Vec<u8>,

    /// Outgoing console characters sent to the `error` port
    pub stderr: Vec<u8>,

    /// Request to exit with the given error code
    pub exit: Option<i32>,
}

impl Output {
    /// Prints `stdout` and `stderr` to the console
    pub fn print(&self) -> std::io::Result<()> {
        if !self.stdout.is_empty() {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&self.stdout)?;
            stdout.flush()?;
        }
        if !self.stderr.is_empty() {
            let mut stderr = std::io::stderr().lock();
            stderr.write_all(&self.stderr)?;
            stderr.flush()?;
        }
        Ok(())
    }

    /// Checks the results
    ///
    /// `stdout` and `stderr` are printed, and `exit(..)` is called if it has
    /// been requested by the VM.
    pub fn check(&self) -> std::io::Result<()> {
        self.print()?;
        if let Some(e) = self.exit {
            std::process::exit(e);
        }
        Ok(())
    }
}

/// Handle to the full set of peripherals
pub struct Varvara {
    system: system::System,
    console: console::Console,
    datetime: datetime::Datetime,
    screen: screen::Screen,
    mouse: mouse::Mouse,
    file: file::File,
    controller: controller::Controller,

    /// Flags indicating if we've already printed a warning about a missing dev
    already_warned: [bool; 16],

    queue: Vec<Event>,
}

impl Default for Varvara {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Varvara {
    fn deo(&mut self, vm: &mut Uxn, target: u8) {
        match target & 0xf0 {
            system::SystemPorts::BASE => self.system.deo(vm, target),
            console::ConsolePorts::BASE => self.console.deo(vm, target),
            screen::ScreenPorts::BASE => self.screen.deo(vm, target),
            controller::ControllerPorts::BASE => (),
            mouse::MousePorts::BASE => (),
            file::FilePorts::BASE => self.file.deo(vm, target),
            datetime::DatetimePorts::BASE => (),

            // Audio lives here, but synthesis is not implemented
            0x30..=0x60 => (),

            // Default case
            t => self.warn_missing(t),
        }
    }
    fn dei(&mut self, vm: &mut Uxn, target: u8) {
        match target & 0xf0 {
            system::SystemPorts::BASE => self.system.dei(vm, target),
            console::ConsolePorts::BASE => (),
            screen::ScreenPorts::BASE => self.screen.dei(vm, target),
            controller::ControllerPorts::BASE => (),
            mouse::MousePorts::BASE => (),
            file::FilePorts::BASE => (),
            datetime::DatetimePorts::BASE => self.datetime.dei(vm, target),

            0x30..=0x60 => (),

            // Default case
            t => self.warn_missing(t),
        }
    }
    fn halt(&mut self, vm: &mut Uxn, fault: Fault, stack: StackId, op: u8) {
        error!(
            "Halted: {stack} {fault}#{op:04x}, at 0x{pc:04x}",
            pc = vm.pc()
        );
    }
}

impl Varvara {
    /// Builds a new instance of the peripherals
    pub fn new() -> Self {
        const WIDTH: u16 = 512;
        const HEIGHT: u16 = 320;
        Self {
            system: system::System::new(),
            console: console::Console::new(),
            datetime: datetime::Datetime,
            screen: screen::Screen::new(WIDTH, HEIGHT),
            mouse: mouse::Mouse::new(),
            file: file::File::new(),
            controller: controller::Controller::new(),

            queue: vec![],
            already_warned: [false; 16],
        }
    }

    /// Returns the current screen size
    pub fn screen_size(&self) -> (u16, u16) {
        self.screen.size()
    }

    /// Borrows the pixel buffer, for renderers
    pub fn ppu(&self) -> &uxn::ppu::Ppu {
        self.screen.ppu()
    }

    fn warn_missing(&mut self, t: u8) {
        if !self.already_warned[(t >> 4) as usize] {
            warn!("unimplemented device {t:#02x}");
            self.already_warned[(t >> 4) as usize] = true;
        }
    }

    /// Calls the screen vector, then reports the dirty scanline range
    ///
    /// Returns `None` if nothing changed since the previous call.  This
    /// function should be called at the display rate.
    pub fn redraw(&mut self, vm: &mut Uxn) -> Option<(u16, u16)> {
        let v = self.screen.event(vm);
        vm.evaluate(self, v);
        self.screen.frame()
    }

    /// Sends one incoming console byte
    ///
    /// If no console vector is installed, execution resumes just past the
    /// last BRK instead, which is how simple console-only programs consume
    /// their input stream.
    pub fn console(&mut self, vm: &mut Uxn, c: u8) {
        let mut e = self.console.event(vm, c);
        if e.vector == 0 {
            e.vector = vm.pc();
        }
        self.queue.push(e);
        self.process_events(vm);
    }

    /// Sends a key press event
    pub fn pressed(&mut self, vm: &mut Uxn, k: Key) {
        self.controller.pressed(vm, k, &mut self.queue);
        self.process_events(vm);
    }

    /// Sends a key release event
    pub fn released(&mut self, vm: &mut Uxn, k: Key) {
        self.controller.released(vm, k, &mut self.queue);
        self.process_events(vm);
    }

    /// Sends a mouse state snapshot
    pub fn mouse(&mut self, vm: &mut Uxn, state: MouseState) {
        self.mouse.update(vm, state, &mut self.queue);
        self.process_events(vm);
    }

    /// Returns the current output state of the system
    ///
    /// This is not idempotent; the output is taken from various accumulators
    /// and will be empty if this is called multiple times.
    #[must_use]
    pub fn output(&mut self, _vm: &Uxn) -> Output {
        Output {
            stdout: self.console.stdout(),
            stderr: self.console.stderr(),
            exit: self.system.exit(),
        }
    }

    fn process_events(&mut self, vm: &mut Uxn) {
        // Borrow the event queue, so we can reuse the allocation
        let mut queue = std::mem::take(&mut self.queue);
        for e in queue.iter() {
            if let Some(d) = e.data {
                vm.write_dev_mem(d.addr, d.value);
            }
            vm.evaluate(self, e.vector);
            if let Some(d) = e.data {
                if d.clear {
                    vm.write_dev_mem(d.addr, 0);
                }
            }
        }
        // Replace self.queue, reusing the allocation
        queue.clear();
        self.queue = queue;
    }
}
