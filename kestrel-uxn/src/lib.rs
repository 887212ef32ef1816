//! A small stack-machine CPU with two stacks, a flat 64 KiB address space,
//! and a 16-port device bus
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
pub mod ppu;

/// Size of a device in port memory
pub const DEV_SIZE: usize = 16;

/// Address at which ROMs are loaded, which doubles as the reset vector
pub const PAGE_PROGRAM: u16 = 0x0100;

/// Faults raised by stack operations during evaluation
///
/// A fault terminates the current [`Uxn::evaluate`] call, but leaves memory
/// and previously-committed device writes intact.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fault {
    /// A pop was attempted on an empty stack
    Underflow,
    /// A push was attempted on a full stack
    Overflow,
    /// `DIV` was called with a divisor of zero
    DivideByZero,
}

impl Fault {
    /// Numeric code for this fault
    pub fn code(&self) -> u8 {
        match self {
            Fault::Underflow => 1,
            Fault::Overflow => 2,
            Fault::DivideByZero => 3,
        }
    }
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Fault::Underflow => write!(f, "underflow"),
            Fault::Overflow => write!(f, "overflow"),
            Fault::DivideByZero => write!(f, "division by zero"),
        }
    }
}

/// Identifies which of the two stacks raised a fault
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StackId {
    /// The working (data) stack
    Working,
    /// The return stack
    Return,
}

impl core::fmt::Display for StackId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            StackId::Working => write!(f, "Working-stack"),
            StackId::Return => write!(f, "Return-stack"),
        }
    }
}

/// Addressing-mode flags, decoded from the top three bits of an instruction
///
/// The decode is a pure function of the instruction byte; the low five bits
/// select one of 32 opcode bodies, which are parameterized by these flags
/// rather than duplicated per width.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Mode {
    /// Swap the source and destination stacks (return stack becomes source)
    pub ret: bool,
    /// All values, addresses, and jump targets are 16-bit
    pub short: bool,
    /// Pops are non-destructive, going through the shadow pointer
    pub keep: bool,
}

impl Mode {
    const RETURN: u8 = 0x20;
    const SHORT: u8 = 0x40;
    const KEEP: u8 = 0x80;

    /// Extracts the three mode flags from an instruction byte
    pub const fn decode(op: u8) -> Self {
        Mode {
            ret: op & Self::RETURN != 0,
            short: op & Self::SHORT != 0,
            keep: op & Self::KEEP != 0,
        }
    }
}

/// One of the machine's two 256-byte stacks
///
/// `ptr` is the next free slot, so it doubles as the element count.  `kptr`
/// shadows it while a keep-mode instruction executes, making pops into
/// peeks.  Once a fault is recorded, every further push or pop on this stack
/// is a no-op until the evaluator reports the fault.
#[derive(Debug)]
pub struct Stack {
    data: [u8; 256],
    ptr: u8,
    kptr: u8,
    fault: Option<Fault>,
}

impl Default for Stack {
    fn default() -> Self {
        Self {
            data: [0u8; 256],
            ptr: 0,
            kptr: 0,
            fault: None,
        }
    }
}

impl Stack {
    /// Snapshots the main pointer into the shadow pointer
    ///
    /// Called once per instruction when keep mode is active.
    fn begin_keep(&mut self) {
        self.kptr = self.ptr;
    }

    fn set_fault(&mut self, f: Fault) {
        if self.fault.is_none() {
            self.fault = Some(f);
        }
    }

    fn push_byte(&mut self, v: u8) {
        if self.fault.is_some() {
            return;
        }
        if self.ptr == 0xff {
            self.fault = Some(Fault::Overflow);
            return;
        }
        self.data[usize::from(self.ptr)] = v;
        self.ptr += 1;
    }

    fn pop_byte(&mut self, keep: bool) -> u8 {
        if self.fault.is_some() {
            return 0;
        }
        let p = if keep { &mut self.kptr } else { &mut self.ptr };
        if *p == 0 {
            self.fault = Some(Fault::Underflow);
            return 0;
        }
        *p -= 1;
        self.data[usize::from(*p)]
    }

    /// Returns the number of stacked bytes
    #[inline]
    pub fn len(&self) -> u8 {
        self.ptr
    }

    /// Checks whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr == 0
    }

    /// Sets the stack pointer directly
    ///
    /// This is the system device's contract for rewinding the stacks.
    #[inline]
    pub fn set_len(&mut self, n: u8) {
        self.ptr = n;
    }

    /// Reads the byte stored at absolute slot `i`
    #[inline]
    pub fn get(&self, i: u8) -> u8 {
        self.data[usize::from(i)]
    }

    /// Reads the byte `offset` slots below the top of the stack
    #[inline]
    pub fn peek_byte_at(&self, offset: u8) -> u8 {
        self.data[usize::from(
            self.ptr.wrapping_sub(1).wrapping_sub(offset),
        )]
    }

    /// Returns the pending fault, if any
    #[inline]
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }
}

/// A value of the width selected by the current instruction
#[derive(Copy, Clone, Debug)]
enum Value {
    Short(u16),
    Byte(u8),
}

impl Value {
    #[inline]
    fn wrapping_add(&self, i: u8) -> Self {
        match self {
            Value::Short(v) => Value::Short(v.wrapping_add(u16::from(i))),
            Value::Byte(v) => Value::Byte(v.wrapping_add(i)),
        }
    }
}

impl From<Value> for u16 {
    fn from(v: Value) -> u16 {
        match v {
            Value::Short(v) => v,
            Value::Byte(v) => u16::from(v),
        }
    }
}

/// View of one stack with the current instruction's mode applied
///
/// Pops route through the shadow pointer when keep mode is set; widths are
/// selected by the short flag.  Op bodies perform all of their pops before
/// any pushes, matching the machine's documented stack effects.
struct StackView<'a> {
    stack: &'a mut Stack,
    mode: Mode,
}

impl<'a> StackView<'a> {
    fn new(stack: &'a mut Stack, mode: Mode) -> Self {
        Self { stack, mode }
    }

    #[inline]
    fn pop(&mut self) -> Value {
        if self.mode.short {
            Value::Short(self.pop_short())
        } else {
            Value::Byte(self.pop_byte())
        }
    }

    #[inline]
    fn pop_byte(&mut self) -> u8 {
        self.stack.pop_byte(self.mode.keep)
    }

    #[inline]
    fn pop_short(&mut self) -> u16 {
        let lo = self.pop_byte();
        let hi = self.pop_byte();
        u16::from_be_bytes([hi, lo])
    }

    #[inline]
    fn push(&mut self, v: Value) {
        match v {
            Value::Short(v) => self.push_short(v),
            Value::Byte(v) => self.push_byte(v),
        }
    }

    #[inline]
    fn push_byte(&mut self, v: u8) {
        self.stack.push_byte(v);
    }

    /// Pushes a short, high byte first
    #[inline]
    fn push_short(&mut self, v: u16) {
        let [hi, lo] = v.to_be_bytes();
        self.push_byte(hi);
        self.push_byte(lo);
    }

    #[inline]
    fn set_fault(&mut self, f: Fault) {
        self.stack.set_fault(f);
    }
}

/// 64 KiB of machine memory, plus the program counter
///
/// Every 16-bit address is valid; arithmetic on addresses wraps modulo
/// 65536, so no out-of-bounds state is representable.
pub struct Memory<'a> {
    data: &'a mut [u8; 65536],
    pc: u16,
}

impl<'a> Memory<'a> {
    fn new(rom: &[u8], data: &'a mut [u8; 65536]) -> Self {
        data.fill(0);
        let n = rom.len().min(data.len() - usize::from(PAGE_PROGRAM));
        data[usize::from(PAGE_PROGRAM)..][..n].copy_from_slice(&rom[..n]);
        Self { data, pc: 0 }
    }

    /// Returns the current program counter
    #[inline]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    #[inline]
    fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    /// Reads the byte at the program counter, then advances it
    #[inline]
    fn next(&mut self) -> u8 {
        let out = self.data[usize::from(self.pc)];
        self.pc = self.pc.wrapping_add(1);
        out
    }

    /// Reads a big-endian word at the program counter, advancing it twice
    #[inline]
    fn next_word(&mut self) -> u16 {
        let hi = self.next();
        let lo = self.next();
        u16::from_be_bytes([hi, lo])
    }

    /// Reads a byte from memory
    #[inline]
    pub fn get(&self, addr: u16) -> u8 {
        self.data[usize::from(addr)]
    }

    /// Writes a byte to memory
    #[inline]
    pub fn set(&mut self, addr: u16, v: u8) {
        self.data[usize::from(addr)] = v;
    }

    /// Reads a big-endian word from memory
    ///
    /// If the address is at the top of RAM, the second byte wraps to 0.
    #[inline]
    pub fn get_word(&self, addr: u16) -> u16 {
        let hi = self.get(addr);
        let lo = self.get(addr.wrapping_add(1));
        u16::from_be_bytes([hi, lo])
    }

    /// Writes a big-endian word to memory
    #[inline]
    pub fn set_word(&mut self, addr: u16, v: u16) {
        let [hi, lo] = v.to_be_bytes();
        self.set(addr, hi);
        self.set(addr.wrapping_add(1), lo);
    }

    #[inline]
    fn read(&self, addr: u16, short: bool) -> Value {
        if short {
            Value::Short(self.get_word(addr))
        } else {
            Value::Byte(self.get(addr))
        }
    }

    #[inline]
    fn write(&mut self, addr: u16, v: Value) {
        match v {
            Value::Short(v) => self.set_word(addr, v),
            Value::Byte(v) => self.set(addr, v),
        }
    }
}

/// The virtual machine itself
pub struct Uxn<'a> {
    /// Machine memory and program counter
    ram: Memory<'a>,
    /// 256-byte working stack
    wst: Stack,
    /// 256-byte return stack
    rst: Stack,
    /// Device port memory, 16 ports of 16 bytes each
    dev: [u8; 256],
}

macro_rules! op_cmp {
    ($vm:ident, $m:ident, $f:expr) => {{
        let mut s = $vm.src_view($m);
        #[allow(clippy::redundant_closure_call)]
        let v = if $m.short {
            let a = s.pop_short();
            let b = s.pop_short();
            ($f)(b, a)
        } else {
            let a = s.pop_byte();
            let b = s.pop_byte();
            ($f)(b, a)
        };
        s.push_byte(v as u8);
    }};
}

macro_rules! op_bin {
    ($vm:ident, $m:ident, $f:expr) => {{
        let mut s = $vm.src_view($m);
        if $m.short {
            let a = s.pop_short();
            let b = s.pop_short();
            let f: fn(u16, u16) -> u16 = $f;
            s.push_short(f(b, a));
        } else {
            let a = s.pop_byte();
            let b = s.pop_byte();
            let f: fn(u8, u8) -> u8 = $f;
            s.push_byte(f(b, a));
        }
    }};
}

impl<'a> Uxn<'a> {
    /// Builds a new machine, loading the given ROM at [`PAGE_PROGRAM`]
    ///
    /// Memory below and beyond the ROM image is zeroed.  A ROM larger than
    /// the remaining address space is truncated.
    pub fn new<'b>(rom: &'b [u8], ram: &'a mut [u8; 65536]) -> Self {
        Self {
            ram: Memory::new(rom, ram),
            wst: Stack::default(),
            rst: Stack::default(),
            dev: [0u8; 256],
        }
    }

    /// Returns the current program counter
    ///
    /// After a BRK this is the address just past it, which lets an embedding
    /// resume execution where the last vector left off.
    #[inline]
    pub fn pc(&self) -> u16 {
        self.ram.pc()
    }

    /// Reads a byte from RAM
    #[inline]
    pub fn ram_read_byte(&self, addr: u16) -> u8 {
        self.ram.get(addr)
    }

    /// Writes a byte to RAM
    #[inline]
    pub fn ram_write_byte(&mut self, addr: u16, v: u8) {
        self.ram.set(addr, v);
    }

    /// Reads a big-endian word from RAM
    #[inline]
    pub fn ram_read_word(&self, addr: u16) -> u16 {
        self.ram.get_word(addr)
    }

    /// Writes a big-endian word to RAM
    #[inline]
    pub fn ram_write_word(&mut self, addr: u16, v: u16) {
        self.ram.set_word(addr, v);
    }

    /// Shared borrow of the working stack
    #[inline]
    pub fn stack(&self) -> &Stack {
        &self.wst
    }

    /// Mutable borrow of the working stack
    #[inline]
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.wst
    }

    /// Shared borrow of the return stack
    #[inline]
    pub fn ret(&self) -> &Stack {
        &self.rst
    }

    /// Mutable borrow of the return stack
    #[inline]
    pub fn ret_mut(&mut self) -> &mut Stack {
        &mut self.rst
    }

    #[inline]
    fn check_dev_size<D: Ports>() {
        struct AssertDevSize<D>(D);
        impl<D> AssertDevSize<D> {
            const ASSERT: () = if core::mem::size_of::<D>() != DEV_SIZE {
                panic!("dev must be 16 bytes");
            };
        }
        AssertDevSize::<D>::ASSERT
    }

    /// Converts raw port memory into a [`Ports`] object
    #[inline]
    pub fn dev<D: Ports>(&self) -> &D {
        self.dev_at(D::BASE)
    }

    /// Returns a reference to a device located at `pos`
    #[inline]
    pub fn dev_at<D: Ports>(&self, pos: u8) -> &D {
        Self::check_dev_size::<D>();
        D::ref_from(&self.dev[pos as usize..][..DEV_SIZE]).unwrap()
    }

    /// Returns a mutable reference to a device located at `pos`
    #[inline]
    pub fn dev_mut_at<D: Ports>(&mut self, pos: u8) -> &mut D {
        Self::check_dev_size::<D>();
        D::mut_from(&mut self.dev[pos as usize..][..DEV_SIZE]).unwrap()
    }

    /// Returns a mutable reference to the given [`Ports`] object
    #[inline]
    pub fn dev_mut<D: Ports>(&mut self) -> &mut D {
        self.dev_mut_at(D::BASE)
    }

    /// Writes to the given address in device port memory, without
    /// invoking the device
    #[inline]
    pub fn write_dev_mem(&mut self, addr: u8, value: u8) {
        self.dev[usize::from(addr)] = value;
    }

    /// Reads the given address in device port memory, without invoking the
    /// device
    #[inline]
    pub fn read_dev_mem(&self, addr: u8) -> u8 {
        self.dev[usize::from(addr)]
    }

    /// Performs a device read at the given bus address
    ///
    /// The device's [`Device::dei`] hook runs *before* the register value is
    /// read, so it may compute the value on demand.
    #[inline]
    pub fn dev_read<D: Device>(&mut self, dev: &mut D, addr: u8) -> u8 {
        dev.dei(self, addr);
        self.dev[usize::from(addr)]
    }

    /// Performs a device write at the given bus address
    ///
    /// The value is stored into the register array *before* the device's
    /// [`Device::deo`] hook runs, so the device observes the updated register
    /// when deciding on side effects.
    #[inline]
    pub fn dev_write<D: Device>(&mut self, dev: &mut D, addr: u8, value: u8) {
        self.dev[usize::from(addr)] = value;
        dev.deo(self, addr);
    }

    #[inline]
    fn src_view(&mut self, m: Mode) -> StackView {
        let stack = if m.ret { &mut self.rst } else { &mut self.wst };
        StackView::new(stack, m)
    }

    #[inline]
    fn dst_view(&mut self, m: Mode) -> StackView {
        let stack = if m.ret { &mut self.wst } else { &mut self.rst };
        StackView::new(stack, m)
    }

    /// Runs the machine from the given vector until BRK or a fault
    ///
    /// Returns `false` immediately, without touching machine state, if the
    /// vector is zero or the system device's halt register (`dev[0x0f]`) is
    /// set.  Otherwise, returns `true` on a clean BRK and `false` on a
    /// fault; faults are reported through [`Device::halt`] with `pc` left at
    /// the post-fault position.
    pub fn evaluate<D: Device>(&mut self, dev: &mut D, vector: u16) -> bool {
        if vector == 0 || self.dev[0x0f] != 0 {
            return false;
        }
        self.ram.set_pc(vector);
        if self.wst.ptr > 0xf8 {
            self.wst.ptr = 0xf8;
        }
        loop {
            let op = self.ram.next();
            if op == 0 {
                return true;
            }
            let m = Mode::decode(op);
            if m.keep {
                if m.ret {
                    self.rst.begin_keep();
                } else {
                    self.wst.begin_keep();
                }
            }
            self.step(dev, op, m);
            let fault = self
                .wst
                .fault()
                .map(|f| (StackId::Working, f))
                .or_else(|| self.rst.fault().map(|f| (StackId::Return, f)));
            if let Some((stack, f)) = fault {
                self.wst.take_fault();
                self.rst.take_fault();
                dev.halt(self, f, stack, op);
                return false;
            }
        }
    }

    /// Executes a single opcode body
    fn step<D: Device>(&mut self, dev: &mut D, op: u8, m: Mode) {
        match op & 0x1f {
            0x00 => op::lit(self, m),
            0x01 => op::inc(self, m),
            0x02 => op::pop(self, m),
            0x03 => op::dup(self, m),
            0x04 => op::nip(self, m),
            0x05 => op::swp(self, m),
            0x06 => op::ovr(self, m),
            0x07 => op::rot(self, m),
            0x08 => op::equ(self, m),
            0x09 => op::neq(self, m),
            0x0a => op::gth(self, m),
            0x0b => op::lth(self, m),
            0x0c => op::jmp(self, m),
            0x0d => op::jnz(self, m),
            0x0e => op::jsr(self, m),
            0x0f => op::sth(self, m),
            0x10 => op::ldz(self, m),
            0x11 => op::stz(self, m),
            0x12 => op::ldr(self, m),
            0x13 => op::str(self, m),
            0x14 => op::lda(self, m),
            0x15 => op::sta(self, m),
            0x16 => op::dei(self, dev, m),
            0x17 => op::deo(self, dev, m),
            0x18 => op::add(self, m),
            0x19 => op::sub(self, m),
            0x1a => op::mul(self, m),
            0x1b => op::div(self, m),
            0x1c => op::and(self, m),
            0x1d => op::ora(self, m),
            0x1e => op::eor(self, m),
            0x1f => op::sft(self, m),
            _ => unreachable!(),
        }
    }
}

mod op {
    use super::*;

    /// Literal
    ///
    /// Pushes the next value in memory and advances the program counter past
    /// it.  A bare `0x00` is BRK, so an encoded LIT always carries at least
    /// one mode bit.
    pub fn lit(vm: &mut Uxn, m: Mode) {
        if m.short {
            let v = vm.ram.next_word();
            vm.src_view(m).push_short(v);
        } else {
            let v = vm.ram.next();
            vm.src_view(m).push_byte(v);
        }
    }

    /// Increment
    ///
    /// ```text
    /// INC a -- a+1
    /// ```
    pub fn inc(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let v = s.pop();
        s.push(v.wrapping_add(1));
    }

    /// Pop
    ///
    /// ```text
    /// POP a --
    /// ```
    pub fn pop(vm: &mut Uxn, m: Mode) {
        vm.src_view(m).pop();
    }

    /// Duplicate
    ///
    /// ```text
    /// DUP a -- a a
    /// ```
    pub fn dup(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let v = s.pop();
        s.push(v);
        s.push(v);
    }

    /// Nip
    ///
    /// ```text
    /// NIP a b -- b
    /// ```
    pub fn nip(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let v = s.pop();
        let _ = s.pop();
        s.push(v);
    }

    /// Swap
    ///
    /// ```text
    /// SWP a b -- b a
    /// ```
    pub fn swp(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let b = s.pop();
        let a = s.pop();
        s.push(b);
        s.push(a);
    }

    /// Over
    ///
    /// ```text
    /// OVR a b -- a b a
    /// ```
    pub fn ovr(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let b = s.pop();
        let a = s.pop();
        s.push(a);
        s.push(b);
        s.push(a);
    }

    /// Rotate
    ///
    /// ```text
    /// ROT a b c -- b c a
    /// ```
    pub fn rot(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let c = s.pop();
        let b = s.pop();
        let a = s.pop();
        s.push(b);
        s.push(c);
        s.push(a);
    }

    /// Equal
    ///
    /// ```text
    /// EQU a b -- bool8
    /// ```
    pub fn equ(vm: &mut Uxn, m: Mode) {
        op_cmp!(vm, m, |a, b| a == b);
    }

    /// Not Equal
    ///
    /// ```text
    /// NEQ a b -- bool8
    /// ```
    pub fn neq(vm: &mut Uxn, m: Mode) {
        op_cmp!(vm, m, |a, b| a != b);
    }

    /// Greater Than
    ///
    /// ```text
    /// GTH a b -- bool8
    /// ```
    pub fn gth(vm: &mut Uxn, m: Mode) {
        op_cmp!(vm, m, |a, b| a > b);
    }

    /// Lesser Than
    ///
    /// ```text
    /// LTH a b -- bool8
    /// ```
    pub fn lth(vm: &mut Uxn, m: Mode) {
        op_cmp!(vm, m, |a, b| a < b);
    }

    /// Jump
    ///
    /// Moves the program counter by the signed byte at the top of the stack,
    /// or to an absolute address in short mode.
    pub fn jmp(vm: &mut Uxn, m: Mode) {
        if m.short {
            let t = vm.src_view(m).pop_short();
            vm.ram.set_pc(t);
        } else {
            let offset = vm.src_view(m).pop_byte() as i8;
            let pc = vm.ram.pc().wrapping_add_signed(i16::from(offset));
            vm.ram.set_pc(pc);
        }
    }

    /// Jump Non-Zero
    ///
    /// Pops a jump target (mode width), then a byte condition; jumps if the
    /// condition is not zero.
    pub fn jnz(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        if m.short {
            let t = s.pop_short();
            let cond = s.pop_byte();
            if cond != 0 {
                vm.ram.set_pc(t);
            }
        } else {
            let offset = s.pop_byte() as i8;
            let cond = s.pop_byte();
            if cond != 0 {
                let pc = vm.ram.pc().wrapping_add_signed(i16::from(offset));
                vm.ram.set_pc(pc);
            }
        }
    }

    /// Jump Stash Return
    ///
    /// Pushes the pre-jump program counter (as a short) onto the destination
    /// stack, then jumps as JMP does.
    pub fn jsr(vm: &mut Uxn, m: Mode) {
        if m.short {
            let pc = vm.ram.pc();
            vm.dst_view(m).push_short(pc);
            let t = vm.src_view(m).pop_short();
            vm.ram.set_pc(t);
        } else {
            let offset = vm.src_view(m).pop_byte() as i8;
            let pc = vm.ram.pc();
            vm.dst_view(m).push_short(pc);
            vm.ram.set_pc(pc.wrapping_add_signed(i16::from(offset)));
        }
    }

    /// Stash
    ///
    /// ```text
    /// STH a -- | a
    /// ```
    ///
    /// Moves the top of the source stack to the destination stack.  In
    /// return mode the stacks are exchanged, so the value moves back.
    pub fn sth(vm: &mut Uxn, m: Mode) {
        let v = vm.src_view(m).pop();
        vm.dst_view(m).push(v);
    }

    /// Load Zero-Page
    ///
    /// ```text
    /// LDZ addr8 -- value
    /// ```
    pub fn ldz(vm: &mut Uxn, m: Mode) {
        let addr = vm.src_view(m).pop_byte();
        let v = vm.ram.read(u16::from(addr), m.short);
        vm.src_view(m).push(v);
    }

    /// Store Zero-Page
    ///
    /// ```text
    /// STZ val addr8 --
    /// ```
    pub fn stz(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let addr = s.pop_byte();
        let v = s.pop();
        vm.ram.write(u16::from(addr), v);
    }

    /// Load Relative
    ///
    /// ```text
    /// LDR addr8 -- value
    /// ```
    ///
    /// The offset is a signed byte relative to the current program counter.
    pub fn ldr(vm: &mut Uxn, m: Mode) {
        let offset = vm.src_view(m).pop_byte() as i8;
        let addr = vm.ram.pc().wrapping_add_signed(i16::from(offset));
        let v = vm.ram.read(addr, m.short);
        vm.src_view(m).push(v);
    }

    /// Store Relative
    ///
    /// ```text
    /// STR val addr8 --
    /// ```
    pub fn str(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let offset = s.pop_byte() as i8;
        let v = s.pop();
        let addr = vm.ram.pc().wrapping_add_signed(i16::from(offset));
        vm.ram.write(addr, v);
    }

    /// Load Absolute
    ///
    /// ```text
    /// LDA addr16 -- value
    /// ```
    pub fn lda(vm: &mut Uxn, m: Mode) {
        let addr = vm.src_view(m).pop_short();
        let v = vm.ram.read(addr, m.short);
        vm.src_view(m).push(v);
    }

    /// Store Absolute
    ///
    /// ```text
    /// STA val addr16 --
    /// ```
    pub fn sta(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let addr = s.pop_short();
        let v = s.pop();
        vm.ram.write(addr, v);
    }

    /// Device Input
    ///
    /// ```text
    /// DEI device8 -- value
    /// ```
    ///
    /// Short-mode reads perform two byte reads, high byte first, staying
    /// within the addressed port.
    pub fn dei<D: Device>(vm: &mut Uxn, dev: &mut D, m: Mode) {
        let i = vm.src_view(m).pop_byte();
        if m.short {
            let j = (i & 0xf0) | (i.wrapping_add(1) & 0x0f);
            let hi = vm.dev_read(dev, i);
            let lo = vm.dev_read(dev, j);
            vm.src_view(m).push_short(u16::from_be_bytes([hi, lo]));
        } else {
            let v = vm.dev_read(dev, i);
            vm.src_view(m).push_byte(v);
        }
    }

    /// Device Output
    ///
    /// ```text
    /// DEO val device8 --
    /// ```
    pub fn deo<D: Device>(vm: &mut Uxn, dev: &mut D, m: Mode) {
        let mut s = vm.src_view(m);
        let i = s.pop_byte();
        match s.pop() {
            Value::Short(v) => {
                let [hi, lo] = v.to_be_bytes();
                let j = (i & 0xf0) | (i.wrapping_add(1) & 0x0f);
                vm.dev_write(dev, i, hi);
                vm.dev_write(dev, j, lo);
            }
            Value::Byte(v) => {
                vm.dev_write(dev, i, v);
            }
        }
    }

    /// Add
    ///
    /// ```text
    /// ADD a b -- a+b
    /// ```
    pub fn add(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a.wrapping_add(b));
    }

    /// Subtract
    ///
    /// ```text
    /// SUB a b -- a-b
    /// ```
    pub fn sub(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a.wrapping_sub(b));
    }

    /// Multiply
    ///
    /// ```text
    /// MUL a b -- a*b
    /// ```
    pub fn mul(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a.wrapping_mul(b));
    }

    /// Divide
    ///
    /// ```text
    /// DIV a b -- a/b
    /// ```
    ///
    /// A divisor of zero raises [`Fault::DivideByZero`] on the active stack
    /// and pushes nothing.
    pub fn div(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        if m.short {
            let a = s.pop_short();
            let b = s.pop_short();
            if a == 0 {
                s.set_fault(Fault::DivideByZero);
            } else {
                s.push_short(b / a);
            }
        } else {
            let a = s.pop_byte();
            let b = s.pop_byte();
            if a == 0 {
                s.set_fault(Fault::DivideByZero);
            } else {
                s.push_byte(b / a);
            }
        }
    }

    /// And
    ///
    /// ```text
    /// AND a b -- a&b
    /// ```
    pub fn and(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a & b);
    }

    /// Or
    ///
    /// ```text
    /// ORA a b -- a|b
    /// ```
    pub fn ora(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a | b);
    }

    /// Exclusive Or
    ///
    /// ```text
    /// EOR a b -- a^b
    /// ```
    pub fn eor(vm: &mut Uxn, m: Mode) {
        op_bin!(vm, m, |a, b| a ^ b);
    }

    /// Shift
    ///
    /// ```text
    /// SFT a shift8 -- c
    /// ```
    ///
    /// The control byte's low nibble is a right-shift count (masked to 3
    /// bits), the high nibble a subsequent left-shift count.
    pub fn sft(vm: &mut Uxn, m: Mode) {
        let mut s = vm.src_view(m);
        let ctrl = s.pop_byte();
        let shr = u32::from(ctrl & 0x7);
        let shl = u32::from((ctrl & 0x70) >> 4);
        if m.short {
            let v = s.pop_short();
            s.push_short(v.wrapping_shr(shr).wrapping_shl(shl));
        } else {
            let v = s.pop_byte();
            s.push_byte(v.wrapping_shr(shr).wrapping_shl(shl));
        }
    }
}

/// Trait for a device attached to the machine's port bus
///
/// The dispatch by port id stays a flat array of registers; behavior is
/// polymorphic over the implementing type, which routes on the target's high
/// nibble.
pub trait Device {
    /// Handles a device read at `target`
    ///
    /// Called *before* the register value is returned to the program, so the
    /// output byte (if any) must be written to device memory here.
    fn dei(&mut self, vm: &mut Uxn, target: u8);

    /// Handles a device write at `target`
    ///
    /// The input byte has already been stored in device memory when this is
    /// called.
    fn deo(&mut self, vm: &mut Uxn, target: u8);

    /// Receives a fault report from the evaluator
    ///
    /// `vm.pc()` is the program counter just past the faulting opcode.  The
    /// default implementation ignores the report.
    fn halt(&mut self, vm: &mut Uxn, fault: Fault, stack: StackId, op: u8) {
        let _ = (vm, fault, stack, op);
    }
}

/// Trait for a type which can be cast to a device ports `struct`
pub trait Ports:
    zerocopy::AsBytes + zerocopy::FromBytes + zerocopy::FromZeroes
{
    /// Base address of the port, of the form `0xA0`
    const BASE: u8;
}

/// Device which does nothing
///
/// Event vectors still work on ports wired to this device, because vectors
/// live in ordinary port memory.
pub struct EmptyDevice;
impl Device for EmptyDevice {
    fn dei(&mut self, _vm: &mut Uxn, _target: u8) {
        // nothing to do here
    }
    fn deo(&mut self, _vm: &mut Uxn, _target: u8) {
        // nothing to do here
    }
}

#[cfg(feature = "alloc")]
mod ram {
    extern crate alloc;
    use alloc::boxed::Box;

    /// Helper type for building a RAM array of the appropriate size
    ///
    /// This is only available if the `"alloc"` feature is enabled
    pub struct UxnRam(Box<[u8; 65536]>);

    impl UxnRam {
        /// Builds a new zero-initialized RAM
        pub fn new() -> Self {
            UxnRam(Box::new([0u8; 65536]))
        }
    }

    impl Default for UxnRam {
        fn default() -> Self {
            Self::new()
        }
    }

    impl core::ops::Deref for UxnRam {
        type Target = [u8; 65536];
        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }
    impl core::ops::DerefMut for UxnRam {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }
}

#[cfg(feature = "alloc")]
pub use ram::UxnRam;

#[cfg(all(feature = "alloc", test))]
mod test {
    use super::*;

    /// Simple parser for textual opcodes
    fn decode_op(s: &str) -> Result<u8, &str> {
        let (s, ret) =
            s.strip_suffix('r').map(|s| (s, true)).unwrap_or((s, false));
        let (s, keep) =
            s.strip_suffix('k').map(|s| (s, true)).unwrap_or((s, false));
        let (s, short) =
            s.strip_suffix('2').map(|s| (s, true)).unwrap_or((s, false));
        let mode =
            ((keep as u8) << 7) | ((short as u8) << 6) | ((ret as u8) << 5);
        let out = match s {
            "BRK" => 0x00,
            "LIT" => mode, // must carry a mode bit to be distinct from BRK

            "INC" => 0x01 | mode,
            "POP" => 0x02 | mode,
            "DUP" => 0x03 | mode,
            "NIP" => 0x04 | mode,
            "SWP" => 0x05 | mode,
            "OVR" => 0x06 | mode,
            "ROT" => 0x07 | mode,
            "EQU" => 0x08 | mode,
            "NEQ" => 0x09 | mode,
            "GTH" => 0x0a | mode,
            "LTH" => 0x0b | mode,
            "JMP" => 0x0c | mode,
            "JNZ" => 0x0d | mode,
            "JSR" => 0x0e | mode,
            "STH" => 0x0f | mode,
            "LDZ" => 0x10 | mode,
            "STZ" => 0x11 | mode,
            "LDR" => 0x12 | mode,
            "STR" => 0x13 | mode,
            "LDA" => 0x14 | mode,
            "STA" => 0x15 | mode,
            "DEI" => 0x16 | mode,
            "DEO" => 0x17 | mode,
            "ADD" => 0x18 | mode,
            "SUB" => 0x19 | mode,
            "MUL" => 0x1a | mode,
            "DIV" => 0x1b | mode,
            "AND" => 0x1c | mode,
            "ORA" => 0x1d | mode,
            "EOR" => 0x1e | mode,
            "SFT" => 0x1f | mode,
            _ => return Err(s),
        };
        Ok(out)
    }

    /// Executes a single opcode against a fresh machine
    fn exec(vm: &mut Uxn, op: u8) {
        let m = Mode::decode(op);
        if m.keep {
            if m.ret {
                vm.rst.begin_keep();
            } else {
                vm.wst.begin_keep();
            }
        }
        vm.step(&mut EmptyDevice, op, m);
    }

    fn parse_and_test(s: &str) {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        let mut iter = s.split_whitespace();
        let mut op = None;
        while let Some(i) = iter.next() {
            if let Some(s) = i.strip_prefix('#') {
                match s.len() {
                    2 => {
                        let v = u8::from_str_radix(s, 16).unwrap();
                        vm.wst.push_byte(v);
                    }
                    4 => {
                        let v = u16::from_str_radix(s, 16).unwrap();
                        let [hi, lo] = v.to_be_bytes();
                        vm.wst.push_byte(hi);
                        vm.wst.push_byte(lo);
                    }
                    _ => panic!("invalid length for literal: {i:?}"),
                }
                continue;
            } else if i == "(" {
                let mut expected: Vec<u8> = vec![];
                for s in iter.by_ref() {
                    if s == ")" {
                        break;
                    } else {
                        expected.push(u8::from_str_radix(s, 16).unwrap());
                    }
                }
                exec(&mut vm, op.unwrap());
                assert_eq!(vm.wst.fault(), None, "fault while executing {s:?}");
                let mut actual = vec![];
                while !vm.wst.is_empty() {
                    actual.push(vm.wst.pop_byte(false));
                }
                actual.reverse();
                assert_eq!(
                    actual,
                    expected,
                    "failed to execute {:?}",
                    s.trim()
                );
                break;
            } else {
                op = Some(decode_op(i).unwrap());
            }
        }
    }

    #[test]
    fn opcodes() {
        const TEST_SUITE: &str = "
            #01 INC         ( 02 )
            #0001 INC2      ( 00 02 )
            #0001 INC2k     ( 00 01 00 02 )
            #1234 POP    ( 12 )
            #1234 POP2   ( )
            #1234 POP2k  ( 12 34 )
            #1234 NIP          ( 34 )
            #1234 #5678 NIP2   ( 56 78 )
            #1234 #5678 NIP2k  ( 12 34 56 78 56 78 )
            #1234 SWP          ( 34 12 )
            #1234 SWPk         ( 12 34 34 12 )
            #1234 #5678 SWP2   ( 56 78 12 34 )
            #1234 #5678 SWP2k  ( 12 34 56 78 56 78 12 34 )
            #1234 #56 ROT            ( 34 56 12 )
            #1234 #56 ROTk           ( 12 34 56 34 56 12 )
            #1234 #5678 #9abc ROT2   ( 56 78 9a bc 12 34 )
            #1234 #5678 #9abc ROT2k  ( 12 34 56 78 9a bc 56 78 9a bc 12 34 )
            #1234 DUP   ( 12 34 34 )
            #12 DUPk    ( 12 12 12 )
            #1234 DUP2  ( 12 34 12 34 )
            #1234 OVR          ( 12 34 12 )
            #1234 OVRk         ( 12 34 12 34 12 )
            #1234 #5678 OVR2   ( 12 34 56 78 12 34 )
            #1234 #5678 OVR2k  ( 12 34 56 78 12 34 56 78 12 34 )
            #1212 EQU          ( 01 )
            #1234 EQUk         ( 12 34 00 )
            #abcd #ef01 EQU2   ( 00 )
            #abcd #abcd EQU2k  ( ab cd ab cd 01 )
            #1212 NEQ          ( 00 )
            #1234 NEQk         ( 12 34 01 )
            #abcd #ef01 NEQ2   ( 01 )
            #abcd #abcd NEQ2k  ( ab cd ab cd 00 )
            #1234 GTH          ( 00 )
            #3412 GTHk         ( 34 12 01 )
            #3456 #1234 GTH2   ( 01 )
            #1234 #3456 GTH2k  ( 12 34 34 56 00 )
            #0101 LTH          ( 00 )
            #0100 LTHk         ( 01 00 00 )
            #0001 #0000 LTH2   ( 00 )
            #0001 #0000 LTH2k  ( 00 01 00 00 00 )
            #1a #2e ADD       ( 48 )
            #02 #5d ADDk      ( 02 5d 5f )
            #0001 #0002 ADD2  ( 00 03 )
            #10 #02 DIV       ( 08 )
            #10 #03 DIVk      ( 10 03 05 )
            #34 #10 SFT        ( 68 )
            #34 #01 SFT        ( 1a )
            #04 #11 SFT        ( 04 )
            #34 #33 SFTk       ( 34 33 30 )
            #1248 #34 SFT2k    ( 12 48 34 09 20 )
        ";
        for line in TEST_SUITE.lines() {
            parse_and_test(line);
        }
    }

    #[test]
    fn mode_decode() {
        assert_eq!(Mode::decode(0x01), Mode::default());
        assert_eq!(
            Mode::decode(0x21),
            Mode {
                ret: true,
                ..Mode::default()
            }
        );
        assert_eq!(
            Mode::decode(0x41),
            Mode {
                short: true,
                ..Mode::default()
            }
        );
        assert_eq!(
            Mode::decode(0x81),
            Mode {
                keep: true,
                ..Mode::default()
            }
        );
        assert_eq!(
            Mode::decode(0xe1),
            Mode {
                ret: true,
                short: true,
                keep: true,
            }
        );
    }

    #[test]
    fn push_pop_roundtrip() {
        let mut s = Stack::default();
        for b in 0..=255u8 {
            let before = s.len();
            s.push_byte(b);
            assert_eq!(s.pop_byte(false), b);
            assert_eq!(s.len(), before);
            assert_eq!(s.fault(), None);
        }
    }

    #[test]
    fn stack_overflow() {
        let mut s = Stack::default();
        for b in 0..255u8 {
            s.push_byte(b);
        }
        assert_eq!(s.fault(), None);
        s.push_byte(0xaa);
        assert_eq!(s.fault(), Some(Fault::Overflow));
        // contents must not have changed
        assert_eq!(s.len(), 255);
        assert_eq!(s.peek_byte_at(0), 254);
    }

    #[test]
    fn stack_underflow() {
        let mut s = Stack::default();
        assert_eq!(s.pop_byte(false), 0);
        assert_eq!(s.fault(), Some(Fault::Underflow));
    }

    #[test]
    fn keep_mode_underflow() {
        let mut s = Stack::default();
        s.push_byte(0x12);
        s.begin_keep();
        assert_eq!(s.pop_byte(true), 0x12);
        assert_eq!(s.pop_byte(true), 0);
        assert_eq!(s.fault(), Some(Fault::Underflow));
        // the real pointer is untouched by keep-mode pops
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn divide_by_zero() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        vm.wst.push_byte(0x10);
        vm.wst.push_byte(0x00);
        exec(&mut vm, 0x1b); // DIV
        assert_eq!(vm.wst.fault(), Some(Fault::DivideByZero));
        // the quotient is not pushed
        assert_eq!(vm.wst.len(), 0);
    }

    /// Device that records every fault report
    #[derive(Default)]
    struct FaultLog(Vec<(Fault, StackId, u8, u16)>);
    impl Device for FaultLog {
        fn dei(&mut self, _vm: &mut Uxn, _target: u8) {}
        fn deo(&mut self, _vm: &mut Uxn, _target: u8) {}
        fn halt(&mut self, vm: &mut Uxn, f: Fault, st: StackId, op: u8) {
            self.0.push((f, st, op, vm.pc()));
        }
    }

    #[test]
    fn evaluate_add() {
        // LIT 01 LIT 02 ADD BRK, encoded with the keep bit on the literals
        let rom = [0x80, 0x01, 0x80, 0x02, 0x18, 0x00];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.stack().len(), 1);
        assert_eq!(vm.stack().peek_byte_at(0), 0x03);
    }

    #[test]
    fn oversized_rom_is_truncated() {
        let mut rom = vec![0xab; 0x10000];
        rom[0xfeff] = 0xcd;
        let mut ram = UxnRam::new();
        let vm = Uxn::new(&rom, &mut ram);
        // the last byte that fits lands at the top of memory
        assert_eq!(vm.ram_read_byte(0xffff), 0xcd);
        assert_eq!(vm.ram_read_byte(0x00ff), 0x00);
    }

    #[test]
    fn evaluate_zero_vector() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[0x80, 0x01, 0x00], &mut ram);
        assert!(!vm.evaluate(&mut EmptyDevice, 0));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn evaluate_halt_flag() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[0x80, 0x01, 0x00], &mut ram);
        vm.write_dev_mem(0x0f, 1);
        assert!(!vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn evaluate_underflow_reports_fault() {
        // ADD on an empty stack
        let rom = [0x18, 0x00];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        let mut dev = FaultLog::default();
        assert!(!vm.evaluate(&mut dev, PAGE_PROGRAM));
        assert_eq!(
            dev.0,
            vec![(Fault::Underflow, StackId::Working, 0x18, 0x0101)]
        );
        // the fault is cleared, so the machine can be driven again
        assert!(vm.stack().fault().is_none());
    }

    #[test]
    fn evaluate_clamps_working_stack() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[0x00], &mut ram);
        vm.stack_mut().set_len(0xff);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.stack().len(), 0xf8);
    }

    #[test]
    fn jsr_pushes_return_address() {
        // LIT 05 JSR BRK, starting at 0x100: JSR is fetched at 0x102, so the
        // return address is 0x103 and the target is 0x108
        let rom = [0x80, 0x05, 0x0e, 0x00];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        // put a BRK at the jump target
        vm.ram_write_byte(0x0108, 0x00);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.ret().len(), 2);
        assert_eq!(vm.ret().peek_byte_at(0), 0x03);
        assert_eq!(vm.ret().peek_byte_at(1), 0x01);
        assert_eq!(vm.pc(), 0x0109);
    }

    #[test]
    fn jsr_short_and_return() {
        // LIT2 0108 JSR2 LIT 0a BRK; at 0x108: LIT 0b JMP2r
        let rom = [
            0x40, 0x01, 0x08, 0x4e, 0x80, 0x0a, 0x00, 0x00, // 0x100..
            0x80, 0x0b, 0x6c, // 0x108: LIT 0b JMP2r
        ];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        // subroutine pushed 0b, then we returned and pushed 0a
        assert_eq!(vm.stack().len(), 2);
        assert_eq!(vm.stack().peek_byte_at(1), 0x0b);
        assert_eq!(vm.stack().peek_byte_at(0), 0x0a);
        assert!(vm.ret().is_empty());
    }

    #[test]
    fn relative_load_store() {
        // #ab LIT 02 STR BRK <skip> @cell; then read it back with LDR
        let rom = [
            0x80, 0xab, // LIT ab
            0x80, 0x01, // LIT 01 (offset, cell is 1 past the BRK)
            0x13, // STR -> writes to 0x106
            0x00, // BRK at 0x105
        ];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.ram_read_byte(0x0106), 0xab);
    }

    #[test]
    fn absolute_load_store() {
        // #abcd LIT2 8000 STA2 BRK
        let rom = [
            0x40, 0xab, 0xcd, // LIT2 abcd
            0x40, 0x80, 0x00, // LIT2 8000
            0x55, // STA2
            0x00, // BRK
        ];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.ram_read_word(0x8000), 0xabcd);
    }

    #[test]
    fn zero_page_roundtrip() {
        // #abcd LIT 10 STZ2, then LIT 10 LDZ2
        let rom = [
            0x40, 0xab, 0xcd, // LIT2 abcd
            0x80, 0x10, // LIT 10
            0x51, // STZ2
            0x80, 0x10, // LIT 10
            0x50, // LDZ2
            0x00, // BRK
        ];
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&rom, &mut ram);
        assert!(vm.evaluate(&mut EmptyDevice, PAGE_PROGRAM));
        assert_eq!(vm.ram_read_word(0x0010), 0xabcd);
        assert_eq!(vm.stack().len(), 2);
        assert_eq!(vm.stack().peek_byte_at(1), 0xab);
        assert_eq!(vm.stack().peek_byte_at(0), 0xcd);
    }

    #[test]
    fn sth_return_mode() {
        // LIT 12 STH moves a byte to the return stack; STHr moves it back
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        vm.wst.push_byte(0x12);
        exec(&mut vm, 0x0f); // STH
        assert!(vm.stack().is_empty());
        assert_eq!(vm.ret().peek_byte_at(0), 0x12);
        exec(&mut vm, 0x2f); // STHr
        assert!(vm.ret().is_empty());
        assert_eq!(vm.stack().peek_byte_at(0), 0x12);
    }

    /// Device that logs the register value visible at each hook
    #[derive(Default)]
    struct Probe {
        log: Vec<(u8, u8, bool)>,
    }
    impl Device for Probe {
        fn dei(&mut self, vm: &mut Uxn, target: u8) {
            self.log.push((target, vm.read_dev_mem(target), false));
            // computed on demand, visible to the returned read
            vm.write_dev_mem(target, 0x5a);
        }
        fn deo(&mut self, vm: &mut Uxn, target: u8) {
            self.log.push((target, vm.read_dev_mem(target), true));
        }
    }

    #[test]
    fn device_write_ordering() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        let mut dev = Probe::default();
        vm.dev_write(&mut dev, 0x42, 0x99);
        // the hook observed the already-updated register
        assert_eq!(dev.log, vec![(0x42, 0x99, true)]);
        assert_eq!(vm.read_dev_mem(0x42), 0x99);
    }

    #[test]
    fn device_read_ordering() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        let mut dev = Probe::default();
        // the hook runs first and overwrites the stale value
        vm.write_dev_mem(0x42, 0x01);
        let v = vm.dev_read(&mut dev, 0x42);
        assert_eq!(v, 0x5a);
        assert_eq!(dev.log, vec![(0x42, 0x01, false)]);
    }

    #[test]
    fn dei_deo_short_stays_in_port() {
        let mut ram = UxnRam::new();
        let mut vm = Uxn::new(&[], &mut ram);
        let mut dev = Probe::default();
        vm.wst.push_byte(0xab);
        vm.wst.push_byte(0xcd);
        vm.wst.push_byte(0x4f); // port 4, offset f
        let m = Mode::decode(0x57);
        vm.step(&mut dev, 0x57, m); // DEO2
        // the second write wraps within port 4 rather than entering port 5
        assert_eq!(
            dev.log,
            vec![(0x4f, 0xab, true), (0x40, 0xcd, true)]
        );
    }
}
