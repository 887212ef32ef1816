use chrono::Datelike;
use kestrel_varvara::{Key, MouseState, Varvara};
use uxn::{Uxn, UxnRam, PAGE_PROGRAM};

/// Runs the reset vector of the given ROM against a fresh peripheral set
fn boot<'a>(rom: &[u8], ram: &'a mut UxnRam) -> (Uxn<'a>, Varvara) {
    let mut vm = Uxn::new(rom, ram);
    let mut dev = Varvara::new();
    vm.evaluate(&mut dev, PAGE_PROGRAM);
    (vm, dev)
}

#[test]
fn console_stdout_stderr() {
    // "h" and "i" to the write port, "!" to the error port
    let rom = [
        0x80, b'h', 0x80, 0x18, 0x17, // LIT 'h' LIT 18 DEO
        0x80, b'i', 0x80, 0x18, 0x17, // LIT 'i' LIT 18 DEO
        0x80, b'!', 0x80, 0x19, 0x17, // LIT '!' LIT 19 DEO
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, mut dev) = boot(&rom, &mut ram);
    let out = dev.output(&vm);
    assert_eq!(out.stdout, b"hi");
    assert_eq!(out.stderr, b"!");
    assert_eq!(out.exit, None);

    // accumulators are drained
    let out = dev.output(&vm);
    assert!(out.stdout.is_empty());
    assert!(out.stderr.is_empty());
}

#[test]
fn console_vector_receives_input() {
    // Install a console vector at 0x10b which echoes the read register
    let rom = [
        0x40, 0x01, 0x0b, // LIT2 010b
        0x80, 0x10, // LIT 10
        0x57, // DEO2 (sets the console vector)
        0x00, // BRK
        0x00, 0x00, 0x00, 0x00, // padding up to 0x10b
        0x80, 0x12, 0x16, // LIT 12 DEI (console read register)
        0x80, 0x18, 0x17, // LIT 18 DEO
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&rom, &mut ram);
    dev.console(&mut vm, b'x');
    dev.console(&mut vm, b'y');
    let out = dev.output(&vm);
    assert_eq!(out.stdout, b"xy");
}

#[test]
fn console_without_vector_resumes_after_brk() {
    // No vector is installed; each input byte resumes just past the BRK
    let rom = [
        0x00, // BRK at 0x100
        0x80, 0x12, 0x16, // LIT 12 DEI
        0x80, 0x18, 0x17, // LIT 18 DEO
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&rom, &mut ram);
    assert_eq!(vm.pc(), 0x101);
    dev.console(&mut vm, b'q');
    let out = dev.output(&vm);
    assert_eq!(out.stdout, b"q");
}

#[test]
fn system_exit_stops_the_machine() {
    let rom = [
        0x80, 0x02, 0x80, 0x0f, 0x17, // LIT 02 LIT 0f DEO
        0x80, b'n', 0x80, 0x18, 0x17, // never reached by later vectors
        0x00,
    ];
    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&rom, &mut ram);
    let mut dev = Varvara::new();
    // the reset vector runs to completion, including the trailing prints
    assert!(vm.evaluate(&mut dev, PAGE_PROGRAM));
    let out = dev.output(&vm);
    assert_eq!(out.exit, Some(2));

    // but the halt register now blocks any further evaluation
    assert!(!vm.evaluate(&mut dev, PAGE_PROGRAM));
}

#[test]
fn system_stack_registers() {
    // Push two values, then read the working stack depth from the device
    let rom = [
        0x80, 0xaa, 0x80, 0xbb, // LIT aa LIT bb
        0x80, 0x02, 0x16, // LIT 02 DEI (working stack depth)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, _dev) = boot(&rom, &mut ram);
    assert_eq!(vm.stack().len(), 3);
    assert_eq!(vm.stack().peek_byte_at(0), 2);

    // Writing the register rewinds the stack
    let rom = [
        0x80, 0xaa, 0x80, 0xbb, // LIT aa LIT bb
        0x80, 0x00, 0x80, 0x02, 0x17, // LIT 00 LIT 02 DEO
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, _dev) = boot(&rom, &mut ram);
    assert!(vm.stack().is_empty());
}

#[test]
fn screen_pixel_write() {
    let rom = [
        0x40, 0x00, 0x02, 0x80, 0x28, 0x57, // LIT2 0002 LIT 28 DEO2 (x = 2)
        0x40, 0x00, 0x03, 0x80, 0x2a, 0x57, // LIT2 0003 LIT 2a DEO2 (y = 3)
        0x80, 0x41, 0x80, 0x2e, 0x17, // LIT 41 LIT 2e DEO (fg, color 1)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&rom, &mut ram);
    // foreground color 1 sits in the high half of the pixel nibble
    assert_eq!(dev.ppu().read(2, 3), 0x4);
    let dirty = dev.redraw(&mut vm);
    assert_eq!(dirty, Some((3, 4)));
    // a second frame with no writes has nothing to redraw
    assert_eq!(dev.redraw(&mut vm), None);
}

#[test]
fn screen_pixel_auto_advance() {
    let rom = [
        0x80, 0x01, 0x80, 0x26, 0x17, // LIT 01 LIT 26 DEO (auto x)
        0x80, 0x01, 0x80, 0x2e, 0x17, // pixel, bg color 1
        0x80, 0x01, 0x80, 0x2e, 0x17, // pixel again, one to the right
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (_vm, dev) = boot(&rom, &mut ram);
    assert_eq!(dev.ppu().read(0, 0), 1);
    assert_eq!(dev.ppu().read(1, 0), 1);
    assert_eq!(dev.ppu().read(2, 0), 0);
}

#[test]
fn screen_resize_and_size_readback() {
    let rom = [
        0x40, 0x00, 0x64, 0x80, 0x22, 0x57, // LIT2 0064 LIT 22 DEO2
        0x40, 0x00, 0x50, 0x80, 0x24, 0x57, // LIT2 0050 LIT 24 DEO2
        0x80, 0x22, 0x56, // LIT 22 DEI2 (read width back)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, dev) = boot(&rom, &mut ram);
    assert_eq!(dev.screen_size(), (100, 80));
    assert_eq!(vm.stack().len(), 2);
    assert_eq!(vm.stack().peek_byte_at(1), 0x00);
    assert_eq!(vm.stack().peek_byte_at(0), 0x64);
}

#[test]
fn screen_size_single_byte_read() {
    // A byte-wide DEI of the low half of each size short sees the live
    // value, not a stale register
    let rom = [
        0x80, 0x23, 0x16, // LIT 23 DEI (width low byte)
        0x80, 0x25, 0x16, // LIT 25 DEI (height low byte)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, dev) = boot(&rom, &mut ram);
    let (w, h) = dev.screen_size();
    assert_eq!(vm.stack().len(), 2);
    assert_eq!(vm.stack().peek_byte_at(1), (w & 0xff) as u8);
    assert_eq!(vm.stack().peek_byte_at(0), (h & 0xff) as u8);
}

#[test]
fn screen_sprite_1bpp() {
    // Tile data at 0x0300: a solid top row
    let rom = [
        0x40, 0x03, 0x00, 0x80, 0x2c, 0x57, // LIT2 0300 LIT 2c DEO2 (addr)
        0x80, 0x01, 0x80, 0x2f, 0x17, // LIT 01 LIT 2f DEO (sprite, bg, mode 1)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&rom, &mut ram);
    let mut dev = Varvara::new();
    vm.ram_write_byte(0x0300, 0xff);
    vm.evaluate(&mut dev, PAGE_PROGRAM);
    for x in 0..8 {
        assert_eq!(dev.ppu().read(x, 0), 1);
    }
    assert_eq!(dev.ppu().read(8, 0), 0);
    assert_eq!(dev.ppu().read(0, 1), 0);
}

#[test]
fn datetime_year_and_month() {
    let rom = [
        0x80, 0xb0, 0x56, // LIT b0 DEI2 (year)
        0x80, 0xb2, 0x16, // LIT b2 DEI (month)
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (vm, _dev) = boot(&rom, &mut ram);
    let now = chrono::Local::now();
    assert_eq!(vm.stack().len(), 3);
    let year = u16::from_be_bytes([
        vm.stack().peek_byte_at(2),
        vm.stack().peek_byte_at(1),
    ]);
    assert_eq!(year, now.year() as u16);
    // the month register is 0-based (January is 0)
    assert_eq!(vm.stack().peek_byte_at(0), now.month0() as u8);
}

#[test]
fn controller_key_event() {
    // Vector at 0x10b echoes the key register to stdout
    let rom = [
        0x40, 0x01, 0x0b, // LIT2 010b
        0x80, 0x80, // LIT 80
        0x57, // DEO2 (controller vector)
        0x00, // BRK
        0x00, 0x00, 0x00, 0x00, // padding up to 0x10b
        0x80, 0x83, 0x16, // LIT 83 DEI (key register)
        0x80, 0x18, 0x17, // LIT 18 DEO
        0x00,
    ];
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&rom, &mut ram);
    dev.pressed(&mut vm, Key::Char(b'k'));
    let out = dev.output(&vm);
    assert_eq!(out.stdout, b"k");
    // the key register is cleared once the vector has run
    assert_eq!(vm.read_dev_mem(0x83), 0);
}

#[test]
fn controller_button_bitmask() {
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&[0x00], &mut ram);
    dev.pressed(&mut vm, Key::Up);
    assert_eq!(vm.read_dev_mem(0x82), 1 << 4);
    dev.pressed(&mut vm, Key::Ctrl);
    assert_eq!(vm.read_dev_mem(0x82), (1 << 4) | 1);
    dev.released(&mut vm, Key::Up);
    assert_eq!(vm.read_dev_mem(0x82), 1);
}

#[test]
fn mouse_event_updates_registers() {
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&[0x00], &mut ram);
    dev.mouse(
        &mut vm,
        MouseState {
            pos: (5, 7),
            buttons: 1,
            wheel: 0,
        },
    );
    assert_eq!(vm.read_dev_mem(0x92), 0);
    assert_eq!(vm.read_dev_mem(0x93), 5);
    assert_eq!(vm.read_dev_mem(0x94), 0);
    assert_eq!(vm.read_dev_mem(0x95), 7);
    assert_eq!(vm.read_dev_mem(0x96), 1);
}

#[test]
fn file_write_read_roundtrip() {
    let path = std::env::temp_dir()
        .join(format!("kestrel-file-test-{}", std::process::id()));
    let name = path.to_str().unwrap().as_bytes().to_vec();

    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&[0x00], &mut ram);

    // NUL-terminated filename at 0x9000, payload at 0x8000
    for (i, &b) in name.iter().enumerate() {
        vm.ram_write_byte(0x9000 + i as u16, b);
    }
    vm.ram_write_byte(0x9000 + name.len() as u16, 0);
    let payload = b"hello kestrel";
    for (i, &b) in payload.iter().enumerate() {
        vm.ram_write_byte(0x8000 + i as u16, b);
    }

    // name, length, then the write trigger on the source address low byte
    vm.dev_write(&mut dev, 0xa8, 0x90);
    vm.dev_write(&mut dev, 0xa9, 0x00);
    vm.dev_write(&mut dev, 0xaa, 0x00);
    vm.dev_write(&mut dev, 0xab, payload.len() as u8);
    vm.dev_write(&mut dev, 0xae, 0x80);
    vm.dev_write(&mut dev, 0xaf, 0x00);
    let success = u16::from_be_bytes([
        vm.read_dev_mem(0xa2),
        vm.read_dev_mem(0xa3),
    ]);
    assert_eq!(success, payload.len() as u16);

    // read it back to 0x7000
    vm.dev_write(&mut dev, 0xac, 0x70);
    vm.dev_write(&mut dev, 0xad, 0x00);
    let success = u16::from_be_bytes([
        vm.read_dev_mem(0xa2),
        vm.read_dev_mem(0xa3),
    ]);
    assert_eq!(success, payload.len() as u16);
    for (i, &b) in payload.iter().enumerate() {
        assert_eq!(vm.ram_read_byte(0x7000 + i as u16), b);
    }

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn file_unterminated_name_is_rejected() {
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&[0x00], &mut ram);
    // no NUL anywhere in RAM
    for addr in 0..=0xffffu16 {
        vm.ram_write_byte(addr, b'a');
    }
    vm.dev_write(&mut dev, 0xa8, 0x90);
    vm.dev_write(&mut dev, 0xa9, 0x00);
    vm.dev_write(&mut dev, 0xab, 16);
    vm.dev_write(&mut dev, 0xac, 0x70);
    vm.dev_write(&mut dev, 0xad, 0x00);
    let success = u16::from_be_bytes([
        vm.read_dev_mem(0xa2),
        vm.read_dev_mem(0xa3),
    ]);
    assert_eq!(success, 0);
}

#[test]
fn file_missing_is_nonfatal() {
    let mut ram = UxnRam::new();
    let (mut vm, mut dev) = boot(&[0x00], &mut ram);
    let name = b"does-not-exist-kestrel\0";
    for (i, &b) in name.iter().enumerate() {
        vm.ram_write_byte(0x9000 + i as u16, b);
    }
    vm.dev_write(&mut dev, 0xa8, 0x90);
    vm.dev_write(&mut dev, 0xa9, 0x00);
    vm.dev_write(&mut dev, 0xab, 16);
    vm.dev_write(&mut dev, 0xac, 0x70);
    vm.dev_write(&mut dev, 0xad, 0x00);
    let success = u16::from_be_bytes([
        vm.read_dev_mem(0xa2),
        vm.read_dev_mem(0xa3),
    ]);
    assert_eq!(success, 0);
}
