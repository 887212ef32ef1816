use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kestrel_uxn::{EmptyDevice, Uxn, UxnRam, PAGE_PROGRAM};

/// Counts down from 0xffff to zero, then BRKs
///
/// ```text
/// |0100 #ffff
/// @loop
///   #0001 SUB2
///   DUP2 ORA
///   ,loop JNZ
/// POP2 BRK
/// ```
const COUNTDOWN: [u8; 14] = [
    0x40, 0xff, 0xff, // LIT2 ffff
    0x40, 0x00, 0x01, // LIT2 0001 (@loop)
    0x59, // SUB2
    0x43, // DUP2
    0x1d, // ORA
    0x80, 0xf7, // LIT f7 (-9, back to @loop)
    0x0d, // JNZ
    0x42, // POP2
    0x00, // BRK
];

pub fn dispatch_benchmark(c: &mut Criterion) {
    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&COUNTDOWN, &mut ram);
    let mut dev = EmptyDevice;
    c.bench_function("countdown", |b| {
        b.iter(|| {
            assert!(vm.evaluate(&mut dev, black_box(PAGE_PROGRAM)));
        })
    });
}

criterion_group!(benches, dispatch_benchmark);
criterion_main!(benches);
