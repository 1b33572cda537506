use criterion::{criterion_group, criterion_main, Criterion};
use dmgboy::motherboard::{Config, MotherBoard};

// A minimal header-valid 32 KiB ROM whose entry point spins in a JR loop.
fn empty_rom() -> Vec<u8> {
    const NINTENDO_LOGO: [u8; 48] = [
        0xce, 0xed, 0x66, 0x66, 0xcc, 0x0d, 0x00, 0x0b, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0c, 0x00, 0x0d, 0x00, 0x08,
        0x11, 0x1f, 0x88, 0x89, 0x00, 0x0e, 0xdc, 0xcc, 0x6e, 0xe6, 0xdd, 0xdd, 0xd9, 0x99, 0xbb, 0xbb, 0x67, 0x63,
        0x6e, 0x0e, 0xec, 0xcc, 0xdd, 0xdc, 0x99, 0x9f, 0xbb, 0xb9, 0x33, 0x3e,
    ];
    let mut rom = vec![0x00; 0x8000];
    rom[0x0104..0x0134].copy_from_slice(&NINTENDO_LOGO);
    rom[0x0101] = 0xc3;
    rom[0x0102] = 0x50;
    rom[0x0103] = 0x01;
    rom[0x0150] = 0x18;
    rom[0x0151] = 0xfe;
    rom[0x014b] = 0x33;
    let mut x: u8 = 0;
    for b in &rom[0x0134..0x014d] {
        x = x.wrapping_sub(*b).wrapping_sub(1);
    }
    rom[0x014d] = x;
    rom
}

fn benchmark_step(c: &mut Criterion) {
    let mut mb = MotherBoard::power_up(empty_rom(), Config::default()).unwrap();
    c.bench_function("step_1m_t_cycles", |b| {
        b.iter(|| {
            for _ in 0..1_000_000 {
                mb.step().unwrap();
            }
        })
    });
}

criterion_group!(benches, benchmark_step);
criterion_main!(benches);
