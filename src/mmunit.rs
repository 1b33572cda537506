// The memory management unit: every CPU access passes through here and is routed to the owning device. The MMU also
// enforces the hardware interlocks: VRAM is unreadable while the PPU transfers a line (mode 3), OAM is locked during
// modes 2 and 3, and a running OAM DMA locks the CPU out of everything but HRAM. The interlocks can be relaxed for
// badly behaved ROMs, but they are on by default.
use super::apu::Apu;
use super::cartridge::Cartridge;
use super::gpu::Gpu;
use super::intf::Intf;
use super::joypad::Joypad;
use super::memory::Memory;
use super::serial::Serial;
use super::timer::Timer;
use std::cell::RefCell;
use std::rc::Rc;

// dmg_boot.bin from https://gbdev.gg8.se/files/roms/bootroms/
// Mapped over 0000-00FF until the first non-zero write to FF50.
const BOOT_ROM: [u8; 256] = [
    0x31, 0xfe, 0xff, 0xaf, 0x21, 0xff, 0x9f, 0x32, 0xcb, 0x7c, 0x20, 0xfb, 0x21, 0x26, 0xff, 0x0e, 0x11, 0x3e, 0x80,
    0x32, 0xe2, 0x0c, 0x3e, 0xf3, 0xe2, 0x32, 0x3e, 0x77, 0x77, 0x3e, 0xfc, 0xe0, 0x47, 0x11, 0x04, 0x01, 0x21, 0x10,
    0x80, 0x1a, 0xcd, 0x95, 0x00, 0xcd, 0x96, 0x00, 0x13, 0x7b, 0xfe, 0x34, 0x20, 0xf3, 0x11, 0xd8, 0x00, 0x06, 0x08,
    0x1a, 0x13, 0x22, 0x23, 0x05, 0x20, 0xf9, 0x3e, 0x19, 0xea, 0x10, 0x99, 0x21, 0x2f, 0x99, 0x0e, 0x0c, 0x3d, 0x28,
    0x08, 0x32, 0x0d, 0x20, 0xf9, 0x2e, 0x0f, 0x18, 0xf3, 0x67, 0x3e, 0x64, 0x57, 0xe0, 0x42, 0x3e, 0x91, 0xe0, 0x40,
    0x04, 0x1e, 0x02, 0x0e, 0x0c, 0xf0, 0x44, 0xfe, 0x90, 0x20, 0xfa, 0x0d, 0x20, 0xf7, 0x1d, 0x20, 0xf2, 0x0e, 0x13,
    0x24, 0x7c, 0x1e, 0x83, 0xfe, 0x62, 0x28, 0x06, 0x1e, 0xc1, 0xfe, 0x64, 0x20, 0x06, 0x7b, 0xe2, 0x0c, 0x3e, 0x87,
    0xe2, 0xf0, 0x42, 0x90, 0xe0, 0x42, 0x15, 0x20, 0xd2, 0x05, 0x20, 0x4f, 0x16, 0x20, 0x18, 0xcb, 0x4f, 0x06, 0x04,
    0xc5, 0xcb, 0x11, 0x17, 0xc1, 0xcb, 0x11, 0x17, 0x05, 0x20, 0xf5, 0x22, 0x23, 0x22, 0x23, 0xc9, 0xce, 0xed, 0x66,
    0x66, 0xcc, 0x0d, 0x00, 0x0b, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0c, 0x00, 0x0d, 0x00, 0x08, 0x11, 0x1f, 0x88, 0x89,
    0x00, 0x0e, 0xdc, 0xcc, 0x6e, 0xe6, 0xdd, 0xdd, 0xd9, 0x99, 0xbb, 0xbb, 0x67, 0x63, 0x6e, 0x0e, 0xec, 0xcc, 0xdd,
    0xdc, 0x99, 0x9f, 0xbb, 0xb9, 0x33, 0x3e, 0x3c, 0x42, 0xb9, 0xa5, 0xb9, 0xa5, 0x42, 0x3c, 0x21, 0x04, 0x01, 0x11,
    0xa8, 0x00, 0x1a, 0x13, 0xbe, 0x20, 0xfe, 0x23, 0x7d, 0xfe, 0x34, 0x20, 0xf5, 0x06, 0x19, 0x78, 0x86, 0x23, 0x05,
    0x20, 0xfb, 0x86, 0x20, 0xfe, 0x3e, 0x01, 0xe0, 0x50,
];

pub struct Mmunit {
    pub cartridge: Cartridge,
    pub apu: Apu,
    pub gpu: Gpu,
    pub joypad: Joypad,
    pub serial: Serial,
    pub timer: Timer,
    pub intf: Rc<RefCell<Intf>>,
    inte: u8,
    wram: [u8; 0x2000],
    hram: [u8; 0x7f],
    // FF50 latch; once set the boot ROM stays unmapped for the rest of the run.
    boot_rom_disabled: bool,
    // Enforce the VRAM/OAM/DMA interlocks. Relaxing them trades accuracy for compatibility with ROMs that were
    // developed against lenient emulators.
    strict: bool,
}

impl Mmunit {
    pub fn power_up(cartridge: Cartridge, strict_access_blocks: bool, run_boot_rom: bool) -> Self {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        let mut r = Self {
            cartridge,
            apu: Apu::power_up(),
            gpu: Gpu::power_up(intf.clone()),
            joypad: Joypad::power_up(intf.clone()),
            serial: Serial::power_up(intf.clone()),
            timer: Timer::power_up(intf.clone()),
            intf,
            inte: 0x00,
            wram: [0x00; 0x2000],
            hram: [0x00; 0x7f],
            boot_rom_disabled: !run_boot_rom,
            strict: strict_access_blocks,
        };
        if run_boot_rom {
            return r;
        }
        // The register state the boot ROM leaves behind.
        r.set(0xff05, 0x00);
        r.set(0xff06, 0x00);
        r.set(0xff07, 0x00);
        r.set(0xff10, 0x80);
        r.set(0xff11, 0xbf);
        r.set(0xff12, 0xf3);
        r.set(0xff14, 0xbf);
        r.set(0xff16, 0x3f);
        r.set(0xff17, 0x00);
        r.set(0xff19, 0xbf);
        r.set(0xff1a, 0x7f);
        r.set(0xff1b, 0xff);
        r.set(0xff1c, 0x9f);
        r.set(0xff1e, 0xbf);
        r.set(0xff20, 0xff);
        r.set(0xff21, 0x00);
        r.set(0xff22, 0x00);
        r.set(0xff23, 0xbf);
        r.set(0xff24, 0x77);
        r.set(0xff25, 0xf3);
        r.set(0xff26, 0xf1);
        r.set(0xff40, 0x91);
        r.set(0xff42, 0x00);
        r.set(0xff43, 0x00);
        r.set(0xff45, 0x00);
        r.set(0xff47, 0xfc);
        r.set(0xff48, 0xff);
        r.set(0xff49, 0xff);
        r.set(0xff4a, 0x00);
        r.set(0xff4b, 0x00);
        r
    }

    // Advance every peripheral by one T-cycle, leaves first: cartridge clock, timer, PPU (DMA byte move included),
    // serial, APU sub-counters. The CPU consumes its T-cycle after this, from the motherboard.
    pub fn next(&mut self) {
        self.cartridge.clock();
        self.timer.next();
        self.run_dma();
        self.gpu.next();
        self.serial.next();
        self.apu.lfsr_cycle();
    }

    // The running OAM DMA moves one byte per T-cycle. Its reads go straight to the devices, bypassing the CPU-side
    // interlocks: the engine must win against its own lockout.
    fn run_dma(&mut self) {
        if self.gpu.dma_running == 0 {
            return;
        }
        let offset = self.gpu.dma_offset;
        let value = self.get_raw(self.gpu.dma_src.wrapping_add(u16::from(offset)));
        rog::debugln!("mmu: dma transfer {:#06x} to oam {:#04x}", self.gpu.dma_src + u16::from(offset), offset);
        self.gpu.set_oam(offset, value);
        self.gpu.dma_offset += 1;
        self.gpu.dma_running -= 1;
    }

    fn oam_blocked(&self) -> bool {
        self.strict && (self.gpu.dma_active() || self.gpu.mode() == 2 || self.gpu.mode() == 3)
    }

    fn vram_blocked(&self) -> bool {
        self.strict && self.gpu.mode() == 3
    }

    // Raw decode without any interlock, used by the DMA engine.
    fn get_raw(&self, a: u16) -> u8 {
        match a {
            0x0000..=0x00ff if !self.boot_rom_disabled => BOOT_ROM[a as usize],
            0x0000..=0x7fff | 0xa000..=0xbfff => self.cartridge.get(a),
            0x8000..=0x9fff | 0xfe00..=0xfe9f => self.gpu.get(a),
            0xc000..=0xdfff => self.wram[a as usize - 0xc000],
            0xe000..=0xfdff => self.wram[a as usize - 0xe000],
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            _ => 0xff,
        }
    }
}

impl Memory for Mmunit {
    fn get(&self, a: u16) -> u8 {
        // A running DMA hogs the bus: only HRAM (and IE) stays reachable.
        if self.strict && self.gpu.dma_active() && !(0xff80..=0xffff).contains(&a) {
            return 0xff;
        }
        match a {
            0x0000..=0x00ff if !self.boot_rom_disabled => BOOT_ROM[a as usize],
            0x0000..=0x7fff => self.cartridge.get(a),
            0x8000..=0x9fff => {
                if self.vram_blocked() {
                    rog::println!("mmu: read {:#06x} while vram is not accessible", a);
                    0xff
                } else {
                    self.gpu.get(a)
                }
            }
            0xa000..=0xbfff => self.cartridge.get(a),
            0xc000..=0xdfff => self.wram[a as usize - 0xc000],
            0xe000..=0xfdff => self.wram[a as usize - 0xe000],
            0xfe00..=0xfe9f => {
                if self.oam_blocked() {
                    rog::println!("mmu: read {:#06x} while oam is not accessible", a);
                    0xff
                } else {
                    self.gpu.get(a)
                }
            }
            0xfea0..=0xfeff => {
                if self.oam_blocked() {
                    0xff
                } else {
                    0x00
                }
            }
            0xff00 => self.joypad.get(a),
            0xff01..=0xff02 => self.serial.get(a),
            0xff04..=0xff07 => self.timer.get(a),
            0xff0f => self.intf.borrow().data | 0xe0,
            0xff10..=0xff3f => self.apu.get(a),
            0xff40..=0xff4b => self.gpu.get(a),
            0xff50 => 0xfe | u8::from(self.boot_rom_disabled),
            0xff80..=0xfffe => self.hram[a as usize - 0xff80],
            0xffff => self.inte,
            _ => {
                rog::println!("mmu: read from unmapped address {:#06x}", a);
                0xff
            }
        }
    }

    fn set(&mut self, a: u16, v: u8) {
        if self.strict && self.gpu.dma_active() && !(0xff80..=0xffff).contains(&a) {
            return;
        }
        match a {
            // ROM is not writable; these are MBC control writes.
            0x0000..=0x7fff => self.cartridge.set(a, v),
            0x8000..=0x9fff => {
                if self.vram_blocked() {
                    rog::println!("mmu: write {:#06x} while vram is not accessible", a);
                } else {
                    self.gpu.set(a, v);
                }
            }
            0xa000..=0xbfff => self.cartridge.set(a, v),
            0xc000..=0xdfff => self.wram[a as usize - 0xc000] = v,
            0xe000..=0xfdff => self.wram[a as usize - 0xe000] = v,
            0xfe00..=0xfe9f => {
                if self.oam_blocked() {
                    rog::println!("mmu: write {:#06x} while oam is not accessible", a);
                } else {
                    self.gpu.set(a, v);
                }
            }
            0xfea0..=0xfeff => {}
            0xff00 => self.joypad.set(a, v),
            0xff01..=0xff02 => self.serial.set(a, v),
            0xff04..=0xff07 => self.timer.set(a, v),
            0xff0f => self.intf.borrow_mut().data = v,
            0xff10..=0xff3f => self.apu.set(a, v),
            0xff46 => self.gpu.start_dma(v),
            0xff40..=0xff45 | 0xff47..=0xff4b => self.gpu.set(a, v),
            0xff50 => {
                // Write-once: any non-zero value unmaps the boot ROM for good.
                if v != 0x00 && !self.boot_rom_disabled {
                    self.boot_rom_disabled = true;
                    rog::debugln!("mmu: boot rom disabled");
                }
            }
            0xff80..=0xfffe => self.hram[a as usize - 0xff80] = v,
            0xffff => self.inte = v,
            _ => rog::println!("mmu: write {:#04x} to unmapped address {:#06x}", v, a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::cartridge::{self, testrom};
    use super::super::memory::Memory;
    use super::Mmunit;

    fn mmu() -> Mmunit {
        let cart = cartridge::power_up(testrom::build(0x00, 0x00, 0x00)).unwrap();
        Mmunit::power_up(cart, true, false)
    }

    #[test]
    fn wram_and_echo_mirror() {
        let mut mmu = mmu();
        mmu.set(0xc123, 0x42);
        assert_eq!(mmu.get(0xe123), 0x42);
        mmu.set(0xfd00, 0x17);
        assert_eq!(mmu.get(0xdd00), 0x17);
    }

    #[test]
    fn hram_readable_in_all_modes() {
        let mut mmu = mmu();
        mmu.set(0xff80, 0x99);
        for _ in 0..500 {
            mmu.next();
            assert_eq!(mmu.get(0xff80), 0x99);
        }
    }

    #[test]
    fn vram_blocked_during_mode_3() {
        let mut mmu = mmu();
        mmu.set(0x8000, 0x42);
        // Advance into mode 3 (dots 80..252 of the first line).
        for _ in 0..100 {
            mmu.next();
        }
        assert_eq!(mmu.gpu.mode(), 3);
        assert_eq!(mmu.get(0x8000), 0xff);
        mmu.set(0x8000, 0x13);
        // Back in hblank the original value is still there.
        for _ in 0..200 {
            mmu.next();
        }
        assert_eq!(mmu.gpu.mode(), 0);
        assert_eq!(mmu.get(0x8000), 0x42);
    }

    #[test]
    fn relaxed_blocks_allow_vram_in_mode_3() {
        let cart = cartridge::power_up(testrom::build(0x00, 0x00, 0x00)).unwrap();
        let mut mmu = Mmunit::power_up(cart, false, false);
        mmu.set(0x8000, 0x42);
        for _ in 0..100 {
            mmu.next();
        }
        assert_eq!(mmu.gpu.mode(), 3);
        assert_eq!(mmu.get(0x8000), 0x42);
    }

    #[test]
    fn dma_copies_160_bytes_and_blocks_the_bus() {
        let mut mmu = mmu();
        for i in 0..0xa0u16 {
            mmu.set(0xc000 + i, i as u8);
        }
        mmu.set(0xff80, 0x55);
        mmu.set(0xff46, 0xc0);
        for _ in 0..160 {
            assert_eq!(mmu.get(0xfe00), 0xff);
            assert_eq!(mmu.get(0xff80), 0x55);
            mmu.next();
        }
        assert!(!mmu.gpu.dma_active());
        // The PPU may hold OAM (mode 2/3) after the transfer; check through the raw view.
        for i in 0..0xa0u16 {
            assert_eq!(mmu.gpu.get(0xfe00 + i), i as u8);
        }
    }

    #[test]
    fn boot_rom_latch_is_write_once() {
        let cart = cartridge::power_up(testrom::build(0x00, 0x00, 0x00)).unwrap();
        let mut mmu = Mmunit::power_up(cart, true, true);
        assert_eq!(mmu.get(0x0000), 0x31);
        assert_eq!(mmu.get(0xff50), 0xfe);
        mmu.set(0xff50, 0x01);
        assert_eq!(mmu.get(0xff50), 0xff);
        // Back to the cartridge's bank 0.
        assert_eq!(mmu.get(0x0000), 0x00);
        mmu.set(0xff50, 0x00);
        assert_eq!(mmu.get(0xff50), 0xff);
    }

    #[test]
    fn if_reads_with_upper_bits_set() {
        let mmu = mmu();
        assert_eq!(mmu.get(0xff0f) & 0xe0, 0xe0);
    }

    #[test]
    fn unmapped_mmio_reads_sentinel() {
        let mut mmu = mmu();
        assert_eq!(mmu.get(0xff7f), 0xff);
        mmu.set(0xff7f, 0x12);
        assert_eq!(mmu.get(0xff7f), 0xff);
    }
}
