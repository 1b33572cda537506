// Memory Bank Controllers. As the 16 bit address bus offers only limited space for ROM and RAM addressing, many
// cartridges expand it by bank switching through an MBC chip living in the cartridge. The required MBC type is
// declared by the byte at 0147h of the ROM.
//
// Each variant carries only the control registers of its chip; the banked memory itself lives in the cartridge and
// is re-targeted through MemBank index switches.
//
// Reference:
//   - http://gbdev.gg8.se/wiki/articles/Memory_Bank_Controllers
use super::error::Error;
use std::time::SystemTime;

// One second of T-cycles; the MBC3 RTC advances at this rate.
const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

fn unix_now() -> u64 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

// The MBC3 Clock Counter Registers
//  08h  RTC S   Seconds   0-59
//  09h  RTC M   Minutes   0-59
//  0Ah  RTC H   Hours     0-23
//  0Bh  RTC DL  Lower 8 bits of Day Counter
//  0Ch  RTC DH  Bit 0: Day Counter bit 8, Bit 6: Halt, Bit 7: Day Counter Carry
#[derive(Clone, Copy, Default)]
pub struct RtcRegs {
    pub s: u8,
    pub m: u8,
    pub h: u8,
    pub dl: u8,
    pub dh: u8,
}

impl RtcRegs {
    fn days(&self) -> u16 {
        u16::from(self.dl) | (u16::from(self.dh & 0x01) << 8)
    }

    fn set_days(&mut self, d: u64) {
        self.dl = (d & 0xff) as u8;
        self.dh = (self.dh & !0x01) | ((d >> 8) & 0x01) as u8;
        if d > 0x1ff {
            self.dh |= 0x80;
        }
    }

    fn halted(&self) -> bool {
        self.dh & 0x40 != 0x00
    }
}

pub struct Rtc {
    pub regs: RtcRegs,
    pub latched: RtcRegs,
    // T-cycles since the last whole second.
    pub clocks: u32,
    // Unix timestamp of the last tick, used to re-apply wallclock time on load.
    pub last_tick: u64,
}

impl Rtc {
    pub fn power_up() -> Self {
        Self { regs: RtcRegs::default(), latched: RtcRegs::default(), clocks: 0, last_tick: unix_now() }
    }

    // Advance the clock counters by one second. Counters a game wrote out of range simply wrap through zero.
    fn tick_second(&mut self) {
        self.regs.s = self.regs.s.wrapping_add(1);
        if self.regs.s >= 60 {
            self.regs.s = 0;
            self.regs.m = self.regs.m.wrapping_add(1);
            if self.regs.m >= 60 {
                self.regs.m = 0;
                self.regs.h = self.regs.h.wrapping_add(1);
                if self.regs.h >= 24 {
                    self.regs.h = 0;
                    let days = u64::from(self.regs.days()) + 1;
                    self.regs.set_days(days);
                }
            }
        }
    }

    // One T-cycle. A second elapses every 4194304 calls while the halt bit is clear.
    pub fn clock(&mut self) {
        if self.regs.halted() {
            return;
        }
        self.clocks += 1;
        if self.clocks >= RTC_CYCLES_PER_SECOND {
            self.clocks = 0;
            self.tick_second();
            self.last_tick = unix_now();
        }
    }

    // Copy the live counters into the latched set. The latched copy is what reads observe, so a game can read a
    // stable time while the clock keeps running behind it.
    pub fn latch(&mut self) {
        self.latched.s = self.regs.s & 0x3f;
        self.latched.m = self.regs.m & 0x3f;
        self.latched.h = self.regs.h & 0x1f;
        self.latched.dl = self.regs.dl;
        self.latched.dh = self.regs.dh & 0xc1;
    }

    pub fn get(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.latched.s,
            0x09 => self.latched.m,
            0x0a => self.latched.h,
            0x0b => self.latched.dl,
            0x0c => self.latched.dh,
            _ => {
                rog::println!("rtc: read from invalid register {:#04x}", reg);
                0xff
            }
        }
    }

    pub fn set(&mut self, reg: u8, v: u8) {
        match reg {
            0x08 => self.regs.s = v,
            0x09 => self.regs.m = v,
            0x0a => self.regs.h = v,
            0x0b => self.regs.dl = v,
            0x0c => {
                self.regs.dh = v;
                if self.regs.halted() {
                    self.clocks = 0;
                }
            }
            _ => rog::println!("rtc: write to invalid register {:#04x}", reg),
        }
    }

    // Apply the real seconds elapsed since last_tick. Called when a battery image is restored so the clock keeps
    // running while the emulator is off.
    pub fn catch_up(&mut self) {
        let now = unix_now();
        let elapsed = now.saturating_sub(self.last_tick);
        if elapsed > 0 && !self.regs.halted() {
            let s = u64::from(self.regs.s) + elapsed % 60;
            let m = u64::from(self.regs.m) + elapsed / 60 % 60 + s / 60;
            let h = u64::from(self.regs.h) + elapsed / 3600 % 24 + m / 60;
            let d = u64::from(self.regs.days()) + elapsed / 86400 + h / 24;
            self.regs.s = (s % 60) as u8;
            self.regs.m = (m % 60) as u8;
            self.regs.h = (h % 24) as u8;
            self.regs.set_days(d);
        }
        self.last_tick = now;
    }

    // The battery footer holds ten u32 counters {S, M, H, DL, DH, latched S, M, H, DL, DH} followed by the 64-bit
    // last_tick Unix timestamp, everything little-endian. 48 bytes total.
    pub fn dump(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(48);
        for v in &[
            self.regs.s,
            self.regs.m,
            self.regs.h,
            self.regs.dl,
            self.regs.dh,
            self.latched.s,
            self.latched.m,
            self.latched.h,
            self.latched.dl,
            self.latched.dh,
        ] {
            data.extend_from_slice(&u32::from(*v).to_le_bytes());
        }
        data.extend_from_slice(&self.last_tick.to_le_bytes());
        data
    }

    pub fn restore(&mut self, data: &[u8]) {
        if data.len() < 48 {
            // Footer absence is tolerated; the clock simply starts from now.
            self.last_tick = unix_now();
            return;
        }
        let field = |i: usize| {
            let mut b = [0x00; 4];
            b.copy_from_slice(&data[i * 4..i * 4 + 4]);
            u32::from_le_bytes(b) as u8
        };
        self.regs.s = field(0);
        self.regs.m = field(1);
        self.regs.h = field(2);
        self.regs.dl = field(3);
        self.regs.dh = field(4);
        self.latched.s = field(5);
        self.latched.m = field(6);
        self.latched.h = field(7);
        self.latched.dl = field(8);
        self.latched.dh = field(9);
        let mut b = [0x00; 8];
        b.copy_from_slice(&data[40..48]);
        self.last_tick = u64::from_le_bytes(b);
        self.catch_up();
    }
}

pub enum Mbc {
    None,
    Mbc1 {
        // Low 5 bits of the ROM bank number; the 0x00 -> 0x01 translation has already been applied.
        rom_bank: u8,
        // The 2-bit register at 4000-5FFF, pre-shifted left by 5.
        upper_bits: u8,
        // Mode select at 6000-7FFF: false routes the upper bits to high ROM banks, true to the RAM bank select.
        ram_select: bool,
        large_rom: bool,
        large_ram: bool,
        // Mask derived from the ROM bank count, applied to the 5-bit bank register.
        rom_mask: u8,
    },
    Mbc3 {
        // 0x00-0x03 selects a RAM bank, 0x08-0x0C maps an RTC register at A000-BFFF.
        ram_bank: u8,
        latch_reg: bool,
        rtc: Rtc,
    },
    Mbc5 {
        rom_bank_lo: u8,
        rom_bank_hi: u8,
    },
}

impl Mbc {
    // Select the MBC variant from the cartridge type byte at 0147h. Returns the variant and whether the cartridge
    // carries a battery.
    //
    //  00h  ROM ONLY                 13h  MBC3+RAM+BATTERY
    //  01h  MBC1                     19h  MBC5
    //  02h  MBC1+RAM                 1Ah  MBC5+RAM
    //  03h  MBC1+RAM+BATTERY         1Bh  MBC5+RAM+BATTERY
    //  08h  ROM+RAM                  1Ch  MBC5+RUMBLE
    //  09h  ROM+RAM+BATTERY          1Dh  MBC5+RUMBLE+RAM
    //  0Fh  MBC3+TIMER+BATTERY       1Eh  MBC5+RUMBLE+RAM+BATTERY
    //  10h  MBC3+TIMER+RAM+BATTERY
    //  11h  MBC3
    //  12h  MBC3+RAM
    pub fn from_code(code: u8, rom_banks: usize, ram_bytes: usize) -> Result<(Self, bool), Error> {
        let mbc1 = || Mbc::Mbc1 {
            rom_bank: 0x01,
            upper_bits: 0x00,
            ram_select: false,
            large_rom: rom_banks > 32,
            large_ram: ram_bytes > 8192,
            rom_mask: match rom_banks {
                0..=2 => 0x01,
                3..=4 => 0x03,
                5..=8 => 0x07,
                9..=16 => 0x0f,
                _ => 0x1f,
            },
        };
        let mbc3 = || Mbc::Mbc3 { ram_bank: 0x00, latch_reg: false, rtc: Rtc::power_up() };
        let mbc5 = || Mbc::Mbc5 { rom_bank_lo: 0x01, rom_bank_hi: 0x00 };
        match code {
            0x00 | 0x08 => Ok((Mbc::None, false)),
            0x09 => Ok((Mbc::None, true)),
            0x01 | 0x02 => Ok((mbc1(), false)),
            0x03 => Ok((mbc1(), true)),
            0x11 | 0x12 => Ok((mbc3(), false)),
            0x0f | 0x10 => Ok((mbc3(), true)),
            0x13 => Ok((mbc3(), true)),
            0x19 | 0x1a | 0x1c | 0x1d => Ok((mbc5(), false)),
            0x1b | 0x1e => Ok((mbc5(), true)),
            n => Err(Error::UnsupportedMbc(n)),
        }
    }

    // Per-T-cycle hook; only the MBC3 clock counter uses it.
    pub fn clock(&mut self) {
        if let Mbc::Mbc3 { rtc, .. } = self {
            rtc.clock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Mbc, Rtc};

    #[test]
    fn rtc_second_rollover() {
        let mut rtc = Rtc::power_up();
        rtc.regs.s = 59;
        rtc.regs.m = 59;
        rtc.regs.h = 23;
        rtc.regs.dl = 0xff;
        rtc.clocks = 4_194_303;
        rtc.clock();
        assert_eq!(rtc.regs.s, 0);
        assert_eq!(rtc.regs.m, 0);
        assert_eq!(rtc.regs.h, 0);
        assert_eq!(rtc.regs.dl, 0x00);
        assert_eq!(rtc.regs.dh & 0x01, 0x01);
    }

    #[test]
    fn rtc_day_overflow_sets_carry() {
        let mut rtc = Rtc::power_up();
        rtc.regs.dl = 0xff;
        rtc.regs.dh = 0x01;
        rtc.regs.s = 59;
        rtc.regs.m = 59;
        rtc.regs.h = 23;
        rtc.clocks = 4_194_303;
        rtc.clock();
        assert_eq!(rtc.regs.days(), 0);
        assert_eq!(rtc.regs.dh & 0x80, 0x80);
    }

    #[test]
    fn rtc_halt_stops_ticking() {
        let mut rtc = Rtc::power_up();
        rtc.regs.dh = 0x40;
        rtc.clocks = 4_194_303;
        rtc.clock();
        assert_eq!(rtc.regs.s, 0);
        assert_eq!(rtc.clocks, 4_194_303);
    }

    #[test]
    fn rtc_latch_masks_counters() {
        let mut rtc = Rtc::power_up();
        rtc.regs.s = 0xff;
        rtc.regs.h = 0xff;
        rtc.regs.dh = 0xff;
        rtc.latch();
        assert_eq!(rtc.latched.s, 0x3f);
        assert_eq!(rtc.latched.h, 0x1f);
        assert_eq!(rtc.latched.dh, 0xc1);
    }

    #[test]
    fn rtc_footer_roundtrip() {
        let mut rtc = Rtc::power_up();
        rtc.regs.s = 12;
        rtc.regs.m = 34;
        rtc.regs.h = 5;
        rtc.regs.dl = 0x7b;
        rtc.latch();
        let footer = rtc.dump();
        assert_eq!(footer.len(), 48);

        let mut other = Rtc::power_up();
        other.restore(&footer);
        assert_eq!(other.regs.m, 34);
        assert_eq!(other.latched.dl, 0x7b);
    }

    #[test]
    fn mbc1_mask_follows_rom_size() {
        match Mbc::from_code(0x01, 8, 0).unwrap().0 {
            Mbc::Mbc1 { rom_mask, large_rom, .. } => {
                assert_eq!(rom_mask, 0x07);
                assert!(!large_rom);
            }
            _ => panic!("expected mbc1"),
        }
    }

    #[test]
    fn unsupported_code_is_an_error() {
        assert!(Mbc::from_code(0x20, 2, 0).is_err());
    }
}
