// A banked memory container. The cartridge address space exposes one fixed window (ROM bank 0 at 0000-3FFF) and one
// switchable window (ROM bank N at 4000-7FFF, RAM bank at A000-BFFF); the MBC mutates the active indices. Switching
// to an out-of-range bank is rejected and keeps the previous selection, and accesses beyond the active bank's size
// return the 0xFF sentinel, mirroring the open-bus behavior of a real cartridge.
pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

pub struct MemBank {
    banks: Vec<Vec<u8>>,
    pub bank_0: usize,
    pub bank_n: usize,
    pub can_read: bool,
    pub can_write: bool,
}

impl MemBank {
    // Split a ROM stream into 16 KiB banks. ROM is always readable and never writable.
    pub fn rom(data: Vec<u8>) -> Self {
        let mut banks: Vec<Vec<u8>> = data.chunks(ROM_BANK_SIZE).map(|c| c.to_vec()).collect();
        if banks.is_empty() {
            banks.push(vec![0xff; ROM_BANK_SIZE]);
        }
        let bank_n = if banks.len() > 1 { 1 } else { 0 };
        Self { banks, bank_0: 0, bank_n, can_read: true, can_write: false }
    }

    // Cartridge RAM starts disabled; the MBC's enable register opens it up.
    pub fn ram(bank_nb: usize, bank_size: usize) -> Self {
        Self {
            banks: vec![vec![0x00; bank_size]; bank_nb],
            bank_0: 0,
            bank_n: 0,
            can_read: false,
            can_write: false,
        }
    }

    pub fn bank_nb(&self) -> usize {
        self.banks.len()
    }

    pub fn bank_size(&self) -> usize {
        self.banks.first().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty() || self.bank_size() == 0
    }

    pub fn switch_0(&mut self, i: usize) -> bool {
        if i >= self.banks.len() {
            rog::println!("membank: cannot switch window 0 to bank {:#04x} of {:#04x}", i, self.banks.len());
            return false;
        }
        self.bank_0 = i;
        true
    }

    pub fn switch_n(&mut self, i: usize) -> bool {
        if i >= self.banks.len() {
            rog::println!("membank: cannot switch window n to bank {:#04x} of {:#04x}", i, self.banks.len());
            return false;
        }
        self.bank_n = i;
        true
    }

    fn get(&self, bank: usize, offset: usize) -> u8 {
        match self.banks.get(bank).and_then(|b| b.get(offset)) {
            Some(v) => *v,
            None => {
                rog::println!("membank: read past bank {:#04x} at offset {:#06x}", bank, offset);
                0xff
            }
        }
    }

    pub fn get_0(&self, offset: usize) -> u8 {
        self.get(self.bank_0, offset)
    }

    pub fn get_n(&self, offset: usize) -> u8 {
        self.get(self.bank_n, offset)
    }

    pub fn set_n(&mut self, offset: usize, v: u8) {
        let bank = self.bank_n;
        match self.banks.get_mut(bank).and_then(|b| b.get_mut(offset)) {
            Some(slot) => *slot = v,
            None => rog::println!("membank: write past bank {:#04x} at offset {:#06x}", bank, offset),
        }
    }

    // Flat concatenation of every bank in index order, as stored in battery files.
    pub fn dump(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.banks.len() * self.bank_size());
        for bank in &self.banks {
            data.extend_from_slice(bank);
        }
        data
    }

    // Refill every bank from a flat image. Extra trailing bytes are left for the caller (the MBC3 RTC footer).
    pub fn restore(&mut self, data: &[u8]) -> usize {
        let mut offset = 0;
        for bank in self.banks.iter_mut() {
            let len = bank.len();
            bank.copy_from_slice(&data[offset..offset + len]);
            offset += len;
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::{MemBank, RAM_BANK_SIZE, ROM_BANK_SIZE};

    #[test]
    fn rom_splits_into_banks() {
        let mut data = vec![0x11; ROM_BANK_SIZE];
        data.extend(vec![0x22; ROM_BANK_SIZE]);
        data.extend(vec![0x33; ROM_BANK_SIZE]);
        let mut rom = MemBank::rom(data);
        assert_eq!(rom.bank_nb(), 3);
        assert_eq!(rom.get_0(0x0000), 0x11);
        assert_eq!(rom.get_n(0x0000), 0x22);
        assert!(rom.switch_n(2));
        assert_eq!(rom.get_n(0x3fff), 0x33);
    }

    #[test]
    fn out_of_range_switch_keeps_previous_bank() {
        let mut rom = MemBank::rom(vec![0xaa; ROM_BANK_SIZE * 2]);
        assert!(!rom.switch_n(5));
        assert_eq!(rom.bank_n, 1);
    }

    #[test]
    fn read_past_bank_returns_sentinel() {
        let ram = MemBank::ram(1, 0x800);
        assert_eq!(ram.get_n(0x800), 0xff);
        assert_eq!(ram.get_n(0x7ff), 0x00);
    }

    #[test]
    fn dump_restore_roundtrip() {
        let mut ram = MemBank::ram(2, RAM_BANK_SIZE);
        ram.set_n(0x0000, 0x5a);
        ram.switch_n(1);
        ram.set_n(0x1fff, 0xa5);
        let image = ram.dump();
        assert_eq!(image.len(), RAM_BANK_SIZE * 2);

        let mut other = MemBank::ram(2, RAM_BANK_SIZE);
        assert_eq!(other.restore(&image), image.len());
        assert_eq!(other.get_n(0x0000), 0x5a);
        other.switch_n(1);
        assert_eq!(other.get_n(0x1fff), 0xa5);
    }
}
