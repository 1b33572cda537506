// The owned aggregate: one MMU (which owns every peripheral) plus one CPU, advanced one T-cycle at a time. Each
// step runs the peripherals leaves-first and hands the CPU the T-cycle last; the CPU sees interrupt requests one
// cycle after the peripheral raised them because its pending mask is sampled before the peripherals run.
use super::cartridge;
use super::cpu::Cpu;
use super::error::Error;
use super::gpu::{SCREEN_H, SCREEN_W};
use super::joypad::JoypadKey;
use super::memory::Memory;
use super::mmunit::Mmunit;

// Emulation preferences.
pub struct Config {
    // Enforce the VRAM/OAM/DMA interlocks; turning this off reproduces lenient emulators.
    pub strict_access_blocks: bool,
    // Start at 0000h with the boot ROM mapped instead of the post-boot state at 0100h.
    pub run_boot_rom: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { strict_access_blocks: true, run_boot_rom: false }
    }
}

// Host-side display surface. Called on every V-Blank edge with the finished frame of shade indices; this callback
// is the only way pixels leave the core, and it must not reach back into it.
pub trait Screen {
    fn present(&mut self, data: &[[u8; SCREEN_W]; SCREEN_H]);
}

pub struct MotherBoard {
    pub mmu: Mmunit,
    pub cpu: Cpu,
    screen: Option<Box<dyn Screen>>,
}

impl MotherBoard {
    pub fn power_up(rom: Vec<u8>, config: Config) -> Result<Self, Error> {
        let cartridge = cartridge::power_up(rom)?;
        Ok(Self {
            mmu: Mmunit::power_up(cartridge, config.strict_access_blocks, config.run_boot_rom),
            cpu: Cpu::power_up(config.run_boot_rom),
            screen: None,
        })
    }

    pub fn set_screen(&mut self, screen: Box<dyn Screen>) {
        self.screen = Some(screen);
    }

    // Advance the whole machine by one T-cycle. The only fatal outcome is a CPU fault on an illegal opcode; the
    // machine cannot be stepped past it.
    pub fn step(&mut self) -> Result<(), Error> {
        let pending = self.mmu.get(0xffff) & self.mmu.intf.borrow().data & 0x1f;
        self.mmu.next();
        self.cpu.step(&mut self.mmu, pending)?;
        if self.mmu.gpu.updated {
            self.mmu.gpu.updated = false;
            if let Some(screen) = &mut self.screen {
                screen.present(&self.mmu.gpu.data);
            }
        }
        Ok(())
    }

    // Host input, applied between steps; the core never polls.
    pub fn keydown(&mut self, key: JoypadKey) {
        self.mmu.joypad.keydown(key);
    }

    pub fn keyup(&mut self, key: JoypadKey) {
        self.mmu.joypad.keyup(key);
    }

    pub fn romname(&self) -> String {
        self.mmu.cartridge.title()
    }

    // Battery passthrough: the host persists the returned image and feeds it back on the next run. Both are meant
    // to be called while the machine is paused.
    pub fn dump_sav(&self) -> Vec<u8> {
        self.mmu.cartridge.dump_sav()
    }

    pub fn load_sav(&mut self, data: &[u8]) -> Result<(), Error> {
        self.mmu.cartridge.load_sav(data)
    }
}

#[cfg(test)]
mod tests {
    use super::super::cartridge::testrom;
    use super::super::gpu::{SCREEN_H, SCREEN_W};
    use super::super::memory::Memory;
    use super::{Config, MotherBoard, Screen};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine() -> MotherBoard {
        MotherBoard::power_up(testrom::build(0x00, 0x00, 0x00), Config::default()).unwrap()
    }

    struct CountingScreen {
        frames: Rc<RefCell<u32>>,
    }

    impl Screen for CountingScreen {
        fn present(&mut self, _data: &[[u8; SCREEN_W]; SCREEN_H]) {
            *self.frames.borrow_mut() += 1;
        }
    }

    #[test]
    fn present_fires_once_per_frame() {
        let mut mb = machine();
        let frames = Rc::new(RefCell::new(0));
        mb.set_screen(Box::new(CountingScreen { frames: frames.clone() }));
        // The test ROM's entry point is NOPs; two frames of 70224 T-cycles each.
        for _ in 0..70_224 * 2 {
            mb.step().unwrap();
        }
        assert_eq!(*frames.borrow(), 2);
    }

    #[test]
    fn dma_scenario_through_the_whole_machine() {
        let mut mb = machine();
        for i in 0..0xa0u16 {
            mb.mmu.set(0xc000 + i, (0xa0 - i) as u8);
        }
        mb.mmu.set(0xff80, 0x55);
        mb.mmu.set(0xff46, 0xc0);
        for _ in 0..160 {
            assert_eq!(mb.mmu.get(0xfe00), 0xff);
            assert_eq!(mb.mmu.get(0xff80), 0x55);
            mb.step().unwrap();
        }
        assert!(!mb.mmu.gpu.dma_active());
        for i in 0..0xa0u16 {
            assert_eq!(mb.mmu.gpu.get(0xfe00 + i), (0xa0 - i) as u8);
        }
    }

    #[test]
    fn timer_scenario_through_the_whole_machine() {
        // TAC=05h: increment every 16 T-cycles; TIMA wraps through the 4-cycle delay and lands on TMA with the
        // Timer bit raised in IF.
        let mut mb = machine();
        mb.mmu.set(0xff07, 0x05);
        mb.mmu.set(0xff06, 0xa0);
        mb.mmu.set(0xff05, 0xfe);
        for _ in 0..36 {
            mb.step().unwrap();
        }
        assert_eq!(mb.mmu.get(0xff05), 0xa0);
        assert_eq!(mb.mmu.get(0xff0f) & 0x04, 0x04);
    }

    #[test]
    fn romname_comes_from_the_header() {
        assert_eq!(machine().romname(), "TEST");
    }
}
