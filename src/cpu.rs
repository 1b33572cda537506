// The chip behind the hardware: the Sharp LR35902, a Z80 subset. The interpreter is T-cycle driven: step() consumes
// exactly one T-cycle, either burning one of the idle cycles left over from the last fetch or fetching and executing
// the next instruction in full. Instruction effects are instantaneous at the fetch cycle; the remaining cost is paid
// out as idle cycles, which is what keeps the cycle_nb accounting instruction-exact.
use super::error::Error;
use super::memory::Memory;
use super::mmunit::Mmunit;
use super::register::Flag::{C, H, N, Z};
use super::register::Register;

// T-cycle cost per opcode. Conditional jumps/calls/returns hold their untaken cost here; the taken surcharge is
// added after the handler ran. Illegal opcodes and the CB prefix (dispatched separately) hold zero.
//  0   1   2   3   4   5   6   7   8   9   a   b   c   d   e   f
#[rustfmt::skip]
const OP_CYCLES: [u32; 256] = [
     4, 12,  8,  8,  4,  4,  8,  4, 20,  8,  8,  8,  4,  4,  8,  4, // 0
     4, 12,  8,  8,  4,  4,  8,  4, 12,  8,  8,  8,  4,  4,  8,  4, // 1
     8, 12,  8,  8,  4,  4,  8,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 2
     8, 12,  8,  8, 12, 12, 12,  4,  8,  8,  8,  8,  4,  4,  8,  4, // 3
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 4
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 5
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 6
     8,  8,  8,  8,  8,  8,  4,  8,  4,  4,  4,  4,  4,  4,  8,  4, // 7
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 8
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // 9
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // a
     4,  4,  4,  4,  4,  4,  8,  4,  4,  4,  4,  4,  4,  4,  8,  4, // b
     8, 12, 12, 16, 12, 16,  8, 16,  8, 16, 12,  0, 12, 24,  8, 16, // c
     8, 12, 12,  0, 12, 16,  8, 16,  8, 16, 12,  0, 12,  0,  8, 16, // d
    12, 12,  8,  0,  0, 16,  8, 16, 16,  4, 16,  0,  0,  0,  8, 16, // e
    12, 12,  8,  4,  0, 16,  8, 16, 12,  8, 16,  4,  0,  0,  8, 16, // f
];

// ISR entry costs 5 machine cycles: two idle, two for the PC push, one for the vector jump.
const ISR_CYCLES: u32 = 20;

// The interrupt master enable. EI does not take effect immediately: the transition to Enabled happens only after
// the instruction following EI has retired, which is what makes an EI / DI pair interrupt-proof.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ime {
    Disabled,
    Enabled,
    EnableScheduled,
}

pub struct Cpu {
    pub reg: Register,
    pub halted: bool,
    // STOP is treated as halt wearing a marker; it additionally resets the timer's divider counter.
    pub stopped: bool,
    pub ime: Ime,
    // Set when HALT ran with IME off and an interrupt pending: the next opcode byte is fetched twice.
    halt_bug: bool,
    // T-cycles left until the next fetch.
    pub idle_cycles: u32,
    // Total T-cycles consumed since power up.
    pub cycle_nb: u64,
    fatal: bool,
}

impl Cpu {
    pub fn power_up(run_boot_rom: bool) -> Self {
        Self {
            reg: if run_boot_rom { Register::power_up_boot() } else { Register::power_up() },
            halted: false,
            stopped: false,
            ime: Ime::Disabled,
            halt_bug: false,
            idle_cycles: 0,
            cycle_nb: 0,
            fatal: false,
        }
    }

    fn imm(&mut self, mem: &mut Mmunit) -> u8 {
        let v = mem.get(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(1);
        v
    }

    fn imm_word(&mut self, mem: &mut Mmunit) -> u16 {
        let v = mem.get_word(self.reg.pc);
        self.reg.pc = self.reg.pc.wrapping_add(2);
        v
    }

    fn stack_push(&mut self, mem: &mut Mmunit, v: u16) {
        self.reg.sp = self.reg.sp.wrapping_sub(2);
        mem.set_word(self.reg.sp, v);
    }

    fn stack_pop(&mut self, mem: &mut Mmunit) -> u16 {
        let r = mem.get_word(self.reg.sp);
        self.reg.sp = self.reg.sp.wrapping_add(2);
        r
    }

    // The 8-bit operand column shared by the LD/ALU/CB families: B, C, D, E, H, L, (HL), A for 0..=7.
    fn read_r8(&mut self, mem: &mut Mmunit, i: u8) -> u8 {
        match i {
            0 => self.reg.b,
            1 => self.reg.c,
            2 => self.reg.d,
            3 => self.reg.e,
            4 => self.reg.h,
            5 => self.reg.l,
            6 => mem.get(self.reg.get_hl()),
            _ => self.reg.a,
        }
    }

    fn write_r8(&mut self, mem: &mut Mmunit, i: u8, v: u8) {
        match i {
            0 => self.reg.b = v,
            1 => self.reg.c = v,
            2 => self.reg.d = v,
            3 => self.reg.e = v,
            4 => self.reg.h = v,
            5 => self.reg.l = v,
            6 => {
                let a = self.reg.get_hl();
                mem.set(a, v)
            }
            _ => self.reg.a = v,
        }
    }

    // Branch conditions NZ, Z, NC, C for 0..=3.
    fn cond(&self, cc: u8) -> bool {
        match cc {
            0 => !self.reg.get_flag(Z),
            1 => self.reg.get_flag(Z),
            2 => !self.reg.get_flag(C),
            _ => self.reg.get_flag(C),
        }
    }
}

// Flag rules for the 8-bit ALU:
//   ADD/ADC: Z from result, N=0, H from bit 3, C from bit 7.
//   SUB/SBC/CP: Z from result, N=1, H/C from the borrows.
//   AND: H=1, others cleared. OR/XOR: everything but Z cleared.
impl Cpu {
    fn alu_add(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_adc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_add(n).wrapping_add(c);
        self.reg.set_flag(C, u16::from(a) + u16::from(n) + u16::from(c) > 0xff);
        self.reg.set_flag(H, (a & 0x0f) + (n & 0x0f) + c > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_sub(&mut self, n: u8) {
        let a = self.reg.a;
        let r = a.wrapping_sub(n);
        self.reg.set_flag(C, u16::from(a) < u16::from(n));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f));
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_sbc(&mut self, n: u8) {
        let a = self.reg.a;
        let c = u8::from(self.reg.get_flag(C));
        let r = a.wrapping_sub(n).wrapping_sub(c);
        self.reg.set_flag(C, u16::from(a) < u16::from(n) + u16::from(c));
        self.reg.set_flag(H, (a & 0x0f) < (n & 0x0f) + c);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_and(&mut self, n: u8) {
        let r = self.reg.a & n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_xor(&mut self, n: u8) {
        let r = self.reg.a ^ n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    fn alu_or(&mut self, n: u8) {
        let r = self.reg.a | n;
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        self.reg.a = r;
    }

    // CP is SUB with the result thrown away.
    fn alu_cp(&mut self, n: u8) {
        let r = self.reg.a;
        self.alu_sub(n);
        self.reg.a = r;
    }

    // INC/DEC leave the carry flag alone.
    fn alu_inc(&mut self, a: u8) -> u8 {
        let r = a.wrapping_add(1);
        self.reg.set_flag(H, (a & 0x0f) + 0x01 > 0x0f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_dec(&mut self, a: u8) -> u8 {
        let r = a.wrapping_sub(1);
        self.reg.set_flag(H, a & 0x0f == 0x00);
        self.reg.set_flag(N, true);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // ADD HL,rr: full 16-bit add. Z untouched, H from bit 11, C from bit 15.
    fn alu_add_hl(&mut self, n: u16) {
        let a = self.reg.get_hl();
        let r = a.wrapping_add(n);
        self.reg.set_flag(C, a > 0xffff - n);
        self.reg.set_flag(H, (a & 0x07ff) + (n & 0x07ff) > 0x07ff);
        self.reg.set_flag(N, false);
        self.reg.set_hl(r);
    }

    // Shared by ADD SP,r8 and LD HL,SP+r8: signed immediate added to SP, H and C computed on the low byte addition.
    fn alu_add_sp_r8(&mut self, mem: &mut Mmunit) -> u16 {
        let a = self.reg.sp;
        let b = i16::from(self.imm(mem) as i8) as u16;
        self.reg.set_flag(C, (a & 0x00ff) + (b & 0x00ff) > 0x00ff);
        self.reg.set_flag(H, (a & 0x000f) + (b & 0x000f) > 0x000f);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, false);
        a.wrapping_add(b)
    }

    // The four RxxA forms at 0x07..0x1f always clear Z; the CB forms set it from the result.
    fn alu_rlc(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = (a << 1) | u8::from(c);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rl(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = (a << 1) | u8::from(self.reg.get_flag(C));
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rrc(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = (a >> 1) | (u8::from(c) << 7);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_rr(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = (a >> 1) | (u8::from(self.reg.get_flag(C)) << 7);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_sla(&mut self, a: u8) -> u8 {
        let c = a & 0x80 != 0x00;
        let r = a << 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    // SRA keeps the sign bit, SRL clears it.
    fn alu_sra(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = (a >> 1) | (a & 0x80);
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_srl(&mut self, a: u8) -> u8 {
        let c = a & 0x01 != 0x00;
        let r = a >> 1;
        self.reg.set_flag(C, c);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_swap(&mut self, a: u8) -> u8 {
        let r = (a >> 4) | (a << 4);
        self.reg.set_flag(C, false);
        self.reg.set_flag(H, false);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, r == 0x00);
        r
    }

    fn alu_bit(&mut self, a: u8, b: u8) {
        self.reg.set_flag(H, true);
        self.reg.set_flag(N, false);
        self.reg.set_flag(Z, a & (1 << b) == 0x00);
    }

    // Decimal adjust A so that the previous ADD/SUB reads as Binary Coded Decimal.
    fn alu_daa(&mut self) {
        let mut a = self.reg.a;
        let mut adjust = if self.reg.get_flag(C) { 0x60 } else { 0x00 };
        if self.reg.get_flag(H) {
            adjust |= 0x06;
        }
        if !self.reg.get_flag(N) {
            if a & 0x0f > 0x09 {
                adjust |= 0x06;
            }
            if a > 0x99 {
                adjust |= 0x60;
            }
            a = a.wrapping_add(adjust);
        } else {
            a = a.wrapping_sub(adjust);
        }
        self.reg.set_flag(C, adjust >= 0x60);
        self.reg.set_flag(H, false);
        self.reg.set_flag(Z, a == 0x00);
        self.reg.a = a;
    }

    fn alu_jr(&mut self, mem: &mut Mmunit) {
        let n = self.imm(mem) as i8;
        self.reg.pc = self.reg.pc.wrapping_add(i16::from(n) as u16);
    }
}

impl Cpu {
    // Advance one T-cycle. The pending mask is IE & IF & 1F as sampled before the peripherals ran this cycle, so an
    // interrupt a peripheral raises at T-cycle k is first seen here at k+1.
    pub fn step(&mut self, mem: &mut Mmunit, pending: u8) -> Result<(), Error> {
        if self.fatal {
            return Err(Error::Faulted);
        }
        self.cycle_nb += 1;
        if self.idle_cycles > 0 {
            self.idle_cycles -= 1;
            return Ok(());
        }

        if self.halted {
            if pending == 0x00 {
                return Ok(());
            }
            // Any enabled pending interrupt wakes the CPU, with or without IME.
            self.halted = false;
            self.stopped = false;
        }

        if self.ime == Ime::Enabled && pending != 0x00 {
            self.isr(mem, pending);
            self.idle_cycles = ISR_CYCLES - 1;
            return Ok(());
        }

        let enable_after = self.ime == Ime::EnableScheduled;
        let cycles = self.ex(mem)?;
        self.idle_cycles = cycles - 1;
        // The EI transition lands only after the following instruction retired.
        if enable_after && self.ime == Ime::EnableScheduled {
            self.ime = Ime::Enabled;
        }
        Ok(())
    }

    // Service the lowest pending interrupt: acknowledge it in IF, drop IME, push PC and jump to the fixed vector.
    fn isr(&mut self, mem: &mut Mmunit, pending: u8) {
        let n = pending.trailing_zeros() as u16;
        rog::debugln!("cpu: isr {:#04x}", 0x0040 + n * 8);
        self.ime = Ime::Disabled;
        mem.intf.borrow_mut().data &= !(1 << n) as u8;
        self.stack_push(mem, self.reg.pc);
        self.reg.pc = 0x0040 + n * 8;
    }

    // Fetch, decode and execute one instruction; returns its full T-cycle cost.
    #[allow(clippy::cognitive_complexity)]
    fn ex(&mut self, mem: &mut Mmunit) -> Result<u32, Error> {
        let pc = self.reg.pc;
        let opcode = self.imm(mem);
        if self.halt_bug {
            // The byte after HALT is read twice: drop this fetch's PC advance.
            self.halt_bug = false;
            self.reg.pc = pc;
        }
        match opcode {
            0x00 => {}
            // LD rr,d16
            0x01 | 0x11 | 0x21 | 0x31 => {
                let v = self.imm_word(mem);
                match opcode {
                    0x01 => self.reg.set_bc(v),
                    0x11 => self.reg.set_de(v),
                    0x21 => self.reg.set_hl(v),
                    _ => self.reg.sp = v,
                }
            }
            0x02 => mem.set(self.reg.get_bc(), self.reg.a),
            0x12 => mem.set(self.reg.get_de(), self.reg.a),
            // LDI/LDD move through (HL) and step HL as a side effect.
            0x22 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x32 => {
                let a = self.reg.get_hl();
                mem.set(a, self.reg.a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            0x0a => self.reg.a = mem.get(self.reg.get_bc()),
            0x1a => self.reg.a = mem.get(self.reg.get_de()),
            0x2a => {
                let a = self.reg.get_hl();
                self.reg.a = mem.get(a);
                self.reg.set_hl(a.wrapping_add(1));
            }
            0x3a => {
                let a = self.reg.get_hl();
                self.reg.a = mem.get(a);
                self.reg.set_hl(a.wrapping_sub(1));
            }
            // INC/DEC rr touch no flags.
            0x03 => {
                let v = self.reg.get_bc().wrapping_add(1);
                self.reg.set_bc(v);
            }
            0x13 => {
                let v = self.reg.get_de().wrapping_add(1);
                self.reg.set_de(v);
            }
            0x23 => {
                let v = self.reg.get_hl().wrapping_add(1);
                self.reg.set_hl(v);
            }
            0x33 => self.reg.sp = self.reg.sp.wrapping_add(1),
            0x0b => {
                let v = self.reg.get_bc().wrapping_sub(1);
                self.reg.set_bc(v);
            }
            0x1b => {
                let v = self.reg.get_de().wrapping_sub(1);
                self.reg.set_de(v);
            }
            0x2b => {
                let v = self.reg.get_hl().wrapping_sub(1);
                self.reg.set_hl(v);
            }
            0x3b => self.reg.sp = self.reg.sp.wrapping_sub(1),
            // INC r / DEC r / LD r,d8 walk the register column in steps of 8.
            0x04 | 0x0c | 0x14 | 0x1c | 0x24 | 0x2c | 0x34 | 0x3c => {
                let i = (opcode >> 3) & 0x07;
                let v = self.read_r8(mem, i);
                let r = self.alu_inc(v);
                self.write_r8(mem, i, r);
            }
            0x05 | 0x0d | 0x15 | 0x1d | 0x25 | 0x2d | 0x35 | 0x3d => {
                let i = (opcode >> 3) & 0x07;
                let v = self.read_r8(mem, i);
                let r = self.alu_dec(v);
                self.write_r8(mem, i, r);
            }
            0x06 | 0x0e | 0x16 | 0x1e | 0x26 | 0x2e | 0x36 | 0x3e => {
                let i = (opcode >> 3) & 0x07;
                let v = self.imm(mem);
                self.write_r8(mem, i, v);
            }
            0x07 => {
                self.reg.a = self.alu_rlc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x0f => {
                self.reg.a = self.alu_rrc(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x17 => {
                self.reg.a = self.alu_rl(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            0x1f => {
                self.reg.a = self.alu_rr(self.reg.a);
                self.reg.set_flag(Z, false);
            }
            // LD (a16),SP: low byte first.
            0x08 => {
                let a = self.imm_word(mem);
                mem.set_word(a, self.reg.sp);
            }
            0x09 => self.alu_add_hl(self.reg.get_bc()),
            0x19 => self.alu_add_hl(self.reg.get_de()),
            0x29 => self.alu_add_hl(self.reg.get_hl()),
            0x39 => self.alu_add_hl(self.reg.sp),
            0x10 => {
                // STOP: halt with the stop marker; also resets the timer's internal divider. The padding byte is
                // skipped.
                self.halted = true;
                self.stopped = true;
                mem.timer.reset_counter();
                self.reg.pc = self.reg.pc.wrapping_add(1);
            }
            0x18 => self.alu_jr(mem),
            0x20 | 0x28 | 0x30 | 0x38 => {
                if self.cond((opcode >> 3) & 0x03) {
                    self.alu_jr(mem);
                } else {
                    self.reg.pc = self.reg.pc.wrapping_add(1);
                }
            }
            0x27 => self.alu_daa(),
            0x2f => {
                self.reg.a = !self.reg.a;
                self.reg.set_flag(H, true);
                self.reg.set_flag(N, true);
            }
            0x37 => {
                self.reg.set_flag(C, true);
                self.reg.set_flag(H, false);
                self.reg.set_flag(N, false);
            }
            0x3f => {
                let v = !self.reg.get_flag(C);
                self.reg.set_flag(C, v);
                self.reg.set_flag(H, false);
                self.reg.set_flag(N, false);
            }
            0x76 => {
                let pending = mem.get(0xffff) & mem.intf.borrow().data & 0x1f;
                if self.ime != Ime::Enabled && pending != 0x00 {
                    // Halt bug: the CPU fails to latch the halt and re-reads the following byte.
                    self.halt_bug = true;
                } else {
                    self.halted = true;
                }
            }
            // LD r,r'
            0x40..=0x7f => {
                let v = self.read_r8(mem, opcode & 0x07);
                self.write_r8(mem, (opcode >> 3) & 0x07, v);
            }
            // The ALU block: operation in bits 5:3, operand column in bits 2:0.
            0x80..=0xbf => {
                let v = self.read_r8(mem, opcode & 0x07);
                match (opcode >> 3) & 0x07 {
                    0 => self.alu_add(v),
                    1 => self.alu_adc(v),
                    2 => self.alu_sub(v),
                    3 => self.alu_sbc(v),
                    4 => self.alu_and(v),
                    5 => self.alu_xor(v),
                    6 => self.alu_or(v),
                    _ => self.alu_cp(v),
                }
            }
            0xc0 | 0xc8 | 0xd0 | 0xd8 => {
                if self.cond((opcode >> 3) & 0x03) {
                    self.reg.pc = self.stack_pop(mem);
                }
            }
            0xc9 => self.reg.pc = self.stack_pop(mem),
            0xd9 => {
                // RETI enables interrupts immediately, without the EI delay.
                self.reg.pc = self.stack_pop(mem);
                self.ime = Ime::Enabled;
            }
            0xc1 => {
                let v = self.stack_pop(mem);
                self.reg.set_bc(v);
            }
            0xd1 => {
                let v = self.stack_pop(mem);
                self.reg.set_de(v);
            }
            0xe1 => {
                let v = self.stack_pop(mem);
                self.reg.set_hl(v);
            }
            0xf1 => {
                // POP AF: the flag register has no low nibble to restore.
                let v = self.stack_pop(mem);
                self.reg.set_af(v);
            }
            0xc5 => self.stack_push(mem, self.reg.get_bc()),
            0xd5 => self.stack_push(mem, self.reg.get_de()),
            0xe5 => self.stack_push(mem, self.reg.get_hl()),
            0xf5 => self.stack_push(mem, self.reg.get_af()),
            0xc3 => self.reg.pc = mem.get_word(self.reg.pc),
            0xc2 | 0xca | 0xd2 | 0xda => {
                let pc = self.imm_word(mem);
                if self.cond((opcode >> 3) & 0x03) {
                    self.reg.pc = pc;
                }
            }
            0xe9 => self.reg.pc = self.reg.get_hl(),
            0xcd => {
                let pc = self.imm_word(mem);
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = pc;
            }
            0xc4 | 0xcc | 0xd4 | 0xdc => {
                let pc = self.imm_word(mem);
                if self.cond((opcode >> 3) & 0x03) {
                    self.stack_push(mem, self.reg.pc);
                    self.reg.pc = pc;
                }
            }
            // RST n: the target vector is packed into the opcode.
            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                self.stack_push(mem, self.reg.pc);
                self.reg.pc = u16::from(opcode & 0x38);
            }
            // ALU d8
            0xc6 | 0xce | 0xd6 | 0xde | 0xe6 | 0xee | 0xf6 | 0xfe => {
                let v = self.imm(mem);
                match (opcode >> 3) & 0x07 {
                    0 => self.alu_add(v),
                    1 => self.alu_adc(v),
                    2 => self.alu_sub(v),
                    3 => self.alu_sbc(v),
                    4 => self.alu_and(v),
                    5 => self.alu_xor(v),
                    6 => self.alu_or(v),
                    _ => self.alu_cp(v),
                }
            }
            0xcb => return Ok(self.ex_cb(mem)),
            // High page loads: 0xFF00 + immediate offset or + C.
            0xe0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                mem.set(a, self.reg.a);
            }
            0xf0 => {
                let a = 0xff00 | u16::from(self.imm(mem));
                self.reg.a = mem.get(a);
            }
            0xe2 => mem.set(0xff00 | u16::from(self.reg.c), self.reg.a),
            0xf2 => self.reg.a = mem.get(0xff00 | u16::from(self.reg.c)),
            0xea => {
                let a = self.imm_word(mem);
                mem.set(a, self.reg.a);
            }
            0xfa => {
                let a = self.imm_word(mem);
                self.reg.a = mem.get(a);
            }
            0xe8 => self.reg.sp = self.alu_add_sp_r8(mem),
            0xf8 => {
                let v = self.alu_add_sp_r8(mem);
                self.reg.set_hl(v);
            }
            0xf9 => self.reg.sp = self.reg.get_hl(),
            0xf3 => self.ime = Ime::Disabled,
            0xfb => {
                if self.ime == Ime::Disabled {
                    self.ime = Ime::EnableScheduled;
                }
            }
            0xd3 | 0xdb | 0xdd | 0xe3 | 0xe4 | 0xeb | 0xec | 0xed | 0xf4 | 0xfc | 0xfd => {
                self.fatal = true;
                return Err(Error::IllegalOpcode { opcode, pc });
            }
        }

        // The taken path of a conditional branch costs extra cycles. None of these touch flags, so the condition can
        // be re-read after the handler ran.
        let ecycle = match opcode {
            0x20 | 0x28 | 0x30 | 0x38 | 0xc2 | 0xca | 0xd2 | 0xda => {
                if self.cond((opcode >> 3) & 0x03) {
                    4
                } else {
                    0
                }
            }
            0xc0 | 0xc8 | 0xd0 | 0xd8 | 0xc4 | 0xcc | 0xd4 | 0xdc => {
                if self.cond((opcode >> 3) & 0x03) {
                    12
                } else {
                    0
                }
            }
            _ => 0,
        };
        Ok(OP_CYCLES[opcode as usize] + ecycle)
    }

    // The CB page is fully regular: operation in bits 7:6 (+ bits 5:3), operand column in bits 2:0. Costs include
    // the prefix byte.
    fn ex_cb(&mut self, mem: &mut Mmunit) -> u32 {
        let cbcode = self.imm(mem);
        let i = cbcode & 0x07;
        let b = (cbcode >> 3) & 0x07;
        let v = self.read_r8(mem, i);
        match cbcode >> 6 {
            0x00 => {
                let r = match b {
                    0 => self.alu_rlc(v),
                    1 => self.alu_rrc(v),
                    2 => self.alu_rl(v),
                    3 => self.alu_rr(v),
                    4 => self.alu_sla(v),
                    5 => self.alu_sra(v),
                    6 => self.alu_swap(v),
                    _ => self.alu_srl(v),
                };
                self.write_r8(mem, i, r);
            }
            0x01 => self.alu_bit(v, b),
            0x02 => self.write_r8(mem, i, v & !(1 << b)),
            _ => self.write_r8(mem, i, v | (1 << b)),
        }
        if i == 6 {
            // (HL) pays for its memory traffic; BIT only reads.
            if cbcode >> 6 == 0x01 {
                12
            } else {
                16
            }
        } else {
            8
        }
    }
}
