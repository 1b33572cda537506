// The eight buttons/direction keys are arranged as a 2x4 matrix. Select either button or direction keys by writing
// to this register, then read out bits 0-3.
//
// FF00 - P1/JOYP - Joypad (R/W)
//
// Bit 7 - Not used
// Bit 6 - Not used
// Bit 5 - P15 Select Button Keys      (0=Select)
// Bit 4 - P14 Select Direction Keys   (0=Select)
// Bit 3 - P13 Input Down  or Start    (0=Pressed) (Read Only)
// Bit 2 - P12 Input Up    or Select   (0=Pressed) (Read Only)
// Bit 1 - P11 Input Left  or Button B (0=Pressed) (Read Only)
// Bit 0 - P10 Input Right or Button A (0=Pressed) (Read Only)
use super::intf::{Flag, Intf};
use super::memory::Memory;
use std::cell::RefCell;
use std::rc::Rc;

#[rustfmt::skip]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum JoypadKey {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl JoypadKey {
    fn is_direction(self) -> bool {
        matches!(self, JoypadKey::Right | JoypadKey::Left | JoypadKey::Up | JoypadKey::Down)
    }
}

pub struct Joypad {
    intf: Rc<RefCell<Intf>>,
    up: bool,
    down: bool,
    left: bool,
    right: bool,
    a: bool,
    b: bool,
    select: bool,
    start: bool,
    select_directions: bool,
    select_buttons: bool,
}

impl Joypad {
    pub fn power_up(intf: Rc<RefCell<Intf>>) -> Self {
        Self {
            intf,
            up: false,
            down: false,
            left: false,
            right: false,
            a: false,
            b: false,
            select: false,
            start: false,
            select_directions: false,
            select_buttons: false,
        }
    }

    fn state(&mut self, key: JoypadKey) -> &mut bool {
        match key {
            JoypadKey::Right => &mut self.right,
            JoypadKey::Left => &mut self.left,
            JoypadKey::Up => &mut self.up,
            JoypadKey::Down => &mut self.down,
            JoypadKey::A => &mut self.a,
            JoypadKey::B => &mut self.b,
            JoypadKey::Select => &mut self.select,
            JoypadKey::Start => &mut self.start,
        }
    }

    pub fn set_button(&mut self, key: JoypadKey, pressed: bool) {
        let selected = if key.is_direction() { self.select_directions } else { self.select_buttons };
        let was = *self.state(key);
        *self.state(key) = pressed;
        // A fresh press on the currently selected row requests the Joypad interrupt.
        if pressed && !was && selected {
            self.intf.borrow_mut().req(Flag::Joypad);
        }
    }

    pub fn keydown(&mut self, key: JoypadKey) {
        self.set_button(key, true);
    }

    pub fn keyup(&mut self, key: JoypadKey) {
        self.set_button(key, false);
    }
}

impl Memory for Joypad {
    fn get(&self, a: u16) -> u8 {
        if a != 0xff00 {
            rog::println!("joypad: read from unhandled address {:#06x}", a);
            return 0xff;
        }
        let mut row = 0x0f;
        if self.select_directions {
            if self.right {
                row &= !0x01;
            }
            if self.left {
                row &= !0x02;
            }
            if self.up {
                row &= !0x04;
            }
            if self.down {
                row &= !0x08;
            }
        }
        if self.select_buttons {
            if self.a {
                row &= !0x01;
            }
            if self.b {
                row &= !0x02;
            }
            if self.select {
                row &= !0x04;
            }
            if self.start {
                row &= !0x08;
            }
        }
        let select = (u8::from(!self.select_directions) << 4) | (u8::from(!self.select_buttons) << 5);
        0xc0 | select | row
    }

    fn set(&mut self, a: u16, v: u8) {
        if a != 0xff00 {
            rog::println!("joypad: write to unhandled address {:#06x}", a);
            return;
        }
        self.select_directions = v & 0x10 == 0x00;
        self.select_buttons = v & 0x20 == 0x00;
    }
}

#[cfg(test)]
mod tests {
    use super::super::intf::Intf;
    use super::super::memory::Memory;
    use super::{Joypad, JoypadKey};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn joypad() -> (Joypad, Rc<RefCell<Intf>>) {
        let intf = Rc::new(RefCell::new(Intf::power_up()));
        (Joypad::power_up(intf.clone()), intf)
    }

    #[test]
    fn selected_row_reads_active_low() {
        let (mut joypad, _) = joypad();
        joypad.set(0xff00, 0x20);
        joypad.keydown(JoypadKey::Right);
        joypad.keydown(JoypadKey::Down);
        assert_eq!(joypad.get(0xff00) & 0x0f, 0x06);
        // Button row unselected: the same lines read released.
        joypad.set(0xff00, 0x10);
        assert_eq!(joypad.get(0xff00) & 0x0f, 0x0f);
    }

    #[test]
    fn press_on_selected_row_requests_interrupt() {
        let (mut joypad, intf) = joypad();
        joypad.set(0xff00, 0x10);
        joypad.keydown(JoypadKey::Start);
        assert_eq!(intf.borrow().data & 0x10, 0x10);
    }

    #[test]
    fn press_on_unselected_row_is_silent() {
        let (mut joypad, intf) = joypad();
        joypad.set(0xff00, 0x10);
        joypad.keydown(JoypadKey::Left);
        assert_eq!(intf.borrow().data, 0x00);
    }

    #[test]
    fn release_never_requests_interrupt() {
        let (mut joypad, intf) = joypad();
        joypad.set(0xff00, 0x20);
        joypad.keydown(JoypadKey::Up);
        intf.borrow_mut().data = 0x00;
        joypad.keyup(JoypadKey::Up);
        assert_eq!(intf.borrow().data, 0x00);
    }
}
