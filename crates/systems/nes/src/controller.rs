//! Standard NES joypad on `$4016/$4017`.

use serde::{Deserialize, Serialize};

/// Button bit positions, in the order the shift register reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Button {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    pub fn mask(self) -> u8 {
        1 << self as u8
    }
}

#[derive(Debug, Clone, Default)]
pub struct Controller {
    buttons: u8,
    index: u8,
    strobe: u8,
}

impl Controller {
    /// Replace all eight button states; bit `n` is [`Button`] `n`.
    pub fn set_buttons(&mut self, buttons: u8) {
        self.buttons = buttons;
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        if pressed {
            self.buttons |= button.mask();
        } else {
            self.buttons &= !button.mask();
        }
    }

    pub fn buttons(&self) -> u8 {
        self.buttons
    }

    /// Serial read: one button per call, `0` once all eight were shifted out.
    pub fn read(&mut self) -> u8 {
        let value = if self.index < 8 {
            (self.buttons >> self.index) & 1
        } else {
            0
        };
        self.index = self.index.saturating_add(1);
        if self.strobe & 1 == 1 {
            self.index = 0;
        }
        value
    }

    pub fn write(&mut self, val: u8) {
        self.strobe = val;
        if self.strobe & 1 == 1 {
            self.index = 0;
        }
    }
}
