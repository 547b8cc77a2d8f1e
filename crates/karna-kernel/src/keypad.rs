//! [`CodeEntry`] – the numeric keypad used to type a delivery credential.
//!
//! This is only the model: what the display shows, what the error line says
//! and what gets submitted. Rendering it is the job of whichever surface
//! hosts the keypad.

/// Longest code the keypad accepts; further digits are ignored.
pub const MAX_CODE_DIGITS: usize = 6;

/// Text shown after a rejected attempt.
pub const INVALID_CODE_MESSAGE: &str = "Invalid security code. Please try again.";

/// One key on the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(char),
    Clear,
    Backspace,
}

impl Key {
    /// Map a typed character to a key: `0`–`9`, `C` to clear and `<` to
    /// delete the last digit. Anything else is not a key.
    pub fn from_char(c: char) -> Option<Key> {
        match c {
            '0'..='9' => Some(Key::Digit(c)),
            'c' | 'C' => Some(Key::Clear),
            '<' => Some(Key::Backspace),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    buffer: String,
    error: Option<&'static str>,
}

impl CodeEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one key press. Any press clears a displayed error.
    pub fn press(&mut self, key: Key) {
        match key {
            Key::Digit(d) if self.buffer.len() < MAX_CODE_DIGITS => self.buffer.push(d),
            Key::Digit(_) => {}
            Key::Clear => self.buffer.clear(),
            Key::Backspace => {
                self.buffer.pop();
            }
        }
        self.error = None;
    }

    /// Press every recognised key in `input`, in order.
    pub fn type_str(&mut self, input: &str) {
        for key in input.chars().filter_map(Key::from_char) {
            self.press(key);
        }
    }

    pub fn display(&self) -> &str {
        &self.buffer
    }

    pub fn error(&self) -> Option<&'static str> {
        self.error
    }

    /// Hand over the typed code for verification, emptying the display.
    pub fn submit(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// Show the rejection message and clear the input for another attempt.
    pub fn reject(&mut self) {
        self.buffer.clear();
        self.error = Some(INVALID_CODE_MESSAGE);
    }
}
