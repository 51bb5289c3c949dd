//! Keyboard state
//!
//! Key codes follow one normalized numbering: printable keys use their
//! upper-case ASCII value, named keys start at 256. Platform backends translate
//! into this space before the runtime sees an event.

use bitflags::bitflags;

/// Number of distinct key codes tracked
pub const KEY_COUNT: usize = 512;

const WORDS: usize = KEY_COUNT / 64;

/// Normalized key code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

#[allow(missing_docs)]
impl KeyCode {
    pub const SPACE: Self = Self(32);
    pub const APOSTROPHE: Self = Self(39);
    pub const COMMA: Self = Self(44);
    pub const MINUS: Self = Self(45);
    pub const PERIOD: Self = Self(46);
    pub const SLASH: Self = Self(47);
    pub const NUM_0: Self = Self(48);
    pub const NUM_9: Self = Self(57);
    pub const SEMICOLON: Self = Self(59);
    pub const EQUAL: Self = Self(61);
    pub const A: Self = Self(65);
    pub const D: Self = Self(68);
    pub const S: Self = Self(83);
    pub const W: Self = Self(87);
    pub const Z: Self = Self(90);
    pub const LEFT_BRACKET: Self = Self(91);
    pub const BACKSLASH: Self = Self(92);
    pub const RIGHT_BRACKET: Self = Self(93);
    pub const GRAVE: Self = Self(96);

    pub const ESCAPE: Self = Self(256);
    pub const ENTER: Self = Self(257);
    pub const TAB: Self = Self(258);
    pub const BACKSPACE: Self = Self(259);
    pub const INSERT: Self = Self(260);
    pub const DELETE: Self = Self(261);
    pub const RIGHT: Self = Self(262);
    pub const LEFT: Self = Self(263);
    pub const DOWN: Self = Self(264);
    pub const UP: Self = Self(265);
    pub const PAGE_UP: Self = Self(266);
    pub const PAGE_DOWN: Self = Self(267);
    pub const HOME: Self = Self(268);
    pub const END: Self = Self(269);
    pub const CAPS_LOCK: Self = Self(280);
    pub const F1: Self = Self(290);
    pub const F12: Self = Self(301);
    pub const LEFT_SHIFT: Self = Self(340);
    pub const LEFT_CONTROL: Self = Self(341);
    pub const LEFT_ALT: Self = Self(342);
    pub const LEFT_SUPER: Self = Self(343);
    pub const RIGHT_SHIFT: Self = Self(344);
    pub const RIGHT_CONTROL: Self = Self(345);
    pub const RIGHT_ALT: Self = Self(346);
    pub const RIGHT_SUPER: Self = Self(347);
    pub const MENU: Self = Self(348);
}

impl KeyCode {
    /// Key code for a printable character, if it has one
    pub fn from_char(c: char) -> Option<Self> {
        let upper = c.to_ascii_uppercase();
        (upper.is_ascii_graphic() || upper == ' ').then(|| Self(upper as u16))
    }

    /// Whether the code fits the tracked range
    pub fn is_tracked(self) -> bool {
        usize::from(self.0) < KEY_COUNT
    }

    /// Modifier bit this key contributes, if any
    pub fn modifier(self) -> Modifiers {
        match self {
            Self::LEFT_SHIFT | Self::RIGHT_SHIFT => Modifiers::SHIFT,
            Self::LEFT_CONTROL | Self::RIGHT_CONTROL => Modifiers::CONTROL,
            Self::LEFT_ALT | Self::RIGHT_ALT => Modifiers::ALT,
            Self::LEFT_SUPER | Self::RIGHT_SUPER => Modifiers::SUPER,
            _ => Modifiers::empty(),
        }
    }
}

bitflags! {
    /// Modifier keys currently held
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        /// Either shift key
        const SHIFT = 1 << 0;
        /// Either control key
        const CONTROL = 1 << 1;
        /// Either alt key
        const ALT = 1 << 2;
        /// Either super/command key
        const SUPER = 1 << 3;
    }
}

/// Fixed 512-bit key set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeySet([u64; WORDS]);

impl KeySet {
    /// Whether `key` is in the set
    pub fn contains(&self, key: KeyCode) -> bool {
        let index = usize::from(key.0);
        index < KEY_COUNT && self.0[index / 64] & (1 << (index % 64)) != 0
    }

    /// Add `key`; untracked codes are ignored
    pub fn insert(&mut self, key: KeyCode) {
        let index = usize::from(key.0);
        if index < KEY_COUNT {
            self.0[index / 64] |= 1 << (index % 64);
        }
    }

    /// Remove `key`
    pub fn remove(&mut self, key: KeyCode) {
        let index = usize::from(key.0);
        if index < KEY_COUNT {
            self.0[index / 64] &= !(1 << (index % 64));
        }
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.0 = [0; WORDS];
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    /// Number of keys in the set
    pub fn len(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Whether every key of `self` is also in `other`
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a & !b == 0)
    }

    /// Iterate over the keys in ascending order
    pub fn iter(&self) -> impl Iterator<Item = KeyCode> + '_ {
        (0..KEY_COUNT as u16)
            .map(KeyCode)
            .filter(move |key| self.contains(*key))
    }
}

/// Keyboard level and edge state
#[derive(Debug, Clone, Default)]
pub struct KeyboardState {
    down: KeySet,
    pressed: KeySet,
    released: KeySet,
    modifiers: Modifiers,
}

impl KeyboardState {
    /// Feed a native key-down (auto-repeat included)
    pub fn key_down(&mut self, key: KeyCode) {
        if !key.is_tracked() {
            log::trace!("Ignoring untracked key code {}", key.0);
            return;
        }
        if !self.down.contains(key) {
            self.pressed.insert(key);
        }
        self.down.insert(key);
        self.modifiers |= key.modifier();
    }

    /// Feed a native key-up
    pub fn key_up(&mut self, key: KeyCode) {
        if !key.is_tracked() {
            return;
        }
        if self.down.contains(key) {
            self.released.insert(key);
        }
        self.down.remove(key);
        self.refresh_modifiers();
    }

    /// Drop every held key, e.g. when the owning window loses focus
    pub fn release_all(&mut self) {
        for key in self.down.iter().collect::<Vec<_>>() {
            self.key_up(key);
        }
    }

    /// Clear the per-tick edge sets
    pub fn end_tick(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }

    /// Whether `key` is held
    pub fn is_down(&self, key: KeyCode) -> bool {
        self.down.contains(key)
    }

    /// Whether `key` went down this tick
    pub fn was_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(key)
    }

    /// Whether `key` went up this tick
    pub fn was_released(&self, key: KeyCode) -> bool {
        self.released.contains(key)
    }

    /// Keys held
    pub fn down(&self) -> &KeySet {
        &self.down
    }

    /// Keys pressed this tick
    pub fn pressed(&self) -> &KeySet {
        &self.pressed
    }

    /// Keys released this tick
    pub fn released(&self) -> &KeySet {
        &self.released
    }

    /// Modifier state
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    fn refresh_modifiers(&mut self) {
        self.modifiers = self
            .down
            .iter()
            .filter(|key| usize::from(key.0) >= 340)
            .fold(Modifiers::empty(), |acc, key| acc | key.modifier());
    }
}
