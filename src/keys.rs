use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of keys on the instrument grid (3 rows of 5).
pub const KEY_COUNT: usize = 15;

/// One position on the instrument grid, `0..KEY_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Key(u8);

impl Key {
    pub fn new(index: usize) -> Option<Self> {
        (index < KEY_COUNT).then_some(Key(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key{}", self.0)
    }
}

impl TryFrom<u8> for Key {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Key::new(value as usize).ok_or_else(|| format!("key index {value} out of range"))
    }
}

impl From<Key> for u8 {
    fn from(key: Key) -> u8 {
        key.0
    }
}

/// Parses sheet key names: `Key7`, or `1Key7` where the leading digits name
/// the instrument and are ignored.
impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pos = s
            .find("Key")
            .ok_or_else(|| format!("`{s}` is not a key name"))?;
        let (prefix, rest) = s.split_at(pos);
        if !prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("`{s}` has an invalid instrument prefix"));
        }
        let index: usize = rest[3..]
            .parse()
            .map_err(|_| format!("`{s}` has no key index"))?;
        Key::new(index).ok_or_else(|| format!("`{s}` is outside the {KEY_COUNT}-key grid"))
    }
}

/// Keyboard character bound to each grid position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyLayout(pub Vec<char>);

impl KeyLayout {
    pub fn char_for(&self, key: Key) -> Option<char> {
        self.0.get(key.index()).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.0.len() == KEY_COUNT
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        KeyLayout("YUIOPHJKL;NM,./".chars().collect())
    }
}
