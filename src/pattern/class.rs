//! Character-class membership tables

use crate::codec::ID_BYTE_BASE;

/// Bytes below this floor never match a class, even a negated one. The band
/// underneath is reserved for framing markers and escape codes.
pub const CLASS_MIN: u8 = 0x08;

/// 256-bit byte membership table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CharClass {
    bits: [u64; 4],
}

impl CharClass {
    pub fn empty() -> Self {
        Self { bits: [0; 4] }
    }

    /// Matches any byte at or above the reserved floor.
    pub fn any() -> Self {
        Self { bits: [u64::MAX; 4] }
    }

    pub fn insert(&mut self, b: u8) {
        self.bits[(b >> 6) as usize] |= 1u64 << (b & 0x3F);
    }

    /// Insert an inclusive byte range.
    pub fn insert_range(&mut self, lo: u8, hi: u8) {
        for b in lo..=hi {
            self.insert(b);
        }
    }

    pub fn union(&mut self, other: &CharClass) {
        for (slot, bits) in self.bits.iter_mut().zip(other.bits.iter()) {
            *slot |= bits;
        }
    }

    /// Flip membership of every byte. The floor still applies at match time.
    pub fn negated(&self) -> Self {
        let mut bits = self.bits;
        for slot in &mut bits {
            *slot = !*slot;
        }
        Self { bits }
    }

    pub fn contains(&self, b: u8) -> bool {
        b >= CLASS_MIN && (self.bits[(b >> 6) as usize] >> (b & 0x3F)) & 1 == 1
    }

    /// `\d` — ASCII digits.
    pub fn digits() -> Self {
        let mut class = Self::empty();
        class.insert_range(b'0', b'9');
        class
    }

    /// `\s` — ASCII whitespace.
    pub fn whitespace() -> Self {
        let mut class = Self::empty();
        for b in [b' ', b'\t', b'\r', b'\n', 0x0B, 0x0C] {
            class.insert(b);
        }
        class
    }

    /// `\w` — word characters.
    pub fn word() -> Self {
        let mut class = Self::empty();
        class.insert_range(b'a', b'z');
        class.insert_range(b'A', b'Z');
        class.insert_range(b'0', b'9');
        class.insert(b'_');
        class
    }

    /// `\c` — control bytes (floor-clamped at match time).
    pub fn control() -> Self {
        let mut class = Self::empty();
        class.insert_range(0x00, 0x1F);
        class.insert(0x7F);
        class
    }

    /// `\i` — the 64-byte encoded-integer alphabet.
    pub fn id_alphabet() -> Self {
        let mut class = Self::empty();
        class.insert_range(ID_BYTE_BASE, ID_BYTE_BASE + 63);
        class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let mut class = CharClass::empty();
        class.insert(b'a');
        class.insert_range(b'0', b'9');
        assert!(class.contains(b'a'));
        assert!(class.contains(b'5'));
        assert!(!class.contains(b'b'));
    }

    #[test]
    fn test_floor_blocks_markers() {
        // Even an all-inclusive or negated class never matches the reserved band.
        let any = CharClass::any();
        for b in 0x00..CLASS_MIN {
            assert!(!any.contains(b));
        }
        assert!(any.contains(CLASS_MIN));
        assert!(any.contains(b'A'));

        let negated_empty = CharClass::empty().negated();
        assert!(!negated_empty.contains(0x01));
    }

    #[test]
    fn test_negation() {
        let mut class = CharClass::empty();
        class.insert(b'x');
        let negated = class.negated();
        assert!(!negated.contains(b'x'));
        assert!(negated.contains(b'y'));
    }

    #[test]
    fn test_shorthand_classes() {
        assert!(CharClass::digits().contains(b'7'));
        assert!(!CharClass::digits().contains(b'a'));
        assert!(CharClass::whitespace().contains(b' '));
        assert!(CharClass::whitespace().contains(b'\n'));
        assert!(CharClass::word().contains(b'_'));
        assert!(CharClass::control().contains(0x1B));
        assert!(!CharClass::control().contains(0x01)); // below the floor
        assert!(CharClass::id_alphabet().contains(ID_BYTE_BASE));
        assert!(CharClass::id_alphabet().contains(ID_BYTE_BASE + 63));
        assert!(!CharClass::id_alphabet().contains(ID_BYTE_BASE.wrapping_sub(1)));
    }
}
