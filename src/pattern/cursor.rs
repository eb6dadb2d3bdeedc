//! Byte cursor used by the matcher nodes
//!
//! A cursor is a plain borrowed view with position tracking; matcher nodes
//! save and restore positions to implement backtracking. Whether the bytes
//! underneath are a forward term or a reversed compact-segment span is
//! invisible to the cursor; the node tree is inverted instead.

/// Position-tracking view over a byte slice.
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        debug_assert!(pos <= data.len());
        Self { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.data.len());
        self.pos = pos;
    }

    /// Consume and return the next byte, or `None` at the end of the buffer.
    pub fn next(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn at_start(&self) -> bool {
        self.pos == 0
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_walk() {
        let mut cur = Cursor::new(b"abc");
        assert!(cur.at_start());
        assert_eq!(cur.next(), Some(b'a'));
        assert_eq!(cur.peek(), Some(b'b'));
        assert_eq!(cur.pos(), 1);

        cur.set_pos(3);
        assert!(cur.at_end());
        assert_eq!(cur.next(), None);

        cur.set_pos(0);
        assert_eq!(cur.next(), Some(b'a'));
    }
}
