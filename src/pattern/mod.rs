//! Backward-capable pattern matching over dictionary terms
//!
//! A pattern is parsed once into a forward tree and its inversion (the tree
//! matching the byte-reversed language). Write segments are scanned with the
//! forward tree; compact segments store their records reversed and are
//! scanned with the inverted tree, so the most recent data sits at the start
//! of the scan.

mod class;
mod cursor;
mod node;
mod parser;

pub use class::{CharClass, CLASS_MIN};
pub use cursor::Cursor;
pub use node::{Node, REPEAT_UNBOUNDED, ZERO_FAIL};

use crate::error::Result;

/// A compiled pattern holding both scan directions.
#[derive(Clone, Debug)]
pub struct Pattern {
    forward: Node,
    inverted: Node,
}

impl Pattern {
    /// Compile a pattern string.
    pub fn new(pattern: &str) -> Result<Self> {
        let forward = parser::parse(pattern.as_bytes())?;
        let inverted = forward.invert();
        Ok(Self { forward, inverted })
    }

    /// Build a pattern matching a byte literal exactly as given, with no
    /// metacharacter interpretation.
    pub fn literal(text: &[u8]) -> Self {
        let forward = Node::Literal(text.to_vec());
        let inverted = forward.invert();
        Self { forward, inverted }
    }

    pub fn forward(&self) -> &Node {
        &self.forward
    }

    pub fn inverted(&self) -> &Node {
        &self.inverted
    }

    /// Whether the pattern matches anywhere in a forward term.
    pub fn is_match(&self, text: &[u8]) -> bool {
        find_match(&self.forward, text).is_some()
    }

    /// Whether the pattern matches a term given in byte-reversed form.
    pub fn is_match_reversed(&self, reversed: &[u8]) -> bool {
        find_match(&self.inverted, reversed).is_some()
    }
}

/// Try the node at every start offset; return the first `(offset, length)`
/// match. Unanchored substring semantics; `^`/`$` nodes bind to the term
/// boundaries.
pub fn find_match(node: &Node, text: &[u8]) -> Option<(usize, usize)> {
    for offset in 0..=text.len() {
        let mut cur = Cursor::at(text, offset);
        let consumed = node.match_len(&mut cur);
        if consumed >= 0 {
            return Some((offset, consumed as usize));
        }
    }
    None
}

/// Whether the node matches anywhere in the text.
pub fn is_match(node: &Node, text: &[u8]) -> bool {
    find_match(node, text).is_some()
}
