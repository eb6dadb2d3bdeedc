//! Parser for the compact pattern dialect
//!
//! Supported syntax: literal runs, `.`, character classes `[...]` with
//! ranges, negation and the shorthands `\d \s \w \c \i`, grouping `(...)`,
//! alternation `|`, quantifiers `* + ? {m} {m,} {m,n}`, and the anchors
//! `^`/`$`. Metacharacters appear literally when backslash-escaped.
//!
//! Quantifiers bind to the immediately preceding atom: a quantifier after a
//! multi-byte literal run splits the run so only its final byte is looped.

use crate::error::{Result, TermdexError};

use super::class::CharClass;
use super::node::{Node, REPEAT_UNBOUNDED};

/// Parse a pattern into a forward matcher tree.
pub fn parse(pattern: &[u8]) -> Result<Node> {
    let mut parser = Parser {
        input: pattern,
        pos: 0,
    };
    let node = parser.parse_alternation()?;
    if let Some(b) = parser.peek() {
        return Err(parser.err(format!("unexpected '{}'", b as char)));
    }
    Ok(node)
}

enum Escape {
    Class(CharClass),
    Byte(u8),
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err(&self, msg: impl Into<String>) -> TermdexError {
        TermdexError::PatternSyntax {
            pos: self.pos,
            msg: msg.into(),
        }
    }

    fn parse_alternation(&mut self) -> Result<Node> {
        let mut node = self.parse_sequence()?;
        while self.eat(b'|') {
            let rhs = self.parse_sequence()?;
            node = Node::Alt(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    fn parse_sequence(&mut self) -> Result<Node> {
        let mut items = Vec::new();
        while let Some(b) = self.peek() {
            if b == b'|' || b == b')' {
                break;
            }
            self.parse_atom_into(&mut items)?;
        }
        Ok(match items.len() {
            0 => Node::Literal(Vec::new()),
            1 => items.pop().unwrap_or(Node::NoMatch),
            _ => Node::Seq(items),
        })
    }

    fn parse_atom_into(&mut self, items: &mut Vec<Node>) -> Result<()> {
        let b = self.peek().ok_or_else(|| self.err("unexpected end"))?;
        match b {
            b'(' => {
                self.bump();
                let inner = self.parse_alternation()?;
                if !self.eat(b')') {
                    return Err(self.err("unclosed group"));
                }
                self.push_quantified(items, inner)
            }
            b'[' => {
                self.bump();
                let class = self.parse_class()?;
                self.push_quantified(items, Node::Class(class))
            }
            b'.' => {
                self.bump();
                self.push_quantified(items, Node::Class(CharClass::any()))
            }
            b'^' => {
                self.bump();
                items.push(Node::Bol);
                Ok(())
            }
            b'$' => {
                self.bump();
                items.push(Node::Eol);
                Ok(())
            }
            b'*' | b'+' | b'?' | b'{' => Err(self.err(format!(
                "quantifier '{}' without a preceding atom",
                b as char
            ))),
            b'\\' => {
                self.bump();
                match self.parse_escape()? {
                    Escape::Class(class) => self.push_quantified(items, Node::Class(class)),
                    Escape::Byte(byte) => self.push_literal(items, byte),
                }
            }
            _ => {
                self.bump();
                self.push_literal(items, b)
            }
        }
    }

    /// Append a literal byte, merging into a preceding literal run unless a
    /// quantifier follows (the quantifier loops only this byte).
    fn push_literal(&mut self, items: &mut Vec<Node>, byte: u8) -> Result<()> {
        if let Some((min, max)) = self.try_quantifier()? {
            items.push(Node::Repeat {
                node: Box::new(Node::Literal(vec![byte])),
                min,
                max,
            });
        } else if let Some(Node::Literal(run)) = items.last_mut() {
            run.push(byte);
        } else {
            items.push(Node::Literal(vec![byte]));
        }
        Ok(())
    }

    fn push_quantified(&mut self, items: &mut Vec<Node>, node: Node) -> Result<()> {
        if let Some((min, max)) = self.try_quantifier()? {
            items.push(Node::Repeat {
                node: Box::new(node),
                min,
                max,
            });
        } else {
            items.push(node);
        }
        Ok(())
    }

    fn try_quantifier(&mut self) -> Result<Option<(u32, u32)>> {
        match self.peek() {
            Some(b'*') => {
                self.bump();
                Ok(Some((0, REPEAT_UNBOUNDED)))
            }
            Some(b'+') => {
                self.bump();
                Ok(Some((1, REPEAT_UNBOUNDED)))
            }
            Some(b'?') => {
                self.bump();
                Ok(Some((0, 1)))
            }
            Some(b'{') => {
                self.bump();
                let min = self.parse_number()?;
                let max = if self.eat(b',') {
                    if self.peek() == Some(b'}') {
                        REPEAT_UNBOUNDED
                    } else {
                        self.parse_number()?
                    }
                } else {
                    min
                };
                if !self.eat(b'}') {
                    return Err(self.err("unclosed repetition bound"));
                }
                if min > max {
                    return Err(self.err("repetition minimum exceeds maximum"));
                }
                Ok(Some((min, max)))
            }
            _ => Ok(None),
        }
    }

    fn parse_number(&mut self) -> Result<u32> {
        let start = self.pos;
        let mut value: u32 = 0;
        while let Some(b @ b'0'..=b'9') = self.peek() {
            self.bump();
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as u32))
                .ok_or_else(|| self.err("repetition bound overflow"))?;
        }
        if self.pos == start {
            return Err(self.err("expected a number"));
        }
        Ok(value)
    }

    fn parse_escape(&mut self) -> Result<Escape> {
        let b = self
            .bump()
            .ok_or_else(|| self.err("dangling escape at end of pattern"))?;
        Ok(match b {
            b'd' => Escape::Class(CharClass::digits()),
            b's' => Escape::Class(CharClass::whitespace()),
            b'w' => Escape::Class(CharClass::word()),
            b'c' => Escape::Class(CharClass::control()),
            b'i' => Escape::Class(CharClass::id_alphabet()),
            b'n' => Escape::Byte(b'\n'),
            b'r' => Escape::Byte(b'\r'),
            b't' => Escape::Byte(b'\t'),
            other => Escape::Byte(other),
        })
    }

    /// Parse the body of a character class; the leading `[` is consumed.
    fn parse_class(&mut self) -> Result<CharClass> {
        let negate = self.eat(b'^');
        let mut class = CharClass::empty();
        loop {
            let b = self
                .peek()
                .ok_or_else(|| self.err("unterminated character class"))?;
            if b == b']' {
                self.bump();
                break;
            }
            let lo = if b == b'\\' {
                self.bump();
                match self.parse_escape()? {
                    Escape::Class(shorthand) => {
                        class.union(&shorthand);
                        continue;
                    }
                    Escape::Byte(byte) => byte,
                }
            } else {
                self.bump();
                b
            };
            // A '-' forms a range unless it is the last byte before ']'.
            if self.peek() == Some(b'-') && self.peek_at(1).is_some_and(|n| n != b']') {
                self.bump();
                let hb = self
                    .peek()
                    .ok_or_else(|| self.err("unterminated character class"))?;
                let hi = if hb == b'\\' {
                    self.bump();
                    match self.parse_escape()? {
                        Escape::Class(_) => {
                            return Err(self.err("shorthand class cannot bound a range"))
                        }
                        Escape::Byte(byte) => byte,
                    }
                } else {
                    self.bump();
                    hb
                };
                if lo > hi {
                    return Err(self.err("inverted range bounds"));
                }
                class.insert_range(lo, hi);
            } else {
                class.insert(lo);
            }
        }
        Ok(if negate { class.negated() } else { class })
    }
}
