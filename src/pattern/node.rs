//! Matcher node tree with signed partial-match lengths
//!
//! `match_len` returns bytes consumed (>= 0) on success. On failure it
//! returns `ZERO_FAIL` when nothing could be tentatively matched, or `-k`
//! when `k` bytes were consumed before the mismatch; the cursor is always
//! restored to its entry position on failure. Parents use the magnitude to
//! account for how far a child got before backtracking.

use super::class::CharClass;
use super::cursor::Cursor;

/// Sentinel for "failed having consumed nothing usable".
pub const ZERO_FAIL: i32 = i32::MIN;

/// Marker value for an unbounded repetition upper limit.
pub const REPEAT_UNBOUNDED: u32 = u32::MAX;

/// One node of a parsed pattern tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Never matches.
    NoMatch,
    /// A run of literal bytes. The empty run matches zero bytes.
    Literal(Vec<u8>),
    /// Single-byte membership test.
    Class(CharClass),
    /// Conjunction: children match in order. Kept n-ary so inversion simply
    /// reverses the list and a leading repetition stays in driving position.
    Seq(Vec<Node>),
    /// First-match alternation.
    Alt(Box<Node>, Box<Node>),
    /// Bounded repetition of a child node.
    Repeat {
        node: Box<Node>,
        min: u32,
        max: u32,
    },
    /// Start-of-term anchor.
    Bol,
    /// End-of-term anchor.
    Eol,
}

impl Node {
    /// Match against the cursor, returning the signed consumed length.
    pub fn match_len(&self, cur: &mut Cursor<'_>) -> i32 {
        match self {
            Node::NoMatch => ZERO_FAIL,
            Node::Bol => {
                if cur.at_start() {
                    0
                } else {
                    ZERO_FAIL
                }
            }
            Node::Eol => {
                if cur.at_end() {
                    0
                } else {
                    ZERO_FAIL
                }
            }
            Node::Literal(bytes) => {
                let start = cur.pos();
                for (k, &expected) in bytes.iter().enumerate() {
                    match cur.next() {
                        Some(b) if b == expected => {}
                        _ => {
                            cur.set_pos(start);
                            return fail_result(k as i32);
                        }
                    }
                }
                bytes.len() as i32
            }
            Node::Class(class) => {
                let start = cur.pos();
                match cur.next() {
                    Some(b) if class.contains(b) => 1,
                    _ => {
                        cur.set_pos(start);
                        ZERO_FAIL
                    }
                }
            }
            Node::Seq(items) => match_seq(items, cur),
            Node::Alt(a, b) => {
                let r1 = a.match_len(cur);
                if r1 >= 0 {
                    return r1;
                }
                let r2 = b.match_len(cur);
                if r2 >= 0 {
                    return r2;
                }
                fail_result(fail_consumed(r1).max(fail_consumed(r2)))
            }
            Node::Repeat { node, min, max } => match_repeat_then(node, *min, *max, &[], cur),
        }
    }

    /// Build the tree matching the byte-reversed language.
    pub fn invert(&self) -> Node {
        match self {
            Node::NoMatch => Node::NoMatch,
            Node::Bol => Node::Eol,
            Node::Eol => Node::Bol,
            Node::Literal(bytes) => Node::Literal(bytes.iter().rev().copied().collect()),
            Node::Class(class) => Node::Class(class.clone()),
            Node::Seq(items) => Node::Seq(items.iter().rev().map(Node::invert).collect()),
            Node::Alt(a, b) => Node::Alt(Box::new(b.invert()), Box::new(a.invert())),
            Node::Repeat { node, min, max } => Node::Repeat {
                node: Box::new(node.invert()),
                min: *min,
                max: *max,
            },
        }
    }
}

/// Normalize a non-negative tentative consumption into a failure code.
fn fail_result(consumed: i32) -> i32 {
    if consumed == 0 {
        ZERO_FAIL
    } else {
        -consumed
    }
}

/// Magnitude of a failure code.
fn fail_consumed(r: i32) -> i32 {
    debug_assert!(r < 0);
    if r == ZERO_FAIL {
        0
    } else {
        -r
    }
}

fn match_seq(items: &[Node], cur: &mut Cursor<'_>) -> i32 {
    let Some((head, rest)) = items.split_first() else {
        return 0;
    };
    // A leading repetition drives the remainder: greedy, then back off.
    if let Node::Repeat { node, min, max } = head {
        return match_repeat_then(node, *min, *max, rest, cur);
    }
    let start = cur.pos();
    let r1 = head.match_len(cur);
    if r1 < 0 {
        return r1;
    }
    let r2 = match_seq(rest, cur);
    if r2 >= 0 {
        return r1 + r2;
    }
    cur.set_pos(start);
    fail_result(r1 + fail_consumed(r2))
}

/// Match `child{min,max}` followed by `rest`, trying repetition counts from
/// the greedy maximum down toward `min` until the remainder fits.
fn match_repeat_then(child: &Node, min: u32, max: u32, rest: &[Node], cur: &mut Cursor<'_>) -> i32 {
    let start = cur.pos();
    let mut ends = vec![start];
    while (ends.len() - 1) < max as usize {
        let r = child.match_len(cur);
        if r <= 0 {
            // Zero-width child matches would loop forever; treat as done.
            break;
        }
        ends.push(cur.pos());
    }
    let greedy = (*ends.last().unwrap_or(&start) - start) as i32;

    let mut last_fail = ZERO_FAIL;
    let mut count = ends.len() - 1;
    loop {
        if count < min as usize {
            break;
        }
        cur.set_pos(ends[count]);
        let r = match_seq(rest, cur);
        if r >= 0 {
            return (ends[count] - start) as i32 + r;
        }
        last_fail = r;
        if count == 0 {
            break;
        }
        count -= 1;
    }

    cur.set_pos(start);
    if greedy == 0 {
        return last_fail;
    }
    fail_result(greedy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Node {
        Node::Literal(s.as_bytes().to_vec())
    }

    fn any_star() -> Node {
        Node::Repeat {
            node: Box::new(Node::Class(CharClass::any())),
            min: 0,
            max: REPEAT_UNBOUNDED,
        }
    }

    fn run(node: &Node, text: &[u8]) -> i32 {
        let mut cur = Cursor::new(text);
        node.match_len(&mut cur)
    }

    #[test]
    fn test_literal_match_and_partial_fail() {
        let node = lit("ABC");
        assert_eq!(run(&node, b"ABC"), 3);
        assert_eq!(run(&node, b"ABCD"), 3);
        assert_eq!(run(&node, b"ABX"), -2);
        assert_eq!(run(&node, b"XBC"), ZERO_FAIL);
        assert_eq!(run(&node, b"AB"), -2);
    }

    #[test]
    fn test_literal_restores_cursor_on_failure() {
        let node = lit("ABC");
        let mut cur = Cursor::new(b"ABX");
        assert_eq!(node.match_len(&mut cur), -2);
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn test_seq_with_backtracking_repeat() {
        // AB.*CD
        let node = Node::Seq(vec![lit("AB"), any_star(), lit("CD")]);
        assert_eq!(run(&node, b"ABCD"), 4);
        assert_eq!(run(&node, b"ABxxCD"), 6);
        assert_eq!(run(&node, b"ABCDCD"), 6); // greedy takes the last CD
        assert_eq!(run(&node, b"XBCD"), ZERO_FAIL);
        // Consumed AB plus the whole greedy tail before giving up.
        assert_eq!(run(&node, b"ABxxCx"), -6);
    }

    #[test]
    fn test_repeat_bounds() {
        let node = Node::Repeat {
            node: Box::new(Node::Class(CharClass::digits())),
            min: 2,
            max: 4,
        };
        assert_eq!(run(&node, b"1"), -1);
        assert_eq!(run(&node, b"12"), 2);
        assert_eq!(run(&node, b"12345"), 4);
        assert_eq!(run(&node, b"ab"), ZERO_FAIL);
    }

    #[test]
    fn test_repeat_below_min_rewinds() {
        let node = Node::Repeat {
            node: Box::new(Node::Class(CharClass::digits())),
            min: 3,
            max: 5,
        };
        let mut cur = Cursor::new(b"12x");
        assert_eq!(node.match_len(&mut cur), -2);
        assert_eq!(cur.pos(), 0);
    }

    #[test]
    fn test_alternation_first_match_wins() {
        let node = Node::Alt(Box::new(lit("AB")), Box::new(lit("AC")));
        assert_eq!(run(&node, b"AB"), 2);
        assert_eq!(run(&node, b"AC"), 2);
        assert_eq!(run(&node, b"AD"), -1);
        assert_eq!(run(&node, b"XY"), ZERO_FAIL);
    }

    #[test]
    fn test_anchors() {
        let node = Node::Seq(vec![Node::Bol, lit("AB"), Node::Eol]);
        assert_eq!(run(&node, b"AB"), 2);
        assert_eq!(run(&node, b"ABC"), -2); // Eol fails after consuming AB
        let mut cur = Cursor::at(b"xAB", 1);
        assert_eq!(node.match_len(&mut cur), ZERO_FAIL); // Bol off-start
    }

    #[test]
    fn test_no_match() {
        assert_eq!(run(&Node::NoMatch, b"anything"), ZERO_FAIL);
    }

    #[test]
    fn test_invert_literal_and_seq() {
        let node = Node::Seq(vec![lit("AB"), any_star(), lit("CD")]);
        let inverted = node.invert();
        assert_eq!(
            inverted,
            Node::Seq(vec![lit("DC"), any_star(), lit("BA")])
        );
        // Inverted tree against reversed input consumes the same length.
        assert_eq!(run(&inverted, b"DCBA"), 4);
        assert_eq!(run(&inverted, b"DCxxBA"), 6);
    }

    #[test]
    fn test_invert_swaps_anchors() {
        let node = Node::Seq(vec![Node::Bol, lit("A")]);
        assert_eq!(node.invert(), Node::Seq(vec![lit("A"), Node::Eol]));
    }

    #[test]
    fn test_double_inversion_is_identity() {
        let node = Node::Seq(vec![
            Node::Bol,
            lit("AB"),
            Node::Alt(Box::new(lit("x")), Box::new(any_star())),
            Node::Eol,
        ]);
        assert_eq!(node.invert().invert(), node);
    }
}
