//! Balanced-brace fragment extraction.
//!
//! Locates every `"institution": { ... }` object in a large, loosely
//! JSON-shaped text dump and yields the span of the object that follows the
//! anchor key. The text as a whole is never parsed as JSON.
//!
//! # Algorithm
//!
//! 1. Find every `"institution"` anchor. Require `:` and then `{` after it
//!    (whitespace allowed). Anchors followed by anything else (`false`,
//!    `null`, ...) are passed over.
//! 2. Each anchored `{` is matched as if scanned on its own with depth
//!    starting at 1. Inside a double-quoted string braces are ignored and a
//!    backslash escapes the next byte.
//! 3. When depth returns to 0 the fragment is `[open, close]` inclusive and
//!    the cursor moves past it. If the input ends first, the anchor is
//!    counted as unterminated and the cursor moves just past the anchor.
//!
//! Step 2 runs as one forward pass over the text. A scan started at an
//! anchor shares its string state with every other scan that is outside a
//! string at that byte, so at most three lanes (code, string, escape) are
//! tracked at once. Lanes that reach the same state are merged. Input with
//! many unterminated anchors therefore costs one pass, not one rescan per
//! anchor.
//!
//! All structural bytes are ASCII, so scanning `as_bytes()` always yields
//! spans on UTF-8 character boundaries.
//!
//! # Example
//!
//! ```rust
//! use site_catalog_core::fragment::fragments;
//!
//! let text = r#"x {"institution":{"id":7,"name":"A{B}C"}} y"#;
//! let found: Vec<_> = fragments(text).collect();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].as_str(), r#"{"id":7,"name":"A{B}C"}"#);
//! ```

/// The key literal that opens an institution object.
pub const ANCHOR: &str = "\"institution\"";

/// A balanced brace-delimited region of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    /// Byte offset of the opening `{`.
    pub start: usize,
    /// Byte offset one past the matching `}`.
    pub end: usize,
    text: &'a str,
}

impl<'a> Fragment<'a> {
    pub fn as_str(&self) -> &'a str {
        self.text
    }
}

/// Forward-only iterator over the fragments of one text.
///
/// Created by [`fragments`], which resolves every anchored object up front.
/// Calling [`fragments`] again restarts from the beginning.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    text: &'a str,
    cursor: usize,
    unterminated: usize,
    opens: Vec<usize>,
    closes: Vec<Option<usize>>,
}

/// Iterate over every institution fragment in `text`, in source order.
pub fn fragments(text: &str) -> Fragments<'_> {
    let opens = anchored_opens(text);
    let closes = resolve_closes(text.as_bytes(), &opens);
    Fragments {
        text,
        cursor: 0,
        unterminated: 0,
        opens,
        closes,
    }
}

impl<'a> Fragments<'a> {
    /// Number of anchors skipped so far because their object never closed.
    pub fn unterminated(&self) -> usize {
        self.unterminated
    }

    fn close_of(&self, open: usize) -> Option<usize> {
        let k = self.opens.binary_search(&open).ok()?;
        self.closes[k]
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Fragment<'a>;

    fn next(&mut self) -> Option<Fragment<'a>> {
        let bytes = self.text.as_bytes();

        while self.cursor < bytes.len() {
            let anchor_at = self.cursor + self.text[self.cursor..].find(ANCHOR)?;
            let after_anchor = anchor_at + ANCHOR.len();

            let open = match object_start(bytes, after_anchor) {
                Some(open) => open,
                None => {
                    self.cursor = after_anchor;
                    continue;
                }
            };

            match self.close_of(open) {
                Some(close) => {
                    self.cursor = close + 1;
                    return Some(Fragment {
                        start: open,
                        end: close + 1,
                        text: &self.text[open..=close],
                    });
                }
                None => {
                    self.unterminated += 1;
                    self.cursor = after_anchor;
                }
            }
        }

        None
    }
}

/// Opening brace of every anchor whose value is an object, ascending.
/// Overlapping anchor matches are included.
fn anchored_opens(text: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut opens = Vec::new();
    let mut from = 0;

    while let Some(found) = text[from..].find(ANCHOR) {
        let anchor_at = from + found;
        if let Some(open) = object_start(bytes, anchor_at + ANCHOR.len()) {
            opens.push(open);
        }
        // The anchor starts with an ASCII quote, so +1 stays on a boundary.
        from = anchor_at + 1;
    }

    opens
}

/// Position of the `{` that opens the anchor's value, if the value is an object.
fn object_start(bytes: &[u8], from: usize) -> Option<usize> {
    let mut i = skip_whitespace(bytes, from);
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i = skip_whitespace(bytes, i + 1);
    (bytes.get(i) == Some(&b'{')).then_some(i)
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Str,
    Escape,
}

/// One string-state timeline. Each stack level holds the anchored opens
/// that close at the same `}`; unanchored braces push an empty level.
#[derive(Debug)]
struct Lane {
    lex: Lex,
    stack: Vec<Vec<usize>>,
}

impl Lane {
    fn step(&mut self, b: u8, pos: usize, anchor: Option<usize>, closes: &mut [Option<usize>]) {
        match self.lex {
            Lex::Escape => self.lex = Lex::Str,
            Lex::Str => match b {
                b'\\' => self.lex = Lex::Escape,
                b'"' => self.lex = Lex::Code,
                _ => {}
            },
            Lex::Code => match b {
                b'"' => self.lex = Lex::Str,
                b'{' => self.stack.push(anchor.into_iter().collect()),
                b'}' => {
                    for k in self.stack.pop().unwrap_or_default() {
                        closes[k] = Some(pos);
                    }
                }
                _ => {}
            },
        }
    }

    /// Fold another lane in the same state into this one. Both see the
    /// same bytes from here on, so their stacks pop in step from the top.
    fn absorb(&mut self, other: Lane) {
        let mut other = other.stack;
        if other.len() > self.stack.len() {
            std::mem::swap(&mut self.stack, &mut other);
        }
        for (mine, theirs) in self.stack.iter_mut().rev().zip(other.into_iter().rev()) {
            mine.extend(theirs);
        }
    }
}

/// Closing brace for each of `opens`, or `None` when the input ends first.
/// Result indices line up with `opens`.
fn resolve_closes(bytes: &[u8], opens: &[usize]) -> Vec<Option<usize>> {
    let mut closes = vec![None; opens.len()];
    let mut lanes: Vec<Lane> = Vec::new();
    let mut next = 0;
    let mut pos = match opens.first() {
        Some(&first) => first,
        None => return closes,
    };

    while pos < bytes.len() {
        let anchor = (opens.get(next) == Some(&pos)).then_some(next);
        if anchor.is_some() {
            next += 1;
            if !lanes.iter().any(|lane| lane.lex == Lex::Code) {
                lanes.push(Lane {
                    lex: Lex::Code,
                    stack: Vec::new(),
                });
            }
        }

        for lane in &mut lanes {
            lane.step(bytes[pos], pos, anchor, &mut closes);
        }

        lanes.retain(|lane| !lane.stack.is_empty());
        let mut k = 0;
        while k < lanes.len() {
            match (0..k).find(|&j| lanes[j].lex == lanes[k].lex) {
                Some(j) => {
                    let lane = lanes.swap_remove(k);
                    lanes[j].absorb(lane);
                }
                None => k += 1,
            }
        }

        pos = match (lanes.is_empty(), opens.get(next)) {
            (false, _) => pos + 1,
            (true, Some(&open)) => open,
            (true, None) => break,
        };
    }

    closes
}
