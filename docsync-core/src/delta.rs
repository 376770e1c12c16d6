//! Rich-text deltas.
//!
//! A [`Delta`] is an ordered list of operations over a document:
//!
//! ```text
//! {"ops": [
//!   {"retain": 5},
//!   {"insert": "world", "attributes": {"bold": true}},
//!   {"delete": 3}
//! ]}
//! ```
//!
//! A delta made only of inserts is a full document (a content snapshot).
//! Lengths are counted in `char`s; an embed has length 1.
//!
//! Deltas are not commutative. Applying `b` after `a` is `a.compose(&b)`, and
//! the order in which remote deltas arrive is the order they must be composed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Formatting attributes. A `null` value in a retain clears the attribute.
pub type Attributes = Map<String, Value>;

/// Inserted content: a run of text or a single embed (image, video, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Insert {
    Text(String),
    Embed(Map<String, Value>),
}

impl Insert {
    pub fn len(&self) -> usize {
        match self {
            Insert::Text(text) => text.chars().count(),
            Insert::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single delta operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Op {
    Insert {
        insert: Insert,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Retain {
        retain: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Retain,
    Delete,
}

impl Op {
    /// Length of the span this op covers.
    pub fn len(&self) -> usize {
        match self {
            Op::Insert { insert, .. } => insert.len(),
            Op::Retain { retain, .. } => *retain,
            Op::Delete { delete } => *delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Op::Insert { attributes, .. } | Op::Retain { attributes, .. } => attributes.as_ref(),
            Op::Delete { .. } => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Op::Insert { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Op::Delete { .. })
    }

    fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Retain { .. } => OpKind::Retain,
            Op::Delete { .. } => OpKind::Delete,
        }
    }

    /// Empty attribute maps are equivalent to no attributes.
    fn normalized(mut self) -> Self {
        if let Op::Insert { attributes, .. } | Op::Retain { attributes, .. } = &mut self {
            if attributes.as_ref().is_some_and(Map::is_empty) {
                *attributes = None;
            }
        }
        self
    }
}

/// An ordered sequence of operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub ops: Vec<Op>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a delta from raw ops without normalising them.
    pub fn from_ops(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    pub fn insert(self, text: impl Into<String>) -> Self {
        self.insert_with(text, None)
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Option<Attributes>) -> Self {
        self.push(Op::Insert { insert: Insert::Text(text.into()), attributes });
        self
    }

    pub fn insert_embed(mut self, embed: Map<String, Value>, attributes: Option<Attributes>) -> Self {
        self.push(Op::Insert { insert: Insert::Embed(embed), attributes });
        self
    }

    pub fn retain(self, length: usize) -> Self {
        self.retain_with(length, None)
    }

    pub fn retain_with(mut self, length: usize, attributes: Option<Attributes>) -> Self {
        self.push(Op::Retain { retain: length, attributes });
        self
    }

    pub fn delete(mut self, length: usize) -> Self {
        self.push(Op::Delete { delete: length });
        self
    }

    /// Append an op, merging it with the previous one where possible.
    ///
    /// Inserts are placed before a trailing delete so that equivalent deltas
    /// share one canonical form.
    pub fn push(&mut self, op: Op) {
        let op = op.normalized();
        if op.is_empty() {
            return;
        }

        let mut index = self.ops.len();
        if index > 0 {
            if let (Op::Delete { delete: last }, Op::Delete { delete }) = (&mut self.ops[index - 1], &op) {
                *last += *delete;
                return;
            }
            if self.ops[index - 1].is_delete() && op.is_insert() {
                index -= 1;
                if index == 0 {
                    self.ops.insert(0, op);
                    return;
                }
            }
            if merge_into(&mut self.ops[index - 1], &op) {
                return;
            }
        }
        self.ops.insert(index, op);
    }

    /// Drop a trailing attribute-less retain; it changes nothing.
    pub fn chop(mut self) -> Self {
        if let Some(Op::Retain { attributes: None, .. }) = self.ops.last() {
            self.ops.pop();
        }
        self
    }

    /// Append all of `other`'s ops.
    pub fn concat(mut self, other: Delta) -> Self {
        let mut ops = other.ops.into_iter();
        if let Some(first) = ops.next() {
            self.push(first);
            self.ops.extend(ops);
        }
        self
    }

    /// Total length covered by the ops.
    pub fn length(&self) -> usize {
        self.ops.iter().map(Op::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether this delta is a full document (inserts only).
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(Op::is_insert)
    }

    /// Concatenated text inserts; embeds are skipped.
    pub fn to_plain_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::Insert { insert: Insert::Text(text), .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Compose `other` on top of `self`: the result is `self` followed by `other`.
    pub fn compose(&self, other: &Delta) -> Delta {
        let mut this_iter = OpIter::new(&self.ops);
        let mut other_iter = OpIter::new(&other.ops);
        let mut ops = Vec::new();

        // Fast path: a leading plain retain keeps whole leading inserts untouched.
        if let Some(Op::Retain { retain, attributes: None }) = other_iter.peek() {
            let first = *retain;
            let mut first_left = first;
            while this_iter.peek_kind() == OpKind::Insert && this_iter.peek_length() <= first_left {
                first_left -= this_iter.peek_length();
                ops.push(this_iter.next(usize::MAX));
            }
            if first > first_left {
                other_iter.next(first - first_left);
            }
        }

        let mut delta = Delta { ops };
        while this_iter.has_next() || other_iter.has_next() {
            if other_iter.peek_kind() == OpKind::Insert {
                delta.push(other_iter.next(usize::MAX));
                continue;
            }
            if this_iter.peek_kind() == OpKind::Delete {
                delta.push(this_iter.next(usize::MAX));
                continue;
            }

            let length = this_iter.peek_length().min(other_iter.peek_length());
            let this_op = this_iter.next(length);
            let other_op = other_iter.next(length);
            match (this_op, other_op) {
                (this_op, Op::Retain { attributes: other_attrs, .. }) => {
                    let new_op = match this_op {
                        Op::Retain { attributes, .. } => Op::Retain {
                            retain: length,
                            attributes: compose_attributes(attributes.as_ref(), other_attrs.as_ref(), true),
                        },
                        Op::Insert { insert, attributes } => Op::Insert {
                            insert,
                            attributes: compose_attributes(attributes.as_ref(), other_attrs.as_ref(), false),
                        },
                        delete @ Op::Delete { .. } => delete,
                    };
                    delta.push(new_op.clone());

                    // Nothing left to apply: the rest of `self` is unchanged.
                    if !other_iter.has_next() && delta.ops.last() == Some(&new_op.normalized()) {
                        let rest = Delta { ops: this_iter.rest() };
                        return delta.concat(rest).chop();
                    }
                }
                (Op::Retain { .. }, Op::Delete { delete }) => delta.push(Op::Delete { delete }),
                // Insert followed by delete: the two cancel out.
                _ => {}
            }
        }
        delta.chop()
    }
}

fn merge_into(last: &mut Op, op: &Op) -> bool {
    match (last, op) {
        (
            Op::Insert { insert: Insert::Text(text), attributes: last_attrs },
            Op::Insert { insert: Insert::Text(more), attributes },
        ) if *last_attrs == *attributes => {
            text.push_str(more);
            true
        }
        (
            Op::Retain { retain, attributes: last_attrs },
            Op::Retain { retain: more, attributes },
        ) if *last_attrs == *attributes => {
            *retain += *more;
            true
        }
        _ => false,
    }
}

fn compose_attributes(
    base: Option<&Attributes>,
    update: Option<&Attributes>,
    keep_null: bool,
) -> Option<Attributes> {
    let mut attributes = update.cloned().unwrap_or_default();
    if !keep_null {
        attributes.retain(|_, value| !value.is_null());
    }
    if let Some(base) = base {
        for (key, value) in base {
            if !update.is_some_and(|update| update.contains_key(key)) {
                attributes.insert(key.clone(), value.clone());
            }
        }
    }
    (!attributes.is_empty()).then_some(attributes)
}

/// Cursor over a slice of ops that can split an op at any offset.
struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    fn new(ops: &'a [Op]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    fn peek(&self) -> Option<&'a Op> {
        self.ops.get(self.index)
    }

    fn has_next(&self) -> bool {
        self.peek_length() < usize::MAX
    }

    /// Remaining length of the current op; unbounded once exhausted.
    fn peek_length(&self) -> usize {
        match self.peek() {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    /// An exhausted iterator behaves like an endless retain.
    fn peek_kind(&self) -> OpKind {
        self.peek().map_or(OpKind::Retain, Op::kind)
    }

    fn next(&mut self, length: usize) -> Op {
        let Some(op) = self.peek() else {
            return Op::Retain { retain: usize::MAX, attributes: None };
        };

        let offset = self.offset;
        let remaining = op.len() - offset;
        let length = if length >= remaining {
            self.index += 1;
            self.offset = 0;
            remaining
        } else {
            self.offset += length;
            length
        };

        match op {
            Op::Delete { .. } => Op::Delete { delete: length },
            Op::Retain { attributes, .. } => Op::Retain {
                retain: length,
                attributes: attributes.clone(),
            },
            Op::Insert { insert: Insert::Text(text), attributes } => Op::Insert {
                insert: Insert::Text(text.chars().skip(offset).take(length).collect()),
                attributes: attributes.clone(),
            },
            Op::Insert { insert: embed @ Insert::Embed(_), attributes } => Op::Insert {
                insert: embed.clone(),
                attributes: attributes.clone(),
            },
        }
    }

    fn rest(&mut self) -> Vec<Op> {
        if !self.has_next() {
            return Vec::new();
        }
        if self.offset == 0 {
            return self.ops[self.index..].to_vec();
        }
        let mut rest = vec![self.next(usize::MAX)];
        rest.extend_from_slice(&self.ops[self.index..]);
        rest
    }
}
