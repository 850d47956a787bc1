//! Wire-level operation records.
//!
//! These are the payloads an outer replication layer ships between
//! replicas. The engine consumes them through [`crate::TextCrdt::apply`] or
//! the per-kind entry points; no byte encoding is prescribed here, but every
//! record serializes with serde when the `serde` feature is enabled.

use smartstring::alias::String as SmartString;

use crate::common::{Anchor, OpId, ReplicaId, Stamp, StyleKey, StyleValue};

/// Insert `text` immediately before the codepoint `anchor` names.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Insertion {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub anchor: Anchor,
    pub text: SmartString,
}

/// Hide every codepoint in `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Deletion {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub begin: Anchor,
    pub end: Anchor,
}

/// Apply a style attribute over `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Formatting {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub begin: Anchor,
    pub end: Anchor,
    pub key: StyleKey,
    pub value: StyleValue,
}

/// Suppress the effect of `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UndoOperation {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub target: OpId,
}

/// Restore the effect of a previously undone `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RedoOperation {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub target: OpId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    Insert(Insertion),
    Delete(Deletion),
    Format(Formatting),
    Undo(UndoOperation),
    Redo(RedoOperation),
}

impl Operation {
    pub fn id(&self) -> OpId {
        match self {
            Operation::Insert(op) => OpId::new(op.replica, op.stamp),
            Operation::Delete(op) => OpId::new(op.replica, op.stamp),
            Operation::Format(op) => OpId::new(op.replica, op.stamp),
            Operation::Undo(op) => OpId::new(op.replica, op.stamp),
            Operation::Redo(op) => OpId::new(op.replica, op.stamp),
        }
    }
}
