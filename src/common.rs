use std::cmp::Ordering;

pub use uuid::Uuid;

/// Globally unique identifier for one replica of a document. Generated at
/// engine construction, total-ordered so concurrent operations can be
/// tie-broken deterministically.
pub type ReplicaId = Uuid;

/// Per-replica lamport counter. A replica never reuses a stamp.
pub type Stamp = u32;

/// Identity of a single operation: the replica that produced it and its
/// lamport stamp at that replica.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpId {
    pub replica: ReplicaId,
    pub stamp: Stamp,
}

impl OpId {
    pub fn new(replica: ReplicaId, stamp: Stamp) -> Self {
        Self { replica, stamp }
    }
}

// Operations are ordered stamp-first so that causally later operations sort
// after everything they could have observed. Replica id breaks ties.
impl Ord for OpId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp
            .cmp(&other.stamp)
            .then_with(|| self.replica.cmp(&other.replica))
    }
}

impl PartialOrd for OpId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A stable logical position in the document: the insertion that produced
/// the codepoint we attach to, and the codepoint's offset within that
/// insertion. Anchors survive any amount of concurrent editing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Anchor {
    pub replica: ReplicaId,
    pub stamp: Stamp,
    pub pos: usize,
}

impl Anchor {
    pub fn new(replica: ReplicaId, stamp: Stamp, pos: usize) -> Self {
        Self { replica, stamp, pos }
    }

    pub fn op_id(&self) -> OpId {
        OpId::new(self.replica, self.stamp)
    }
}

/// Style attribute names for range formatting. `Hidden` is the deletion
/// attribute; deletions are range operations carrying `Hidden = true`,
/// built only by the engine itself — wire formats naming `Hidden` are
/// dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum StyleKey {
    Hidden,
    Bold,
    Italic,
    Underline,
    Strikethrough,
    FontSize,
    FontFamily,
    Color,
    BackgroundColor,
}

/// Value attached to a style key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StyleValue {
    Flag(bool),
    Number(u32),
    Text(smartstring::alias::String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_id_orders_stamp_first() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert!(OpId::new(b, 1) < OpId::new(a, 2));
        assert!(OpId::new(a, 3) < OpId::new(b, 3));
        assert_eq!(OpId::new(a, 3), OpId::new(a, 3));
    }
}
