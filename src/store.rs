//! The immortal record of every operation the engine has seen.
//!
//! Operations live in one arena and are addressed by `OpRef`; each replica
//! record maps stamps to arena handles through a sparse slot vector, written
//! at most once per stamp. Pieces and tags point back into the arena, so
//! nothing in here is ever freed or moved.

use smallvec::SmallVec;
use smartstring::alias::String as SmartString;

use crate::common::{Anchor, OpId, ReplicaId, Stamp, StyleKey, StyleValue};
use crate::ost::CellIdx;

/// Stable handle to a stored operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct OpRef(pub u32);

/// An anchor resolved against the store: the segment holding the position,
/// plus the codepoint offset inside it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct StoredAnchor {
    pub seg: OpRef,
    pub pos: usize,
}

#[derive(Debug)]
pub(crate) struct Replica {
    pub id: ReplicaId,
    /// Stamp-indexed operation slots. `None` = not arrived yet.
    pub slots: Vec<Option<OpRef>>,
}

/// One insertion: the immutable text, where it went, and the pieces it
/// currently maps to.
#[derive(Debug)]
pub(crate) struct Segment {
    pub text: SmartString,
    pub char_len: usize,
    /// Segment this insertion anchored to; `None` only for the sentinel.
    pub parent: Option<OpRef>,
    /// Codepoint position within the parent's historical text.
    pub insert_pos: usize,
    /// Child insertions into this segment, sorted by
    /// (insert_pos, stamp, replica).
    pub children: SmallVec<[OpRef; 4]>,
    /// The piece this segment's text was spliced in after.
    pub insert_piece: CellIdx,
    /// The final piece of this segment's own text.
    pub last_piece: CellIdx,
    /// Synthetic deletion hiding this insertion while it is undone.
    pub undo_op: Option<OpRef>,
}

impl Segment {
    pub fn new(text: SmartString, char_len: usize, parent: Option<OpRef>, insert_pos: usize) -> Self {
        Segment {
            text,
            char_len,
            parent,
            insert_pos,
            children: SmallVec::new(),
            insert_piece: CellIdx::NONE,
            last_piece: CellIdx::NONE,
            undo_op: None,
        }
    }
}

/// A delete or format: a styled attribute applied over `[left, right)`.
/// Deletion is the `Hidden` attribute set to true.
#[derive(Debug)]
pub(crate) struct RangeOp {
    pub key: StyleKey,
    pub value: StyleValue,
    /// Boundary tags; filled in when the operation is applied.
    pub left: CellIdx,
    pub right: CellIdx,
}

impl RangeOp {
    pub fn hidden() -> Self {
        RangeOp {
            key: StyleKey::Hidden,
            value: StyleValue::Flag(true),
            left: CellIdx::NONE,
            right: CellIdx::NONE,
        }
    }

    pub fn format(key: StyleKey, value: StyleValue) -> Self {
        // The hidden attribute is reserved for deletions built through
        // `hidden()`; the engine drops wire formats carrying it.
        debug_assert_ne!(key, StyleKey::Hidden);
        RangeOp {
            key,
            value,
            left: CellIdx::NONE,
            right: CellIdx::NONE,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.key == StyleKey::Hidden
    }
}

#[derive(Debug)]
pub(crate) enum StoredKind {
    Insert(Segment),
    Range(RangeOp),
    Undo { target: OpRef },
    Redo { target: OpRef },
}

#[derive(Debug)]
pub(crate) struct StoredOp {
    /// Index into `OpStore::replicas`.
    pub replica: u32,
    pub stamp: Stamp,
    pub has_undo: bool,
    pub kind: StoredKind,
}

#[derive(Debug)]
pub(crate) struct OpStore {
    pub replicas: Vec<Replica>,
    pub ops: Vec<StoredOp>,
    pub lamport: Stamp,
}

impl OpStore {
    pub fn new() -> Self {
        OpStore {
            replicas: Vec::new(),
            ops: Vec::new(),
            lamport: 0,
        }
    }

    pub fn replica_index(&self, id: ReplicaId) -> Option<u32> {
        self.replicas
            .iter()
            .position(|r| r.id == id)
            .map(|i| i as u32)
    }

    pub fn intern(&mut self, id: ReplicaId) -> u32 {
        if let Some(i) = self.replica_index(id) {
            i
        } else {
            self.replicas.push(Replica { id, slots: Vec::new() });
            (self.replicas.len() - 1) as u32
        }
    }

    /// Record an operation at its (replica, stamp) slot. The slot must be
    /// empty; a second store at the same OperationID is a contract
    /// violation, which public entry points rule out by checking `slot`
    /// first.
    pub fn store_op(&mut self, replica: ReplicaId, stamp: Stamp, kind: StoredKind) -> OpRef {
        let rep = self.intern(replica);
        self.lamport = self.lamport.max(stamp) + 1;

        let slots = &mut self.replicas[rep as usize].slots;
        if slots.len() <= stamp as usize {
            slots.resize(stamp as usize + 1, None);
        }
        assert!(
            slots[stamp as usize].is_none(),
            "duplicate stamp {} for replica {}",
            stamp,
            replica
        );
        let op = OpRef(self.ops.len() as u32);
        self.replicas[rep as usize].slots[stamp as usize] = Some(op);
        self.ops.push(StoredOp {
            replica: rep,
            stamp,
            has_undo: false,
            kind,
        });
        op
    }

    /// Arena-allocate an operation without giving it a slot. Used for the
    /// synthetic deletion that hides an undone insertion: it shares the
    /// insertion's (replica, stamp) for ordering, and that slot is already
    /// taken by the insertion itself.
    pub fn alloc_detached(&mut self, replica: u32, stamp: Stamp, kind: StoredKind) -> OpRef {
        let op = OpRef(self.ops.len() as u32);
        self.ops.push(StoredOp {
            replica,
            stamp,
            has_undo: false,
            kind,
        });
        op
    }

    /// Look an OperationID up; `None` when the replica is unknown or the
    /// stamp has not arrived.
    pub fn slot(&self, id: OpId) -> Option<OpRef> {
        let rep = self.replica_index(id.replica)?;
        self.replicas[rep as usize]
            .slots
            .get(id.stamp as usize)
            .copied()
            .flatten()
    }

    /// Resolve a wire anchor to a segment position. `None` when the target
    /// is missing, is not an insertion, or the offset lies outside it.
    pub fn resolve_anchor(&self, anchor: &Anchor) -> Option<StoredAnchor> {
        let op = self.slot(anchor.op_id())?;
        match &self.op(op).kind {
            StoredKind::Insert(seg) if anchor.pos < seg.char_len => Some(StoredAnchor {
                seg: op,
                pos: anchor.pos,
            }),
            _ => None,
        }
    }

    pub fn op(&self, op: OpRef) -> &StoredOp {
        &self.ops[op.0 as usize]
    }

    pub fn op_mut(&mut self, op: OpRef) -> &mut StoredOp {
        &mut self.ops[op.0 as usize]
    }

    pub fn op_id(&self, op: OpRef) -> OpId {
        let o = self.op(op);
        OpId::new(self.replicas[o.replica as usize].id, o.stamp)
    }

    pub fn seg(&self, op: OpRef) -> &Segment {
        match &self.op(op).kind {
            StoredKind::Insert(seg) => seg,
            _ => panic!("operation is not an insertion"),
        }
    }

    pub fn seg_mut(&mut self, op: OpRef) -> &mut Segment {
        match &mut self.op_mut(op).kind {
            StoredKind::Insert(seg) => seg,
            _ => panic!("operation is not an insertion"),
        }
    }

    pub fn range(&self, op: OpRef) -> &RangeOp {
        match &self.op(op).kind {
            StoredKind::Range(r) => r,
            _ => panic!("operation is not a range operation"),
        }
    }

    pub fn range_mut(&mut self, op: OpRef) -> &mut RangeOp {
        match &mut self.op_mut(op).kind {
            StoredKind::Range(r) => r,
            _ => panic!("operation is not a range operation"),
        }
    }

    /// Operation order: stamp, then replica id. Drives every conflict
    /// decision in the engine.
    pub fn lt(&self, a: OpRef, b: OpRef) -> bool {
        let (oa, ob) = (self.op(a), self.op(b));
        if oa.stamp != ob.stamp {
            return oa.stamp < ob.stamp;
        }
        self.replicas[oa.replica as usize].id < self.replicas[ob.replica as usize].id
    }

    pub fn cmp(&self, a: OpRef, b: OpRef) -> std::cmp::Ordering {
        if self.lt(a, b) {
            std::cmp::Ordering::Less
        } else if self.lt(b, a) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    }

    /// Sibling order inside one parent segment: insert position, then
    /// stamp, then replica. All replicas agree on it, which is what makes
    /// concurrent same-position insertions converge.
    pub fn sibling_lt(&self, a: OpRef, b: OpRef) -> bool {
        let (sa, sb) = (self.seg(a), self.seg(b));
        if sa.insert_pos != sb.insert_pos {
            return sa.insert_pos < sb.insert_pos;
        }
        self.lt(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn store_and_lookup() {
        let mut store = OpStore::new();
        let r = Uuid::from_u128(7);
        let op = store.store_op(r, 3, StoredKind::Range(RangeOp::hidden()));
        assert_eq!(store.lamport, 4);
        assert_eq!(store.slot(OpId::new(r, 3)), Some(op));
        assert_eq!(store.slot(OpId::new(r, 2)), None);
        assert_eq!(store.slot(OpId::new(r, 9)), None);
        assert_eq!(store.slot(OpId::new(Uuid::from_u128(8), 3)), None);
        assert_eq!(store.op_id(op), OpId::new(r, 3));
    }

    #[test]
    fn anchors_only_resolve_to_insertions() {
        let mut store = OpStore::new();
        let r = Uuid::from_u128(7);
        let seg = store.store_op(
            r,
            0,
            StoredKind::Insert(Segment::new("abc".into(), 3, None, 0)),
        );
        store.store_op(r, 1, StoredKind::Range(RangeOp::hidden()));

        let ok = store.resolve_anchor(&Anchor::new(r, 0, 2)).unwrap();
        assert_eq!(ok, StoredAnchor { seg, pos: 2 });
        // Offset past the end of the insertion.
        assert!(store.resolve_anchor(&Anchor::new(r, 0, 3)).is_none());
        // Not an insertion.
        assert!(store.resolve_anchor(&Anchor::new(r, 1, 0)).is_none());
        // Unknown stamp.
        assert!(store.resolve_anchor(&Anchor::new(r, 5, 0)).is_none());
    }

    #[test]
    fn operation_order_is_stamp_then_replica() {
        let mut store = OpStore::new();
        let r1 = Uuid::from_u128(1);
        let r2 = Uuid::from_u128(2);
        let a = store.store_op(r2, 1, StoredKind::Range(RangeOp::hidden()));
        let b = store.store_op(r1, 2, StoredKind::Range(RangeOp::hidden()));
        let c = store.store_op(r1, 1, StoredKind::Range(RangeOp::hidden()));
        assert!(store.lt(a, b));
        assert!(store.lt(c, a));
        assert!(!store.lt(a, a));
    }

    #[test]
    #[should_panic(expected = "duplicate stamp")]
    fn duplicate_stamp_is_a_contract_violation() {
        let mut store = OpStore::new();
        let r = Uuid::from_u128(7);
        store.store_op(r, 1, StoredKind::Range(RangeOp::hidden()));
        store.store_op(r, 1, StoredKind::Range(RangeOp::hidden()));
    }
}
