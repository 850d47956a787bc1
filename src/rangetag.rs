//! Boundary tags for range operations.
//!
//! Each delete or format contributes a left and a right tag; the tag tree
//! keeps every boundary ordered along the historical axis so undo and redo
//! can walk exactly the tags an operation's interval crosses. Tag order
//! depends on the live piece tree, so the comparator is built per insertion.

use crate::ost::{CellIdx, StableSet};
use crate::pieces::{PieceCursor, PieceTree};
use crate::store::{OpRef, OpStore, StoredAnchor};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum TagStatus {
    /// Contributes to the layered range state.
    Active,
    /// Suppressed by a user-level undo of its operation.
    Undone,
    /// Fully shadowed by a coincident newer operation; contributes nothing.
    UnUsed,
}

/// "Previous active operation" pointer of a tag. `Bad` means the value is
/// unknown and must be recomputed before the tag can be trusted; tags are
/// born that way and leave the state when their operation first applies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum OldOp {
    None,
    Op(OpRef),
    Bad,
}

impl OldOp {
    pub fn from_option(op: Option<OpRef>) -> Self {
        match op {
            Some(op) => OldOp::Op(op),
            None => OldOp::None,
        }
    }

    pub fn is_good(self) -> bool {
        !matches!(self, OldOp::Bad)
    }

    /// The concrete pointer; must not be called on `Bad`.
    pub fn as_option(self) -> Option<OpRef> {
        match self {
            OldOp::None => None,
            OldOp::Op(op) => Some(op),
            OldOp::Bad => {
                debug_assert!(false, "reading a bad old pointer");
                None
            }
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct RangeTag {
    pub is_left: bool,
    pub status: TagStatus,
    pub anchor: StoredAnchor,
    /// The range operation this tag belongs to.
    pub cur: OpRef,
    /// Newest active operation strictly older than `cur` at this boundary.
    pub old: OldOp,
}

impl RangeTag {
    pub fn new(is_left: bool, anchor: StoredAnchor, cur: OpRef) -> Self {
        RangeTag {
            is_left,
            status: TagStatus::Active,
            anchor,
            cur,
            old: OldOp::Bad,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TagTree {
    set: StableSet<RangeTag>,
}

impl TagTree {
    pub fn new() -> Self {
        TagTree {
            set: StableSet::new(),
        }
    }

    pub fn get(&self, tag: CellIdx) -> &RangeTag {
        self.set.get(tag)
    }

    pub fn get_mut(&mut self, tag: CellIdx) -> &mut RangeTag {
        self.set.get_mut(tag)
    }

    pub fn next(&self, tag: CellIdx) -> CellIdx {
        self.set.next(tag)
    }

    pub fn prev(&self, tag: CellIdx) -> CellIdx {
        self.set.prev(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellIdx, &RangeTag)> {
        self.set.iter()
    }

    /// Insert both boundary tags of an operation. The right tag goes in
    /// first: adding the left one may split the interior, and the right
    /// tag's piece must not move under it.
    pub fn apply(
        &mut self,
        pieces: &mut PieceTree,
        store: &OpStore,
        left: RangeTag,
        right: RangeTag,
    ) -> ((CellIdx, PieceCursor), (CellIdx, PieceCursor)) {
        let right_res = self.add_tag(pieces, store, right);
        let left_res = self.add_tag(pieces, store, left);
        (left_res, right_res)
    }

    fn add_tag(
        &mut self,
        pieces: &mut PieceTree,
        store: &OpStore,
        tag: RangeTag,
    ) -> (CellIdx, PieceCursor) {
        let mut piece_it = pieces.find_anchor(store, tag.anchor);
        let pos = tag.anchor.pos - pieces.get(piece_it.cell).seg_pos;
        if pos != 0 {
            let left = pieces.split(store, piece_it, pos);
            piece_it = pieces.next(left);
        }
        let history_pos = piece_it.pos.total;

        let pieces_ref: &PieceTree = pieces;
        let cell = self.set.insert(tag, |a, b| {
            // `b` is the tag being inserted; its projection is the
            // history_pos captured above.
            if a.anchor.seg == b.anchor.seg {
                if a.anchor.pos != b.anchor.pos {
                    return a.anchor.pos < b.anchor.pos;
                }
            } else {
                let a_pos = pieces_ref.history_offset(store, a.anchor);
                if a_pos != history_pos {
                    return a_pos < history_pos;
                }
            }
            // Coincident boundaries nest: a right tag closes before a left
            // tag opens, newer intervals sit inside older ones.
            if a.is_left != b.is_left {
                return b.is_left;
            }
            if a.is_left {
                store.lt(b.cur, a.cur)
            } else {
                store.lt(a.cur, b.cur)
            }
        });
        (cell, piece_it)
    }
}
