//! The CRDT engine.
//!
//! Wires the operation store, the piece tree and the two tag trees together
//! and implements the apply/undo/redo protocols. All public calls are
//! synchronous and infallible: anything unresolvable is dropped, per the
//! convergence rules (the caller re-delivers once causal prerequisites
//! arrive).

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::common::{Anchor, OpId, ReplicaId, Stamp, StyleKey, StyleValue};
use crate::operation::{Deletion, Formatting, Insertion, Operation, RedoOperation, UndoOperation};
use crate::ost::CellIdx;
use crate::pieces::PieceTree;
use crate::rangetag::{OldOp, RangeTag, TagStatus, TagTree};
use crate::store::{OpRef, OpStore, RangeOp, Segment, StoredAnchor, StoredKind};
use crate::unicount::count_chars;

const SENTINEL_TEXT: &str = "EOF";

/// Replica id owning the sentinel segment. Shared by every engine so that
/// anchors into an empty document resolve on all replicas.
const ROOT_REPLICA: ReplicaId = Uuid::nil();

/// A collaborative plain-text document.
///
/// ```
/// use braidtext::TextCrdt;
///
/// let mut doc = TextCrdt::new();
/// doc.local_insert(0, "hello world");
/// let del = doc.local_delete(5, 6);
/// assert_eq!(doc.to_string(), "hello");
/// doc.local_undo(del);
/// assert_eq!(doc.to_string(), "hello world");
/// ```
#[derive(Debug)]
pub struct TextCrdt {
    store: OpStore,
    pieces: PieceTree,
    deletions: TagTree,
    formats: TagTree,
    local_id: ReplicaId,
    sentinel: OpRef,
}

/// One piece of the document, visible or tombstoned, as yielded by
/// [`TextCrdt::pieces`].
#[derive(Debug, Copy, Clone)]
pub struct PieceSlice<'a> {
    pub text: &'a str,
    pub removed: bool,
}

impl TextCrdt {
    pub fn new() -> Self {
        Self::with_replica_id(Uuid::new_v4())
    }

    /// Build an engine with a caller-chosen replica id. Useful for tests
    /// and for embedders that persist identity across sessions.
    pub fn with_replica_id(id: ReplicaId) -> Self {
        let mut store = OpStore::new();
        let sentinel = store.store_op(
            ROOT_REPLICA,
            0,
            StoredKind::Insert(Segment::new(
                SENTINEL_TEXT.into(),
                count_chars(SENTINEL_TEXT),
                None,
                0,
            )),
        );
        let pieces = PieceTree::new(&mut store, sentinel);
        TextCrdt {
            store,
            pieces,
            deletions: TagTree::new(),
            formats: TagTree::new(),
            local_id: id,
            sentinel,
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.local_id
    }

    /// The stamp the next locally generated operation will carry.
    pub fn next_stamp(&self) -> Stamp {
        self.store.lamport
    }

    /// Visible length in codepoints. The sentinel does not count.
    pub fn len(&self) -> usize {
        self.pieces.prev(self.pieces.end()).pos.visible
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Anchor of the codepoint at a visible position. `pos == len()` names
    /// the end of the document.
    pub fn anchor(&self, pos: usize) -> Anchor {
        self.pieces.anchor(&self.store, pos)
    }

    /// Anchor of the codepoint at a historical (tombstone-included)
    /// position.
    pub fn history_anchor(&self, pos: usize) -> Anchor {
        self.pieces.history_anchor(&self.store, pos)
    }

    /// Forward iteration over pieces in document order, tombstoned ones
    /// included. The sentinel is skipped.
    pub fn pieces(&self) -> impl Iterator<Item = PieceSlice<'_>> {
        let sentinel = self.sentinel;
        self.pieces
            .iter()
            .filter(move |(_, p)| p.seg != sentinel)
            .map(move |(_, p)| PieceSlice {
                text: &self.store.seg(p.seg).text[p.byte_start..p.byte_start + p.byte_len],
                removed: p.is_removed(),
            })
    }

    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::Insert(op) => self.insert(op),
            Operation::Delete(op) => self.del(op),
            Operation::Format(op) => self.format(op),
            Operation::Undo(op) => self.undo(op),
            Operation::Redo(op) => self.redo(op),
        }
    }

    pub fn insert(&mut self, op: &Insertion) {
        if self.store.slot(OpId::new(op.replica, op.stamp)).is_some() {
            return;
        }
        let Some(anchor) = self.store.resolve_anchor(&op.anchor) else {
            return;
        };
        let char_len = count_chars(&op.text);
        let seg = Segment::new(op.text.clone(), char_len, Some(anchor.seg), anchor.pos);
        let seg_ref = self
            .store
            .store_op(op.replica, op.stamp, StoredKind::Insert(seg));
        self.pieces.insert(&mut self.store, seg_ref);
    }

    pub fn del(&mut self, op: &Deletion) {
        if self.store.slot(OpId::new(op.replica, op.stamp)).is_some() {
            return;
        }
        let Some(begin) = self.store.resolve_anchor(&op.begin) else {
            return;
        };
        let Some(end) = self.store.resolve_anchor(&op.end) else {
            return;
        };
        let op_ref = self
            .store
            .store_op(op.replica, op.stamp, StoredKind::Range(RangeOp::hidden()));
        let (lp, rp) = self.apply_range(op_ref, begin, end);
        self.redo_range_op(op_ref);
        self.pieces.update_range(lp, rp);
    }

    pub fn format(&mut self, op: &Formatting) {
        // Deletion travels as its own wire type; a format record carrying
        // the hidden attribute would route through the deletion machinery
        // and hide text, so it is dropped like any other malformed record.
        if op.key == StyleKey::Hidden {
            return;
        }
        if self.store.slot(OpId::new(op.replica, op.stamp)).is_some() {
            return;
        }
        let Some(begin) = self.store.resolve_anchor(&op.begin) else {
            return;
        };
        let Some(end) = self.store.resolve_anchor(&op.end) else {
            return;
        };
        let op_ref = self.store.store_op(
            op.replica,
            op.stamp,
            StoredKind::Range(RangeOp::format(op.key, op.value.clone())),
        );
        let (lp, rp) = self.apply_range(op_ref, begin, end);
        self.redo_range_op(op_ref);
        self.pieces.update_range(lp, rp);
    }

    pub fn undo(&mut self, op: &UndoOperation) {
        if self.store.slot(OpId::new(op.replica, op.stamp)).is_some() {
            return;
        }
        let Some(mut target) = self.store.slot(op.target) else {
            return;
        };
        if self.store.op(target).has_undo {
            return;
        }
        let wrapper = match &self.store.op(target).kind {
            StoredKind::Undo { target: inner } => Some((true, *inner)),
            StoredKind::Redo { target: inner } => Some((false, *inner)),
            _ => None,
        };
        if let Some((was_undo, inner)) = wrapper {
            self.store.op_mut(target).has_undo = true;
            if was_undo {
                // Undoing an undo means redoing its target. The rewrite
                // keeps derived undo-of-undo records off the wire.
                let inner_id = self.store.op_id(inner);
                self.redo(&RedoOperation {
                    replica: op.replica,
                    stamp: op.stamp,
                    target: inner_id,
                });
                return;
            }
            target = inner;
            if self.store.op(target).has_undo {
                return;
            }
        }
        self.store
            .store_op(op.replica, op.stamp, StoredKind::Undo { target });
        self.undo_stored(target);
    }

    pub fn redo(&mut self, op: &RedoOperation) {
        if self.store.slot(OpId::new(op.replica, op.stamp)).is_some() {
            return;
        }
        let Some(mut target) = self.store.slot(op.target) else {
            return;
        };
        if !self.store.op(target).has_undo {
            return;
        }
        let wrapper = match &self.store.op(target).kind {
            StoredKind::Undo { target: inner } => Some((true, *inner)),
            StoredKind::Redo { target: inner } => Some((false, *inner)),
            _ => None,
        };
        if let Some((was_undo, inner)) = wrapper {
            self.store.op_mut(target).has_undo = false;
            if was_undo {
                // Redoing an undo re-applies it: undo the target again.
                let inner_id = self.store.op_id(inner);
                self.undo(&UndoOperation {
                    replica: op.replica,
                    stamp: op.stamp,
                    target: inner_id,
                });
                return;
            }
            target = inner;
            if !self.store.op(target).has_undo {
                return;
            }
        }
        self.store
            .store_op(op.replica, op.stamp, StoredKind::Redo { target });
        self.redo_stored(target);
    }

    // -- local-edit conveniences -------------------------------------------

    /// Insert at a visible position with a locally allocated stamp.
    pub fn local_insert(&mut self, pos: usize, text: &str) -> OpId {
        let anchor = self.anchor(pos);
        let stamp = self.next_stamp();
        self.insert(&Insertion {
            replica: self.local_id,
            stamp,
            anchor,
            text: text.into(),
        });
        OpId::new(self.local_id, stamp)
    }

    /// Delete `len` codepoints starting at a visible position.
    pub fn local_delete(&mut self, pos: usize, len: usize) -> OpId {
        let begin = self.anchor(pos);
        let end = self.anchor(pos + len);
        let stamp = self.next_stamp();
        self.del(&Deletion {
            replica: self.local_id,
            stamp,
            begin,
            end,
        });
        OpId::new(self.local_id, stamp)
    }

    pub fn local_format(&mut self, pos: usize, len: usize, key: StyleKey, value: StyleValue) -> OpId {
        let begin = self.anchor(pos);
        let end = self.anchor(pos + len);
        let stamp = self.next_stamp();
        self.format(&Formatting {
            replica: self.local_id,
            stamp,
            begin,
            end,
            key,
            value,
        });
        OpId::new(self.local_id, stamp)
    }

    pub fn local_undo(&mut self, target: OpId) -> OpId {
        let stamp = self.next_stamp();
        self.undo(&UndoOperation {
            replica: self.local_id,
            stamp,
            target,
        });
        OpId::new(self.local_id, stamp)
    }

    pub fn local_redo(&mut self, target: OpId) -> OpId {
        let stamp = self.next_stamp();
        self.redo(&RedoOperation {
            replica: self.local_id,
            stamp,
            target,
        });
        OpId::new(self.local_id, stamp)
    }

    // -- internals ---------------------------------------------------------

    fn undo_stored(&mut self, target: OpRef) {
        if matches!(self.store.op(target).kind, StoredKind::Insert(_)) {
            self.undo_insertion(target);
        } else if matches!(self.store.op(target).kind, StoredKind::Range(_)) {
            self.undo_range_full(target);
        } else {
            debug_assert!(false, "cannot undo an undo/redo record directly");
        }
    }

    fn redo_stored(&mut self, target: OpRef) {
        if matches!(self.store.op(target).kind, StoredKind::Insert(_)) {
            self.redo_insertion(target);
        } else if matches!(self.store.op(target).kind, StoredKind::Range(_)) {
            self.redo_range_full(target);
        } else {
            debug_assert!(false, "cannot redo an undo/redo record directly");
        }
    }

    fn undo_range_full(&mut self, target: OpRef) {
        let covered = self.undo_range_op(target);
        // Operations that were fully shadowed by the one we just lifted get
        // another chance to apply, newest first.
        for op in covered {
            self.redo_range_op(op);
        }
        self.refresh_range_summaries(target);
    }

    fn redo_range_full(&mut self, target: OpRef) {
        self.redo_range_op(target);
        self.refresh_range_summaries(target);
    }

    /// Undoing an insertion hides the whole inserted run behind a synthetic
    /// deletion, created on first use and toggled afterwards.
    fn undo_insertion(&mut self, target: OpRef) {
        let cached = self.store.seg(target).undo_op;
        match cached {
            Some(undo_op) => {
                self.redo_range_full(undo_op);
            }
            None => {
                let (replica, stamp) = {
                    let o = self.store.op(target);
                    (o.replica, o.stamp)
                };
                let len = self.store.seg(target).char_len;
                let undo_op =
                    self.store
                        .alloc_detached(replica, stamp, StoredKind::Range(RangeOp::hidden()));
                self.store.seg_mut(target).undo_op = Some(undo_op);
                let begin = StoredAnchor { seg: target, pos: 0 };
                let end = StoredAnchor {
                    seg: target,
                    pos: len.saturating_sub(1),
                };
                let (lp, rp) = self.apply_range(undo_op, begin, end);
                self.redo_range_op(undo_op);
                self.pieces.update_range(lp, rp);
            }
        }
        self.store.op_mut(target).has_undo = true;
    }

    fn redo_insertion(&mut self, target: OpRef) {
        if let Some(undo_op) = self.store.seg(target).undo_op {
            self.undo_range_full(undo_op);
        }
        self.store.op_mut(target).has_undo = false;
    }

    /// Insert both boundary tags for a range operation and seed the
    /// endpoint `old` pointers from the neighbouring pieces' tombstones.
    /// Returns the boundary piece cells for the later summary refresh.
    fn apply_range(
        &mut self,
        op: OpRef,
        begin: StoredAnchor,
        end: StoredAnchor,
    ) -> (CellIdx, CellIdx) {
        let TextCrdt {
            store,
            pieces,
            deletions,
            formats,
            ..
        } = self;
        let hidden = store.range(op).is_hidden();
        let tree = if hidden { deletions } else { formats };

        let ((left_tag, left_piece), (right_tag, right_piece)) = tree.apply(
            pieces,
            store,
            RangeTag::new(true, begin, op),
            RangeTag::new(false, end, op),
        );

        if begin == end {
            // Zero-width interval. The right tag orders before the left tag
            // at a shared point, so there is no interior to walk; the tags
            // stay inert.
            tree.get_mut(left_tag).status = TagStatus::UnUsed;
            tree.get_mut(right_tag).status = TagStatus::UnUsed;
        } else if !hidden {
            // Formats carry no per-piece state to consult, so their
            // boundaries start with no older layer; crossings established
            // during the walk still build the nesting chain.
            tree.get_mut(left_tag).old = OldOp::None;
            tree.get_mut(right_tag).old = OldOp::None;
        } else {
            if left_piece.cell != pieces.begin().cell {
                let before = pieces.prev(left_piece);
                match pieces.get(before.cell).tombstone {
                    None => tree.get_mut(left_tag).old = OldOp::None,
                    Some(t) => {
                        let t_right = store.range(t).right;
                        debug_assert!(tree.get(t_right).old.is_good());
                        if tree.get(t_right).anchor != begin {
                            if store.lt(t, op) {
                                tree.get_mut(left_tag).old = OldOp::Op(t);
                            }
                        } else {
                            // The covering operation ends exactly where we
                            // start; whatever was newest past its right edge
                            // is newest at our left edge too.
                            let t_old = tree.get(t_right).old;
                            let adopt = match t_old {
                                OldOp::None => true,
                                OldOp::Op(o) => store.lt(o, op),
                                OldOp::Bad => false,
                            };
                            if adopt {
                                debug_assert_eq!(tree.get(t_right).status, TagStatus::Active);
                                tree.get_mut(left_tag).old = t_old;
                            }
                        }
                    }
                }
            }
            match pieces.get(right_piece.cell).tombstone {
                None => tree.get_mut(right_tag).old = OldOp::None,
                Some(t) => {
                    let t_left = store.range(t).left;
                    debug_assert!(tree.get(t_left).old.is_good());
                    if tree.get(t_left).anchor != end {
                        if store.lt(t, op) {
                            tree.get_mut(right_tag).old = OldOp::Op(t);
                        }
                    } else {
                        let t_old = tree.get(t_left).old;
                        let adopt = match t_old {
                            OldOp::None => true,
                            OldOp::Op(o) => store.lt(o, op),
                            OldOp::Bad => false,
                        };
                        if adopt {
                            debug_assert_eq!(tree.get(t_left).status, TagStatus::Active);
                            tree.get_mut(right_tag).old = t_old;
                        }
                    }
                }
            }
        }

        let range = store.range_mut(op);
        range.left = left_tag;
        range.right = right_tag;
        (left_piece.cell, right_piece.cell)
    }

    /// Re-apply a range operation: set tombstones over its interval and
    /// splice its tags into the layered `old` chains, crossing any newer
    /// operations whose previous layer it now shadows.
    fn redo_range_op(&mut self, op: OpRef) {
        let TextCrdt {
            store,
            pieces,
            deletions,
            formats,
            ..
        } = self;
        store.op_mut(op).has_undo = false;
        let hidden = store.range(op).is_hidden();
        let tree = if hidden { deletions } else { formats };
        let (left, right) = {
            let r = store.range(op);
            (r.left, r.right)
        };

        if tree.get(left).anchor == tree.get(right).anchor {
            tree.get_mut(left).status = TagStatus::UnUsed;
            tree.get_mut(right).status = TagStatus::UnUsed;
            return;
        }

        let mut has_across = false;
        let mut first_across: Option<CellIdx> = None;
        let mut last_across: Option<CellIdx> = None;

        let mut piece = pieces.find_anchor(store, tree.get(left).anchor);
        let mut it = tree.next(left);
        loop {
            let tag_anchor = tree.get(it).anchor;
            loop {
                let p = pieces.get(piece.cell);
                if p.seg == tag_anchor.seg && p.seg_pos == tag_anchor.pos {
                    break;
                }
                if hidden && p.tombstone.map_or(true, |t| store.lt(t, op)) {
                    pieces.get_mut(piece.cell).tombstone = Some(op);
                }
                piece = pieces.next(piece);
                debug_assert!(piece.cell.exists());
            }
            if it == right {
                break;
            }
            let tag = *tree.get(it);
            if !matches!(tag.status, TagStatus::Undone | TagStatus::UnUsed) {
                let old_older = match tag.old {
                    OldOp::None => true,
                    OldOp::Op(o) => store.lt(o, op),
                    OldOp::Bad => {
                        debug_assert!(false, "active tag with a bad old pointer");
                        false
                    }
                };
                if old_older && store.lt(op, tag.cur) {
                    has_across = true;
                    if first_across.is_none() {
                        first_across = Some(it);
                    }
                    if let Some(last) = last_across {
                        if first_across != Some(last) {
                            tree.get_mut(last).old = OldOp::Op(op);
                        }
                    }
                    last_across = Some(it);
                }
            }
            it = tree.next(it);
        }

        if !has_across {
            if tree.get(left).old.is_good() && tree.get(right).old.is_good() {
                tree.get_mut(left).status = TagStatus::Active;
                tree.get_mut(right).status = TagStatus::Active;
            } else {
                // Fully covered by a newer operation sharing both
                // endpoints; the tags contribute nothing for now.
                tree.get_mut(left).status = TagStatus::UnUsed;
                tree.get_mut(right).status = TagStatus::UnUsed;
            }
            return;
        }

        tree.get_mut(left).status = TagStatus::Active;
        tree.get_mut(right).status = TagStatus::Active;
        let first = first_across.unwrap();
        let last = last_across.unwrap();

        if tree.get(left).old == OldOp::Bad {
            // Rebuild the left boundary's previous layer by unwinding the
            // active intervals between it and the first crossed tag.
            let mut newest = tree.get(first).old.as_option();
            let mut it = tree.prev(first);
            while it != left {
                let tag = *tree.get(it);
                if !matches!(tag.status, TagStatus::Undone | TagStatus::UnUsed) {
                    if tag.is_left && Some(tag.cur) == newest {
                        newest = tag.old.as_option();
                    } else if !tag.is_left
                        && newest.map_or(true, |n| store.lt(n, tag.cur))
                        && store.lt(tag.cur, op)
                    {
                        debug_assert_eq!(tag.old.as_option(), newest);
                        newest = Some(tag.cur);
                    }
                }
                it = tree.prev(it);
            }
            tree.get_mut(left).old = OldOp::from_option(newest);
        }

        if tree.get(right).old == OldOp::Bad {
            let mut newest = tree.get(last).old.as_option();
            let mut it = tree.next(last);
            while it != right {
                let tag = *tree.get(it);
                if !matches!(tag.status, TagStatus::Undone | TagStatus::UnUsed) {
                    if !tag.is_left && Some(tag.cur) == newest {
                        newest = tag.old.as_option();
                    } else if tag.is_left
                        && store.lt(tag.cur, op)
                        && newest.map_or(true, |n| store.lt(n, tag.cur))
                    {
                        debug_assert_eq!(tag.old.as_option(), newest);
                        newest = Some(tag.cur);
                    }
                }
                it = tree.next(it);
            }
            tree.get_mut(right).old = OldOp::from_option(newest);
        }

        tree.get_mut(first).old = OldOp::Op(op);
        tree.get_mut(last).old = OldOp::Op(op);
        debug_assert_eq!(
            tree.get(left).old.is_good(),
            tree.get(right).old.is_good()
        );
    }

    /// Suppress a range operation: revert its tombstones to the layer
    /// beneath it, repair the `old` chains through its interval, and report
    /// which shadowed operations become applicable again.
    fn undo_range_op(&mut self, op: OpRef) -> Vec<OpRef> {
        let TextCrdt {
            store,
            pieces,
            deletions,
            formats,
            ..
        } = self;
        store.op_mut(op).has_undo = true;
        let hidden = store.range(op).is_hidden();
        let tree = if hidden { deletions } else { formats };
        let (left, right) = {
            let r = store.range(op);
            (r.left, r.right)
        };

        if tree.get(left).status == TagStatus::UnUsed
            || tree.get(right).status == TagStatus::UnUsed
        {
            // Nothing was active.
            tree.get_mut(left).status = TagStatus::Undone;
            tree.get_mut(right).status = TagStatus::Undone;
            return Vec::new();
        }
        tree.get_mut(left).status = TagStatus::Undone;
        tree.get_mut(right).status = TagStatus::Undone;

        // Shadowed operations must be fully covered by this one, so the
        // candidates are exactly the unused left tags met on this sweep
        // whose right tags are met before it ends.
        let mut unused_ops: HashSet<OpRef> = HashSet::new();
        let mut covered: Vec<OpRef> = Vec::new();

        let mut newest = tree.get(left).old.as_option();
        let mut piece = pieces.find_anchor(store, tree.get(left).anchor);
        let mut it = tree.next(left);
        loop {
            let tag_anchor = tree.get(it).anchor;
            loop {
                let p = pieces.get(piece.cell);
                if p.seg == tag_anchor.seg && p.seg_pos == tag_anchor.pos {
                    break;
                }
                if hidden && p.tombstone == Some(op) {
                    pieces.get_mut(piece.cell).tombstone = newest;
                }
                piece = pieces.next(piece);
                debug_assert!(piece.cell.exists());
            }
            if it == right {
                break;
            }
            let tag = *tree.get(it);
            let skip = tag.status == TagStatus::Undone
                || (tag.status == TagStatus::UnUsed && store.lt(op, tag.cur))
                || (tag.status == TagStatus::Active
                    && matches!(tag.old, OldOp::Op(o) if store.lt(op, o)));
            if !skip {
                if tag.old == OldOp::Op(op) {
                    tree.get_mut(it).old = OldOp::from_option(newest);
                } else if tag.is_left {
                    if tag.status == TagStatus::UnUsed {
                        unused_ops.insert(tag.cur);
                        if newest.map_or(true, |n| store.lt(n, tag.cur)) {
                            tree.get_mut(it).old = OldOp::from_option(newest);
                        } else {
                            tree.get_mut(it).old = OldOp::Bad;
                        }
                    } else if newest.map_or(true, |n| store.lt(n, tag.cur)) {
                        debug_assert_eq!(tag.old.as_option(), newest);
                        newest = Some(tag.cur);
                    }
                } else if tag.status == TagStatus::UnUsed {
                    if unused_ops.contains(&tag.cur) {
                        covered.push(tag.cur);
                        if newest.map_or(true, |n| store.lt(n, tag.cur)) {
                            tree.get_mut(it).old = OldOp::from_option(newest);
                        } else {
                            tree.get_mut(it).old = OldOp::Bad;
                        }
                    }
                } else if Some(tag.cur) == newest {
                    newest = tag.old.as_option();
                }
            }
            it = tree.next(it);
        }

        covered.sort_by(|a, b| store.cmp(*b, *a));
        covered
    }

    /// Recompute piece summaries across an operation's interval after a
    /// batch of tombstone flips.
    fn refresh_range_summaries(&mut self, op: OpRef) {
        let hidden = self.store.range(op).is_hidden();
        let (left, right) = {
            let r = self.store.range(op);
            (r.left, r.right)
        };
        let tree = if hidden { &self.deletions } else { &self.formats };
        let la = tree.get(left).anchor;
        let ra = tree.get(right).anchor;
        let lp = self.pieces.find_anchor(&self.store, la);
        let rp = self.pieces.find_anchor(&self.store, ra);
        self.pieces.update_range(lp.cell, rp.cell);
    }

    /// Deep structural validation: piece partitioning, sibling order, tag
    /// state, and the tombstone invariant against a reconstruction from the
    /// stored operations. Test/debug only; panics on violation.
    #[cfg(any(test, debug_assertions))]
    pub fn dbg_check(&self) {
        self.pieces.dbg_check(&self.store);

        for (i, op) in self.store.ops.iter().enumerate() {
            if let StoredKind::Insert(seg) = &op.kind {
                for pair in seg.children.windows(2) {
                    assert!(
                        self.store.sibling_lt(pair[0], pair[1]),
                        "sibling order violated in segment {i}"
                    );
                }
            }
        }

        for tree in [&self.deletions, &self.formats] {
            for (_, tag) in tree.iter() {
                if tag.status == TagStatus::Active {
                    assert!(tag.old.is_good(), "active tag with a bad old pointer");
                }
            }
        }

        // Both tags of an applied range operation share a status.
        for op in self.store.ops.iter() {
            if let StoredKind::Range(r) = &op.kind {
                if !r.left.exists() {
                    continue;
                }
                let tree = if r.is_hidden() {
                    &self.deletions
                } else {
                    &self.formats
                };
                assert_eq!(tree.get(r.left).status, tree.get(r.right).status);
            }
        }

        // Tombstone invariant: each piece's tombstone is the newest
        // not-undone deletion covering it, or none.
        let mut starts: Vec<(CellIdx, usize)> = Vec::new();
        {
            let mut total = 0usize;
            for (cell, piece) in self.pieces.iter() {
                starts.push((cell, total));
                total += piece.len;
            }
        }
        let mut expected: Vec<Option<OpRef>> = vec![None; starts.len()];
        for (i, op) in self.store.ops.iter().enumerate() {
            let StoredKind::Range(r) = &op.kind else { continue };
            if !r.is_hidden() || op.has_undo || !r.left.exists() {
                continue;
            }
            let op_ref = OpRef(i as u32);
            let l = self
                .pieces
                .history_offset(&self.store, self.deletions.get(r.left).anchor);
            let rgt = self
                .pieces
                .history_offset(&self.store, self.deletions.get(r.right).anchor);
            for (slot, &(_, start)) in starts.iter().enumerate() {
                if start >= l && start < rgt {
                    let newer = match expected[slot] {
                        None => true,
                        Some(cur) => self.store.lt(cur, op_ref),
                    };
                    if newer {
                        expected[slot] = Some(op_ref);
                    }
                }
            }
        }
        for (slot, &(cell, _)) in starts.iter().enumerate() {
            let piece = self.pieces.get(cell);
            if piece.len == 0 {
                // Zero-width pieces sit on boundaries; their tombstone is
                // unobservable either way.
                continue;
            }
            assert_eq!(
                piece.tombstone, expected[slot],
                "tombstone mismatch on piece at slot {slot}"
            );
        }
    }
}

impl Default for TextCrdt {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TextCrdt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (_, piece) in self.pieces.iter() {
            if piece.seg == self.sentinel || piece.is_removed() {
                continue;
            }
            let seg = self.store.seg(piece.seg);
            f.write_str(&seg.text[piece.byte_start..piece.byte_start + piece.byte_len])?;
        }
        Ok(())
    }
}
