//! The piece tree: the document's shape.
//!
//! Segments get carved into pieces as concurrent insertions and range
//! boundaries split them. The tree orders pieces and summarises each by a
//! (total, visible) pair, so positions can be resolved against either the
//! historical text (tombstones included) or the visible text.

use std::ops::{Add, Sub};

use crate::ost::{CellIdx, SeqCursor, SequenceTree, Summarize};
use crate::store::{OpRef, OpStore, StoredAnchor};
use crate::unicount::chars_to_bytes;
use crate::common::Anchor;

/// Per-piece summary. `total` counts every codepoint, `visible` only those
/// not hidden by a tombstone. Summed up the tree, the pair indexes both
/// coordinate systems at once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) struct PieceInfo {
    pub total: usize,
    pub visible: usize,
}

impl Add for PieceInfo {
    type Output = PieceInfo;
    fn add(self, rhs: PieceInfo) -> PieceInfo {
        PieceInfo {
            total: self.total + rhs.total,
            visible: self.visible + rhs.visible,
        }
    }
}

impl Sub for PieceInfo {
    type Output = PieceInfo;
    fn sub(self, rhs: PieceInfo) -> PieceInfo {
        PieceInfo {
            total: self.total - rhs.total,
            visible: self.visible - rhs.visible,
        }
    }
}

/// A contiguous codepoint run inside one segment.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub seg: OpRef,
    /// Byte range of this piece inside the segment's text.
    pub byte_start: usize,
    pub byte_len: usize,
    /// Codepoint length and codepoint offset within the segment.
    pub len: usize,
    pub seg_pos: usize,
    /// The newest active deletion hiding this piece, if any.
    pub tombstone: Option<OpRef>,
}

impl Piece {
    pub fn is_removed(&self) -> bool {
        self.tombstone.is_some()
    }
}

impl Summarize for Piece {
    type Summary = PieceInfo;

    fn summary(&self) -> PieceInfo {
        PieceInfo {
            total: self.len,
            visible: if self.is_removed() { 0 } else { self.len },
        }
    }
}

pub(crate) type PieceCursor = SeqCursor<PieceInfo>;

#[derive(Debug)]
pub(crate) struct PieceTree {
    seq: SequenceTree<Piece>,
}

impl PieceTree {
    /// Build a tree holding the sentinel segment as its only piece. Every
    /// well-formed anchor resolves strictly before it.
    pub fn new(store: &mut OpStore, sentinel: OpRef) -> Self {
        let mut tree = PieceTree {
            seq: SequenceTree::new(),
        };
        let seg = store.seg(sentinel);
        let piece = Piece {
            seg: sentinel,
            byte_start: 0,
            byte_len: seg.text.len(),
            len: seg.char_len,
            seg_pos: 0,
            tombstone: None,
        };
        let end = tree.seq.end();
        let it = tree.seq.insert_before(end, piece);
        store.seg_mut(sentinel).last_piece = it.cell;
        tree
    }

    pub fn get(&self, cell: CellIdx) -> &Piece {
        self.seq.get(cell)
    }

    pub fn get_mut(&mut self, cell: CellIdx) -> &mut Piece {
        self.seq.get_mut(cell)
    }

    pub fn begin(&self) -> PieceCursor {
        self.seq.begin()
    }

    pub fn end(&self) -> PieceCursor {
        self.seq.end()
    }

    pub fn next(&self, cur: PieceCursor) -> PieceCursor {
        self.seq.next(cur)
    }

    pub fn prev(&self, cur: PieceCursor) -> PieceCursor {
        self.seq.prev(cur)
    }

    pub fn cursor_at(&self, cell: CellIdx) -> PieceCursor {
        self.seq.cursor_at(cell)
    }

    pub fn update_range(&mut self, from: CellIdx, to: CellIdx) {
        self.seq.update_range(from, to);
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellIdx, &Piece)> {
        self.seq.iter()
    }

    /// First piece whose running visible sum exceeds `pos`.
    pub fn find_visible(&self, pos: usize) -> PieceCursor {
        self.seq.find_by(|s| pos < s.visible)
    }

    /// First piece whose running total sum exceeds `pos`.
    pub fn find_total(&self, pos: usize) -> PieceCursor {
        self.seq.find_by(|s| pos < s.total)
    }

    /// Locate the piece currently holding a stored anchor.
    ///
    /// The first child splicing in at an offset beyond the anchor caches the
    /// parent piece that ends at its splice point; from there the anchor is
    /// either inside that piece or reachable by walking back through the
    /// parent's contiguous run in total coordinates.
    pub fn find_anchor(&self, store: &OpStore, anchor: StoredAnchor) -> PieceCursor {
        let seg = store.seg(anchor.seg);
        let idx = seg
            .children
            .partition_point(|&c| store.seg(c).insert_pos <= anchor.pos);
        let piece_cell = if idx < seg.children.len() {
            store.seg(seg.children[idx]).insert_piece
        } else {
            seg.last_piece
        };
        debug_assert_eq!(self.get(piece_cell).seg, anchor.seg);
        let it = self.cursor_at(piece_cell);
        let piece = self.get(piece_cell);
        if piece.seg_pos <= anchor.pos {
            return it;
        }
        let it = self.find_total(it.pos.total + anchor.pos - piece.seg_pos);
        debug_assert_eq!(self.get(it.cell).seg, anchor.seg);
        it
    }

    /// Anchor for the codepoint at a visible position.
    pub fn anchor(&self, store: &OpStore, pos: usize) -> Anchor {
        let it = self.find_visible(pos);
        assert!(it.cell.exists(), "visible position out of range");
        let piece = self.get(it.cell);
        debug_assert!(!piece.is_removed());
        let op = store.op(piece.seg);
        Anchor::new(
            store.replicas[op.replica as usize].id,
            op.stamp,
            pos - it.pos.visible + piece.seg_pos,
        )
    }

    /// Anchor for the codepoint at a historical (tombstone-included)
    /// position.
    pub fn history_anchor(&self, store: &OpStore, pos: usize) -> Anchor {
        let it = self.find_total(pos);
        assert!(it.cell.exists(), "historical position out of range");
        let piece = self.get(it.cell);
        let op = store.op(piece.seg);
        Anchor::new(
            store.replicas[op.replica as usize].id,
            op.stamp,
            pos - it.pos.total + piece.seg_pos,
        )
    }

    /// Project a stored anchor onto the historical axis.
    pub fn history_offset(&self, store: &OpStore, anchor: StoredAnchor) -> usize {
        let it = self.find_anchor(store, anchor);
        anchor.pos + it.pos.total - self.get(it.cell).seg_pos
    }

    /// Split the piece under the cursor at codepoint `pos`, materialising
    /// the left part as a new piece. The right part keeps its cell, so
    /// handles held elsewhere keep pointing at text from `pos` onwards.
    pub fn split(&mut self, store: &OpStore, it: PieceCursor, pos: usize) -> PieceCursor {
        let piece = self.get(it.cell).clone();
        debug_assert!(pos < piece.len);

        let text = &store.seg(piece.seg).text[piece.byte_start..piece.byte_start + piece.byte_len];
        let byte_off = chars_to_bytes(text, pos);

        let left = Piece {
            seg: piece.seg,
            byte_start: piece.byte_start,
            byte_len: byte_off,
            len: pos,
            seg_pos: piece.seg_pos,
            tombstone: piece.tombstone,
        };
        {
            let right = self.get_mut(it.cell);
            right.byte_start += byte_off;
            right.byte_len -= byte_off;
            right.seg_pos += pos;
            right.len -= pos;
        }
        // The ancestor sums are unchanged by the split itself; the insert
        // below refreshes them.
        self.seq.refresh_key(it.cell);
        self.seq.insert_before(it, left)
    }

    /// Splice a freshly stored segment into the tree, resolving conflicts
    /// with concurrently inserted siblings so that every replica converges
    /// on the same piece order.
    pub fn insert(&mut self, store: &mut OpStore, seg_ref: OpRef) -> PieceCursor {
        let (parent_ref, insert_pos, char_len, byte_len) = {
            let seg = store.seg(seg_ref);
            (
                seg.parent.expect("inserted segment must have a parent"),
                seg.insert_pos,
                seg.char_len,
                seg.text.len(),
            )
        };
        let anchor = StoredAnchor {
            seg: parent_ref,
            pos: insert_pos,
        };
        let mut it = self.find_anchor(store, anchor);
        let pos = anchor.pos - self.get(it.cell).seg_pos;

        let conflict_idx = {
            let parent = store.seg(parent_ref);
            parent
                .children
                .partition_point(|&c| store.sibling_lt(c, seg_ref))
        };
        let children_len = store.seg(parent_ref).children.len();

        if pos == 0 && children_len > 0 {
            // The anchor is the left edge of a piece and other insertions
            // already splice into this parent; sibling order decides where
            // the new piece sits relative to theirs.
            let parent = store.seg(parent_ref);
            let prev_same = conflict_idx > 0
                && store.seg(parent.children[conflict_idx - 1]).insert_pos == anchor.pos;
            if prev_same {
                // A sibling at this offset precedes us: go right after its
                // text.
                it = self.cursor_at(store.seg(parent.children[conflict_idx - 1]).last_piece);
            } else if conflict_idx < children_len
                && store.seg(parent.children[conflict_idx]).insert_pos == anchor.pos
            {
                // We precede every sibling at this offset.
                it = self.cursor_at(store.seg(parent.children[conflict_idx]).insert_piece);
            } else {
                // No sibling at this offset at all: sit at the end of the
                // previous piece.
                it = self.prev(it);
            }
        } else {
            it = self.split(store, it, pos);
        }

        store.seg_mut(seg_ref).insert_piece = it.cell;
        store.seg_mut(parent_ref).children.insert(conflict_idx, seg_ref);

        // A piece spliced into a region some active deletion covers is born
        // hidden by it. The nearest preceding piece with actual content
        // carries exactly the newest such operation: every covering range
        // reaches past its end, and zero-width split relics at the splice
        // boundary may hold stale tombstones from outside the walk.
        let tombstone = {
            let mut probe = it;
            loop {
                let p = self.get(probe.cell);
                if p.len > 0 {
                    break p.tombstone;
                }
                if probe.cell == self.begin().cell {
                    break None;
                }
                probe = self.prev(probe);
            }
        };
        let piece = Piece {
            seg: seg_ref,
            byte_start: 0,
            byte_len,
            len: char_len,
            seg_pos: 0,
            tombstone,
        };
        let new_it = self.seq.insert_after(it, piece);
        store.seg_mut(seg_ref).last_piece = new_it.cell;
        new_it
    }

    #[cfg(any(test, debug_assertions))]
    pub fn dbg_check(&self, store: &OpStore) {
        self.seq.dbg_check();

        // Walking the tree yields each segment's text exactly once, in
        // order, as a partition into pieces.
        use std::collections::HashMap;
        let mut expected: HashMap<OpRef, usize> = HashMap::new();
        for (_, piece) in self.seq.iter() {
            let e = expected.entry(piece.seg).or_insert(0);
            assert_eq!(piece.seg_pos, *e, "piece out of order within its segment");
            *e += piece.len;
        }
        for (seg_ref, covered) in &expected {
            assert_eq!(*covered, store.seg(*seg_ref).char_len);
        }
    }
}
