//! braidtext: a conflict-free replicated plain-text engine.
//!
//! Text is stored as immutable insertion segments carved into pieces by an
//! order-statistic piece tree; deletions and formats are range operations
//! whose boundary tags layer into a range-tag tree, so any single operation
//! can be undone or redone later, even when its range overlaps others.
//! Replicas exchanging the same set of operations converge to the same
//! document no matter the delivery order, provided parents arrive before
//! their children.

mod common;
mod doc;
mod operation;
mod ost;
mod pieces;
mod rangetag;
mod store;
mod unicount;

pub use common::{Anchor, OpId, ReplicaId, Stamp, StyleKey, StyleValue, Uuid};
pub use doc::{PieceSlice, TextCrdt};
pub use operation::{
    Deletion, Formatting, Insertion, Operation, RedoOperation, UndoOperation,
};
