//! Multi-replica convergence: the same operation set, delivered in
//! different causally-valid orders, must produce identical documents.

use braidtext::{
    Anchor, Deletion, Insertion, OpId, Operation, TextCrdt, UndoOperation, Uuid,
};

fn replica(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

fn root_anchor() -> Anchor {
    Anchor::new(Uuid::nil(), 0, 0)
}

fn ins(replica: Uuid, stamp: u32, anchor: Anchor, text: &str) -> Operation {
    Operation::Insert(Insertion {
        replica,
        stamp,
        anchor,
        text: text.into(),
    })
}

fn del(replica: Uuid, stamp: u32, begin: Anchor, end: Anchor) -> Operation {
    Operation::Delete(Deletion {
        replica,
        stamp,
        begin,
        end,
    })
}

fn undo(replica: Uuid, stamp: u32, target: OpId) -> Operation {
    Operation::Undo(UndoOperation {
        replica,
        stamp,
        target,
    })
}

fn run(order: &[&Operation]) -> TextCrdt {
    let mut doc = TextCrdt::with_replica_id(replica(0xFF));
    for op in order {
        doc.apply(op);
    }
    doc.dbg_check();
    doc
}

#[test]
fn concurrent_inserts_at_the_document_root() {
    let (a, b, c) = (replica(1), replica(2), replica(3));
    // Same anchor, colliding stamps: the (stamp, replica) sibling order
    // decides, so a < b at stamp 1 and c trails at stamp 2.
    let op_a = ins(a, 1, root_anchor(), "aa");
    let op_b = ins(b, 1, root_anchor(), "bb");
    let op_c = ins(c, 2, root_anchor(), "cc");

    let expected = "aabbcc";
    for order in [
        [&op_a, &op_b, &op_c],
        [&op_a, &op_c, &op_b],
        [&op_b, &op_a, &op_c],
        [&op_b, &op_c, &op_a],
        [&op_c, &op_a, &op_b],
        [&op_c, &op_b, &op_a],
    ] {
        assert_eq!(run(&order).to_string(), expected, "order {order:?}");
    }
}

#[test]
fn concurrent_inserts_at_the_same_interior_anchor() {
    let (a, b, c) = (replica(1), replica(2), replica(3));
    let base = ins(a, 1, root_anchor(), "base");
    let left = ins(b, 2, Anchor::new(a, 1, 2), "xx");
    let right = ins(c, 2, Anchor::new(a, 1, 2), "yy");

    let expected = "baxxyyse";
    for order in [
        [&base, &left, &right],
        [&base, &right, &left],
    ] {
        assert_eq!(run(&order).to_string(), expected, "order {order:?}");
    }
}

#[test]
fn nested_insertions_converge() {
    let (a, b) = (replica(1), replica(2));
    let base = ins(a, 1, root_anchor(), "base");
    let mid = ins(b, 2, Anchor::new(a, 1, 2), "--");
    // Anchored inside b's insertion, so it must arrive after `mid`.
    let deep = ins(a, 3, Anchor::new(b, 2, 1), "*");

    let expected = "ba-*-se";
    for order in [[&base, &mid, &deep]] {
        assert_eq!(run(&order).to_string(), expected);
    }

    // Delivered before its parent, the deep insert is dropped; once the
    // parent lands a redelivery applies cleanly.
    let mut doc = TextCrdt::with_replica_id(replica(0xFF));
    doc.apply(&base);
    doc.apply(&deep);
    assert_eq!(doc.to_string(), "base");
    doc.apply(&mid);
    doc.apply(&deep);
    assert_eq!(doc.to_string(), expected);
    doc.dbg_check();
}

#[test]
fn overlapping_deletes_with_undo_converge() {
    let (a, b, c) = (replica(1), replica(2), replica(3));
    let base = ins(a, 1, root_anchor(), "base");
    let d1 = del(b, 3, Anchor::new(a, 1, 0), Anchor::new(a, 1, 3));
    let d2 = del(c, 3, Anchor::new(a, 1, 1), Anchor::new(a, 1, 3));
    let u1 = undo(b, 4, OpId::new(b, 3));

    // u1 targets d1, so every valid order keeps d1 before u1.
    let orders: [[&Operation; 4]; 3] = [
        [&base, &d1, &d2, &u1],
        [&base, &d1, &u1, &d2],
        [&base, &d2, &d1, &u1],
    ];
    let mut results = orders.iter().map(|order| run(order).to_string());
    let first = results.next().unwrap();
    for r in results {
        assert_eq!(first, r);
    }
    // d1 undone, d2 still hides [1, 3).
    assert_eq!(first, "be");
}

#[test]
fn interleaved_replicas_full_session() {
    let (a, b) = (replica(1), replica(2));
    let ops = [
        ins(a, 1, root_anchor(), "hello world"),
        ins(b, 2, Anchor::new(a, 1, 5), ","),
        del(a, 3, Anchor::new(a, 1, 5), Anchor::new(a, 1, 8)),
        undo(b, 4, OpId::new(a, 3)),
        ins(b, 5, Anchor::new(a, 1, 10), "!"),
    ];
    let refs: Vec<&Operation> = ops.iter().collect();
    let doc = run(&refs);

    // The comma splices in at the delete's left edge, which keeps it
    // outside the deleted interval; after the undo everything is visible.
    assert_eq!(doc.to_string(), "hello, worl!d");

    // A different arrival order for the concurrent tail converges.
    let reordered: Vec<&Operation> = vec![&ops[0], &ops[2], &ops[1], &ops[4], &ops[3]];
    let doc2 = run(&reordered);
    assert_eq!(doc2.to_string(), doc.to_string());
}
