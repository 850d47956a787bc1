//! Randomized histories checked against naive oracles.
//!
//! A `Vec<char>` plays the role of the document for linear edit streams;
//! for delete/undo/redo storms the expected text is recomputed from the
//! recorded operations ("a codepoint is visible iff no not-undone delete
//! covers it"), which is also the invariant `dbg_check` enforces
//! internally.

use rand::prelude::*;
use rand::rngs::SmallRng;

use braidtext::{OpId, TextCrdt, Uuid};

fn random_str(len: usize, rng: &mut SmallRng) -> String {
    let alphabet: Vec<char> = "abcdefghijklmnopqrstuvwxyz_".chars().collect();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
        .collect()
}

#[test]
fn random_inserts_match_oracle() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut doc = TextCrdt::with_replica_id(Uuid::from_u128(1));
    let mut oracle: Vec<char> = Vec::new();

    for i in 0..300 {
        let pos = rng.gen_range(0..=oracle.len());
        let text = random_str(rng.gen_range(1..8), &mut rng);
        oracle.splice(pos..pos, text.chars());
        doc.local_insert(pos, &text);

        if i % 20 == 0 {
            assert_eq!(doc.to_string(), oracle.iter().collect::<String>());
            doc.dbg_check();
        }
    }
    assert_eq!(doc.to_string(), oracle.iter().collect::<String>());
    assert_eq!(doc.len(), oracle.len());
    doc.dbg_check();
}

#[test]
fn random_inserts_and_deletes_match_oracle() {
    let mut rng = SmallRng::seed_from_u64(20);
    let mut doc = TextCrdt::with_replica_id(Uuid::from_u128(1));
    let mut oracle: Vec<char> = Vec::new();

    for i in 0..250 {
        if oracle.is_empty() || rng.gen_bool(0.55) {
            let pos = rng.gen_range(0..=oracle.len());
            let text = random_str(rng.gen_range(1..10), &mut rng);
            oracle.splice(pos..pos, text.chars());
            doc.local_insert(pos, &text);
        } else {
            let len = rng.gen_range(1..=oracle.len().min(10));
            let pos = rng.gen_range(0..=oracle.len() - len);
            oracle.drain(pos..pos + len);
            doc.local_delete(pos, len);
        }

        if i % 10 == 0 {
            assert_eq!(doc.to_string(), oracle.iter().collect::<String>());
            doc.dbg_check();
        }
    }
    assert_eq!(doc.to_string(), oracle.iter().collect::<String>());
    doc.dbg_check();
}

/// Recorded deletion over the base text, tracked by the test oracle.
struct Del {
    id: OpId,
    range: (usize, usize),
    undone: bool,
}

fn expected_text(base: &[char], dels: &[Del]) -> String {
    base.iter()
        .enumerate()
        .filter(|(i, _)| {
            !dels
                .iter()
                .any(|d| !d.undone && *i >= d.range.0 && *i < d.range.1)
        })
        .map(|(_, c)| c)
        .collect()
}

/// Overlapping deletes with shuffled stamps, then undo and redo storms in
/// random orders. Stamp order deliberately disagrees with application order
/// so newer deletes are regularly applied before older ones land inside
/// them.
#[test]
fn delete_undo_redo_storm_matches_reconstruction() {
    let mut rng = SmallRng::seed_from_u64(42);
    let replica = Uuid::from_u128(9);
    let mut doc = TextCrdt::with_replica_id(replica);

    let base_len = 300;
    let base_text = random_str(base_len, &mut rng);
    let base: Vec<char> = base_text.chars().collect();
    doc.local_insert(0, &base_text);

    let num_dels = 60;
    let mut stamps: Vec<u32> = (2..2 + num_dels as u32).collect();
    stamps.shuffle(&mut rng);

    let mut dels: Vec<Del> = Vec::new();
    for &stamp in &stamps {
        let len = rng.gen_range(5..40);
        let pos = rng.gen_range(0..=base_len - len);

        // History anchors address the base segment directly, so the oracle
        // interval is exactly [pos, pos + len).
        let begin = doc.history_anchor(pos);
        let end = doc.history_anchor(pos + len);
        doc.del(&braidtext::Deletion {
            replica,
            stamp,
            begin,
            end,
        });
        dels.push(Del {
            id: OpId::new(replica, stamp),
            range: (pos, pos + len),
            undone: false,
        });

        assert_eq!(doc.to_string(), expected_text(&base, &dels));
        doc.dbg_check();
    }

    let mut order: Vec<usize> = (0..dels.len()).collect();
    order.shuffle(&mut rng);
    for &i in &order {
        doc.local_undo(dels[i].id);
        dels[i].undone = true;
        assert_eq!(doc.to_string(), expected_text(&base, &dels));
        doc.dbg_check();
    }
    assert_eq!(doc.to_string(), base_text);

    order.shuffle(&mut rng);
    for &i in &order {
        doc.local_redo(dels[i].id);
        dels[i].undone = false;
        assert_eq!(doc.to_string(), expected_text(&base, &dels));
        doc.dbg_check();
    }
}

/// Interleaved undo/redo of a random subset while other deletes stay live.
#[test]
fn partial_undo_redo_interleaving() {
    let mut rng = SmallRng::seed_from_u64(99);
    let replica = Uuid::from_u128(3);
    let mut doc = TextCrdt::with_replica_id(replica);

    let base_len = 200;
    let base_text = random_str(base_len, &mut rng);
    let base: Vec<char> = base_text.chars().collect();
    doc.local_insert(0, &base_text);

    let mut stamps: Vec<u32> = (2..32).collect();
    stamps.shuffle(&mut rng);
    let mut dels: Vec<Del> = Vec::new();
    for &stamp in &stamps {
        let len = rng.gen_range(3..30);
        let pos = rng.gen_range(0..=base_len - len);
        let begin = doc.history_anchor(pos);
        let end = doc.history_anchor(pos + len);
        doc.del(&braidtext::Deletion {
            replica,
            stamp,
            begin,
            end,
        });
        dels.push(Del {
            id: OpId::new(replica, stamp),
            range: (pos, pos + len),
            undone: false,
        });
    }
    assert_eq!(doc.to_string(), expected_text(&base, &dels));
    doc.dbg_check();

    for _ in 0..200 {
        let i = rng.gen_range(0..dels.len());
        if dels[i].undone {
            doc.local_redo(dels[i].id);
            dels[i].undone = false;
        } else {
            doc.local_undo(dels[i].id);
            dels[i].undone = true;
        }
        assert_eq!(doc.to_string(), expected_text(&base, &dels));
        doc.dbg_check();
    }
}

/// The cover scenario: an older delete lands strictly inside a newer one,
/// then the outer one is undone and the inner must take over.
#[test]
fn inner_delete_revives_when_cover_lifts() {
    let replica = Uuid::from_u128(5);
    let mut doc = TextCrdt::with_replica_id(replica);
    let base: String = "012345678901234567890123456789".into();
    doc.local_insert(0, &base);

    let d_outer = braidtext::Deletion {
        replica,
        stamp: 3,
        begin: doc.history_anchor(5),
        end: doc.history_anchor(25),
    };
    doc.del(&d_outer);
    assert_eq!(doc.to_string(), format!("{}{}", &base[..5], &base[25..]));

    // Strictly inside, but with an older stamp: fully shadowed on arrival.
    let d_inner = braidtext::Deletion {
        replica,
        stamp: 2,
        begin: doc.history_anchor(10),
        end: doc.history_anchor(20),
    };
    doc.del(&d_inner);
    assert_eq!(doc.to_string(), format!("{}{}", &base[..5], &base[25..]));
    doc.dbg_check();

    doc.local_undo(OpId::new(replica, 3));
    assert_eq!(
        doc.to_string(),
        format!("{}{}{}", &base[..5], &base[5..10], &base[20..])
    );
    doc.dbg_check();

    doc.local_undo(OpId::new(replica, 2));
    assert_eq!(doc.to_string(), base);
    doc.dbg_check();
}
