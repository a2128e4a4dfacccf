//! Randomized tests for pattern note storage
//!
//! Random sequences of add/delete/resize/velocity edits, with the storage
//! invariants checked after every edit: notes of one key never overlap, every
//! onset has its release at the note's last step, and arena slots are all
//! accounted for once reclamation has run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stepseq::sequencer::{PatternConfig, PatternStore};

/// Route `log` output to the test harness; `RUST_LOG=debug` shows it
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn check_invariants(pattern: &PatternStore) {
    let slots = pattern.slot_count();
    let notes = pattern.notes();

    // Onset order
    for pair in notes.windows(2) {
        assert!(pair[0].step <= pair[1].step, "notes out of order: {:?}", pair);
    }

    for note in &notes {
        assert!(note.length >= 1);
        assert!(note.step + note.length <= slots, "note past the end: {:?}", note);

        // Same key, later onset: must start after this note ends
        if let Some(next) = notes
            .iter()
            .find(|n| n.key == note.key && n.step > note.step)
        {
            assert!(note.step + note.length <= next.step, "{:?} overlaps {:?}", note, next);
        }

        let onset = pattern
            .events_at(note.step)
            .into_iter()
            .find(|e| e.onset && e.key == note.key)
            .expect("onset event");
        let release = pattern
            .events_at(note.last_step())
            .into_iter()
            .find(|e| !e.onset && e.key == note.key && Some(e.handle) == onset.assoc)
            .expect("release event");
        assert_eq!(release.assoc, Some(onset.handle));
        assert_eq!(release.length, note.length);

        for step in note.step..note.step + note.length {
            assert_eq!(pattern.find_note(step, note.key), Some(*note));
        }
    }
}

fn drain_reclaimer(pattern: &mut PatternStore) {
    for _ in 0..4 {
        pattern.reclaim_tick();
    }
    assert_eq!(pattern.pending_reclaim(), 0);
}

fn run(seed: u64, edits: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let config = PatternConfig::default();
    let mut pattern = PatternStore::new(1, "Fuzz", 2, 4, 4, config).unwrap();
    let slots = pattern.slot_count();

    for i in 0..edits {
        let step = rng.gen_range(0..slots);
        let key = rng.gen_range(60..64);
        match rng.gen_range(0..10) {
            0..=4 => {
                let length = rng.gen_range(1..=slots - step);
                let velocity = rng.gen_range(1..128);
                if let Some(note) = pattern.add_note(step, key, velocity, length).unwrap() {
                    assert_eq!(note.step, step);
                    assert!(note.length <= length);
                }
            }
            5..=6 => {
                let before = pattern.find_note(step, key);
                let deleted = pattern.delete_note(step, key);
                assert_eq!(deleted, before.map(|n| n.step));
                assert_eq!(pattern.find_note(step, key), None);
            }
            7..=8 => {
                if let Some(note) = pattern.find_note(step, key) {
                    let length = rng.gen_range(1..=slots - note.step);
                    let old = pattern.resize_note(step, key, length).unwrap();
                    assert_eq!(old, Some(note.length));
                    assert!(pattern.find_note(note.step, key).unwrap().length <= length);
                }
            }
            _ => {
                let velocity = rng.gen_range(0..128);
                if pattern.set_velocity(step, key, velocity).unwrap().is_some() {
                    assert_eq!(pattern.find_note(step, key).unwrap().velocity, velocity);
                }
            }
        }

        check_invariants(&pattern);
        if i % 8 == 0 {
            pattern.reclaim_tick();
        }
    }

    // Two events per stored note, everything else back on the free list
    drain_reclaimer(&mut pattern);
    assert_eq!(
        pattern.free_slots() + 2 * pattern.note_count(),
        config.arena_capacity
    );
    assert_eq!(pattern.reclaim_faults(), 0);
}

#[test]
fn fuzz_note_edits() {
    init_logging();
    for seed in 0..20 {
        run(seed, 500);
    }
}

#[test]
fn fuzz_clear_and_refill() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(99);
    let config = PatternConfig::default();
    let mut pattern = PatternStore::new(1, "Refill", 4, 4, 4, config).unwrap();
    let slots = pattern.slot_count();

    for _ in 0..10 {
        for _ in 0..100 {
            let step = rng.gen_range(0..slots);
            let length = rng.gen_range(1..=slots - step);
            pattern
                .add_note(step, rng.gen_range(0..128), 100, length)
                .unwrap();
        }
        check_invariants(&pattern);

        let removed = pattern.clear_notes();
        assert!(pattern.is_empty());
        assert!(!removed.is_empty());
        drain_reclaimer(&mut pattern);
        assert_eq!(pattern.free_slots(), config.arena_capacity);
    }
}
