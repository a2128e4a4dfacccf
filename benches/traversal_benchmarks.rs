use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use stepseq::command::{AddNote, CommandStack, UndoableCommand};
use stepseq::midi::FixedEventBuffer;
use stepseq::sequencer::{PatternConfig, PatternStore, Song, SongPlayer, SongTime};

/// A 4-beat pattern with `per_step` one-step notes on every step
fn filled_pattern(per_step: u8) -> PatternStore {
    let mut pattern = PatternStore::new(1, "Bench", 4, 4, 4, PatternConfig::default()).unwrap();
    for step in 0..pattern.slot_count() {
        for key in 0..per_step {
            pattern.add_note(step, 36 + key, 100, 1).unwrap();
        }
    }
    pattern
}

/// Benchmark the realtime pattern walk (runs once per audio callback)
fn bench_pattern_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_traversal");

    for per_step in [1u8, 4, 16] {
        let pattern = filled_pattern(per_step);
        let reader = pattern.reader();
        let slots = reader.slot_count();

        group.bench_with_input(BenchmarkId::from_parameter(per_step), &slots, |b, &slots| {
            b.iter(|| {
                let mut count = 0u32;
                reader.for_each_event(0, slots, |event| {
                    count += event.key as u32;
                });
                black_box(count)
            });
        });
    }
    group.finish();
}

/// Benchmark the song player over one beat
fn bench_song_player(c: &mut Criterion) {
    let mut song = Song::new();
    for t in 0..8 {
        let track = song.add_track(format!("Track {}", t));
        let tr = song.track_mut(track).unwrap();
        let pattern = tr.add_pattern("A", 4, 4, 4).unwrap();
        for step in 0..16 {
            tr.pattern_mut(pattern)
                .unwrap()
                .add_note(step, 48 + (step % 12) as u8, 100, 1)
                .unwrap();
        }
        for bar in 0..16 {
            tr.set_sequence_entry(SongTime::from_beats(bar * 4), pattern, SongTime::from_beats(4));
        }
    }
    song.commit();

    let mut player = SongPlayer::new(song.reader());
    let mut buffer = FixedEventBuffer::with_capacity(4096);

    c.bench_function("song_player_one_beat", |b| {
        b.iter(|| {
            buffer.clear();
            if player.position() >= SongTime::from_beats(60) {
                player.locate(SongTime::zero());
            }
            black_box(player.process(SongTime::from_beats(1), &mut buffer))
        });
    });
}

/// Benchmark a note edit followed by its undo (control side)
fn bench_note_edit(c: &mut Criterion) {
    let mut song = Song::new();
    let track = song.add_track("Edit");
    let pattern = song
        .track_mut(track)
        .unwrap()
        .add_pattern("A", 4, 4, 4)
        .unwrap();
    song.commit();
    let mut stack = CommandStack::new();

    c.bench_function("add_note_and_undo", |b| {
        b.iter(|| {
            let mut command = AddNote::new(track, pattern, 5, 60, 100, 3);
            command.do_command(&mut song).unwrap();
            command.undo_command(&mut song).unwrap();
            song.collect_garbage();
        });
    });

    c.bench_function("command_stack_execute", |b| {
        b.iter(|| {
            stack
                .execute(AddNote::new(track, pattern, 7, 62, 100, 2), &mut song)
                .unwrap();
            stack.undo(&mut song).unwrap();
            song.collect_garbage();
        });
    });
}

criterion_group!(
    benches,
    bench_pattern_traversal,
    bench_song_player,
    bench_note_edit
);
criterion_main!(benches);
