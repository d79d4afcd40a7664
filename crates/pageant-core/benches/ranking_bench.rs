use criterion::{criterion_group, criterion_main, Criterion};
use pageant_core::{
    build_leaderboard_update, rank_entries, EntryId, PageantId, RankDirection, ScoreEntry,
    DEFAULT_EPSILON,
};
use time::OffsetDateTime;

fn mk_entries(count: usize) -> Vec<ScoreEntry> {
    (0..count)
        .map(|index| ScoreEntry {
            entry_id: EntryId::new(),
            // Deterministic spread with repeats so tie handling is exercised.
            value: f64::from(u32::try_from(index % 97).unwrap_or(0)) * 1.25,
        })
        .collect()
}

fn bench_rank_entries(c: &mut Criterion) {
    let entries = mk_entries(1_000);

    c.bench_function("rank_entries_1000_scores", |b| {
        b.iter(|| {
            let standings = rank_entries(&entries, RankDirection::Descending, DEFAULT_EPSILON);
            if let Err(err) = standings {
                panic!("ranking benchmark fixture failed: {err}");
            }
        });
    });
}

fn bench_leaderboard_update(c: &mut Criterion) {
    let entries = mk_entries(1_000);
    let pageant_id = PageantId::new();

    c.bench_function("leaderboard_update_1000_scores", |b| {
        b.iter(|| {
            let update = build_leaderboard_update(
                pageant_id,
                &entries,
                RankDirection::Descending,
                DEFAULT_EPSILON,
                OffsetDateTime::UNIX_EPOCH,
            );
            if let Err(err) = update {
                panic!("leaderboard benchmark fixture failed: {err}");
            }
        });
    });
}

criterion_group!(benches, bench_rank_entries, bench_leaderboard_update);
criterion_main!(benches);
