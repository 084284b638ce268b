use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mailsift::core::progress::LogProgress;
use mailsift::index::posting_store::PostingStore;
use mailsift::{CancelFlag, MsgIdx};
use rand::Rng;
use std::sync::Arc;

const WORDS: [&str; 8] = ["invoice", "meeting", "budget", "release", "lunch", "report", "travel", "review"];

fn new_store(dir: &tempfile::TempDir, bound_kb: u64) -> PostingStore {
    PostingStore::new(
        dir.path().join("search"),
        bound_kb * 1024,
        500,
        Arc::new(LogProgress::default()),
    )
    .unwrap()
}

/// Fill a store with `messages` messages of 20 random words each.
fn populated_store(dir: &tempfile::TempDir, messages: u64) -> PostingStore {
    let store = new_store(dir, 60);
    let mut rng = rand::thread_rng();
    for id in 0..messages {
        for _ in 0..20 {
            let word = WORDS[rng.gen_range(0..WORDS.len())];
            let term = format!("{}{}", word, rng.gen_range(0..200));
            store.append(&term, MsgIdx(id)).unwrap();
        }
    }
    store.flush().unwrap();
    store
}

fn bench_append(c: &mut Criterion) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = new_store(&temp_dir, 60);

    c.bench_function("posting_append", |b| {
        let mut id = 0u64;
        b.iter(|| {
            let term = format!("{}{}", WORDS[(id % 8) as usize], id % 500);
            store.append(black_box(&term), MsgIdx(id)).unwrap();
            id += 1;
        });
    });
}

fn bench_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("posting_hits");

    for messages in [100u64, 1000].iter() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = populated_store(&temp_dir, *messages);
        group.bench_with_input(BenchmarkId::from_parameter(messages), messages, |b, _| {
            b.iter(|| black_box(store.hits("budget17").unwrap()));
        });
    }
    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("posting_optimize");
    group.sample_size(10);

    group.bench_function("1000_messages", |b| {
        b.iter_with_setup(
            || {
                let temp_dir = tempfile::tempdir().unwrap();
                let store = populated_store(&temp_dir, 1000);
                (temp_dir, store)
            },
            |(_temp_dir, store)| {
                black_box(store.optimize(true, &CancelFlag::new()).unwrap());
            },
        );
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_hits, bench_optimize);
criterion_main!(benches);
