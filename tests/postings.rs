mod common;

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use common::{write_mbox, Fixture, TestMail};
use mailsift::core::progress::RecordingProgress;
use mailsift::index::posting_store::PostingStore;
use mailsift::index::signature::TermSignature;
use mailsift::{CancelFlag, MsgIdx};
use tempfile::TempDir;

fn store(dir: &TempDir, bound: u64) -> PostingStore {
    let mut store = PostingStore::new(
        dir.path().join("search"),
        bound,
        50,
        Arc::new(RecordingProgress::new()),
    )
    .unwrap();
    store.set_compact_odds(None);
    store
}

#[test]
fn optimize_shards_without_losing_postings() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 1024);

    for i in 0..1000u64 {
        store.append(&format!("term{}", i), MsgIdx(i)).unwrap();
    }
    let bytes_before = store.total_bytes().unwrap();

    let shards = store.optimize(false, &CancelFlag::new()).unwrap();
    assert!(shards > 1);
    assert!(shards < 1000);
    assert_eq!(shards, store.shard_count().unwrap());
    assert!(store.total_bytes().unwrap() <= bytes_before);

    for i in 0..1000u64 {
        let hits = store.hits(&format!("term{}", i)).unwrap();
        assert_eq!(hits, BTreeSet::from([MsgIdx(i)]), "term{}", i);
    }
}

#[test]
fn hot_terms_are_split_out_of_big_shards() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 1024);

    for i in 0..600u64 {
        store.append("popular", MsgIdx(i)).unwrap();
    }
    store.append("rare", MsgIdx(3)).unwrap();

    store.optimize(true, &CancelFlag::new()).unwrap();
    let popular = store.hits("popular").unwrap();
    assert_eq!(popular.len(), 600);
    assert_eq!(store.hits("rare").unwrap(), BTreeSet::from([MsgIdx(3)]));
    assert!(store.hits("missing").unwrap().is_empty());
}

#[test]
fn add_and_remove_hits_rewrite_one_term() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 60 * 1024);

    store.append("inbox:tag", MsgIdx(1)).unwrap();
    store.append("other", MsgIdx(1)).unwrap();
    store
        .add_hits("inbox:tag", &BTreeSet::from([MsgIdx(2), MsgIdx(3)]))
        .unwrap();
    assert_eq!(
        store.hits("inbox:tag").unwrap(),
        BTreeSet::from([MsgIdx(1), MsgIdx(2), MsgIdx(3)])
    );

    store
        .remove_hits("inbox:tag", &BTreeSet::from([MsgIdx(1), MsgIdx(3)]))
        .unwrap();
    assert_eq!(store.hits("inbox:tag").unwrap(), BTreeSet::from([MsgIdx(2)]));
    assert_eq!(store.hits("other").unwrap(), BTreeSet::from([MsgIdx(1)]));
}

#[test]
fn database_optimize_keeps_search_results() {
    let fixture = Fixture::new();
    let mails: Vec<TestMail<'_>> = (0..40)
        .map(|_| TestMail::new("", "Weekly status report"))
        .collect();
    write_mbox(&fixture.mbox_path("inbox.mbox"), &mails);

    let mut config = fixture.config();
    config.set("postinglist_kb", "1").unwrap();
    let mut db = fixture.open(config);
    db.rescan().unwrap();
    assert_eq!(db.len(), 40);

    let before = db.search(&["weekly", "status"]).unwrap();
    assert_eq!(before.len(), 40);
    let bytes_before = db.index().postings().total_bytes().unwrap();

    let shards = db.optimize(false).unwrap();
    assert!(shards >= 1);
    assert_eq!(db.search(&["weekly", "status"]).unwrap(), before);
    assert!(db.index().postings().total_bytes().unwrap() <= bytes_before);
}

#[test]
fn scanning_leaves_compaction_to_optimize() {
    let fixture = Fixture::new();
    let mails: Vec<TestMail<'_>> = (0..40)
        .map(|_| TestMail::new("", "Weekly status report"))
        .collect();
    write_mbox(&fixture.mbox_path("inbox.mbox"), &mails);

    let mut config = fixture.config();
    config.set("postinglist_kb", "1").unwrap();
    let mut db = fixture.open(config);
    db.rescan().unwrap();

    // One appended line per message, although the shard is past the bound.
    let postings = db.index().postings();
    let signature = TermSignature::of("weekly");
    let name = postings.locate(&signature).unwrap();
    let path = postings.dir().join(name);
    assert!(fs::metadata(&path).unwrap().len() > postings.bound());
    let text = fs::read_to_string(&path).unwrap();
    let lines = text
        .lines()
        .filter(|line| line.starts_with(signature.as_str()))
        .count();
    assert_eq!(lines, 40);

    db.optimize(false).unwrap();
    let text = fs::read_to_string(db.index().postings().dir().join(
        db.index().postings().locate(&signature).unwrap(),
    ))
    .unwrap();
    assert_eq!(text.lines().filter(|line| line.starts_with(signature.as_str())).count(), 1);
    assert_eq!(db.search(&["weekly"]).unwrap().len(), 40);
}

#[test]
fn oversized_shards_are_compacted_on_append() {
    let dir = TempDir::new().unwrap();
    let mut store = store(&dir, 1024);

    // Give every `alpha...` signature a shared one-letter shard.
    store.append("alpha", MsgIdx(0)).unwrap();
    store.optimize(false, &CancelFlag::new()).unwrap();
    assert_eq!(store.shard_names().unwrap(), vec!["a".to_string()]);

    store.set_compact_odds(Some(0));
    for i in 1..=100u64 {
        store.append(&format!("alpha{}", i), MsgIdx(i)).unwrap();
    }
    store.flush().unwrap();

    let names = store.shard_names().unwrap();
    assert!(names.len() > 1, "{:?}", names);
    assert!(names.iter().all(|name| name.starts_with('a')));
    for name in &names {
        let size = fs::metadata(store.dir().join(name)).unwrap().len();
        assert!(size <= store.bound(), "{} is {} bytes", name, size);
    }

    assert_eq!(store.hits("alpha").unwrap(), BTreeSet::from([MsgIdx(0)]));
    for i in 1..=100u64 {
        let hits = store.hits(&format!("alpha{}", i)).unwrap();
        assert_eq!(hits, BTreeSet::from([MsgIdx(i)]), "alpha{}", i);
    }
}

#[test]
fn cancelled_optimize_leaves_shards_alone() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, 1024);
    for i in 0..50u64 {
        store.append(&format!("term{}", i), MsgIdx(i)).unwrap();
    }
    let before = store.shard_names().unwrap();

    let cancel = CancelFlag::new();
    cancel.cancel();
    assert_eq!(store.optimize(true, &cancel).unwrap(), before.len());
    assert_eq!(store.shard_names().unwrap(), before);
    for i in 0..50u64 {
        assert!(store.hits(&format!("term{}", i)).unwrap().contains(&MsgIdx(i)));
    }
}
