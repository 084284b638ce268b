mod common;

use std::collections::BTreeSet;
use common::{write_mbox, Fixture, TestMail};
use mailsift::writer::TaskQueue;
use mailsift::{Database, MsgIdx};

#[test]
fn database_mutations_run_on_the_writer_thread() {
    let fixture = Fixture::new();
    write_mbox(
        &fixture.mbox_path("inbox.mbox"),
        &[
            TestMail::new("<1@example.org>", "queued"),
            TestMail::new("<2@example.org>", "queued again"),
        ],
    );
    let db = fixture.open(fixture.config());
    let queue = TaskQueue::new("writer", db).unwrap();

    let added = queue.run("rescan", |db: &mut Database| db.rescan()).unwrap();
    assert_eq!(added, 2);

    let pending = queue
        .submit("tag", |db: &mut Database| db.add_tag("5", &[MsgIdx(1)]))
        .unwrap();
    assert_eq!(pending.recv().unwrap().unwrap(), 1);

    let hits = queue
        .run("search", |db: &mut Database| db.search(&["tag:5"]))
        .unwrap();
    assert_eq!(hits, BTreeSet::from([MsgIdx(1)]));

    // A failing task reports its error and leaves the queue running.
    assert!(queue.run("bad tag", |db: &mut Database| db.add_tag("5", &[MsgIdx(9)])).is_err());

    {
        let paused = queue.pause().unwrap();
        let later = queue
            .submit("count", |db: &mut Database| Ok(db.len()))
            .unwrap();
        assert!(later.try_recv().is_err());
        drop(paused);
        assert_eq!(later.recv().unwrap().unwrap(), 2);
    }

    let db = queue.shutdown().unwrap();
    assert_eq!(db.len(), 2);
    assert_eq!(db.search(&["queued"]).unwrap().len(), 2);
}
