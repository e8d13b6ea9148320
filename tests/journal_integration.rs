//! End-to-end tests driving the writer, force-writer and replay against real temp
//! directories. No toolchain assumptions beyond a POSIX-ish filesystem under `tempfile`.

use {
    bookie_journal::{
        config::JournalConfig, journal, mark::LogMark, metrics::LocalMetrics, Journal,
    },
    std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        time::Duration,
    },
};

fn wait_until(mut pred: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn base_config(dir: &std::path::Path) -> JournalConfig {
    JournalConfig {
        journal_dirs: vec![dir.to_path_buf()],
        journal_prealloc_size_mb: 1,
        journal_write_buffer_size_kb: 4,
        ..Default::default()
    }
}

#[test]
fn single_entry_on_empty_queue_flushes_promptly() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.journal_max_group_wait_ms = 2;
    config.journal_flush_when_queue_empty = true;

    let journal = Journal::open(config, Arc::new(LocalMetrics::new()), LogMark::MIN).unwrap();

    let (tx, rx) = mpsc::channel();
    journal
        .log_add(
            bytes::Bytes::from_static(&[0xAB; 100]),
            1,
            1,
            None,
            Box::new(move |rc| {
                tx.send(rc).unwrap();
            }),
        )
        .unwrap();

    let rc = rx.recv_timeout(Duration::from_secs(2)).expect("callback did not fire promptly");
    assert_eq!(rc, 0);
    assert!(journal.last_log_mark() > LogMark::MIN);
    journal.shutdown();
}

#[test]
fn entries_threshold_flushes_a_full_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.journal_buffered_entries_threshold = 4;
    config.journal_max_group_wait_ms = 1000;
    config.journal_flush_when_queue_empty = false;

    let metrics = Arc::new(LocalMetrics::new());
    let journal = Journal::open(config, metrics.clone(), LogMark::MIN).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    for i in 0..5u32 {
        let fired = fired.clone();
        journal
            .log_add(
                bytes::Bytes::from(vec![i as u8; 16]),
                1,
                i as i64,
                Some(1),
                Box::new(move |rc| {
                    assert_eq!(rc, 0);
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }

    assert!(wait_until(|| fired.load(Ordering::SeqCst) == 5, Duration::from_secs(3)));
    assert_eq!(metrics.batch_entries_total(), 5);
    journal.shutdown();
}

#[test]
fn rotation_opens_a_new_journal_with_a_larger_id() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.max_journal_size_mb = 0; // any non-empty batch exceeds this
    config.journal_max_group_wait_ms = 2;
    config.journal_flush_when_queue_empty = true;

    let journal = Journal::open(config, Arc::new(LocalMetrics::new()), LogMark::MIN).unwrap();

    for i in 0..2u32 {
        let (tx, rx) = mpsc::channel();
        journal
            .log_add(
                bytes::Bytes::from(vec![7u8; 32]),
                1,
                i as i64,
                None,
                Box::new(move |rc| {
                    tx.send(rc).unwrap();
                }),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    journal.shutdown();
    let ids = bookie_journal::channel::JournalChannel::list_journal_ids(&[tmp.path().to_path_buf()]);
    assert!(ids.len() >= 2, "expected rotation to produce at least two journal files, got {ids:?}");
}

#[test]
fn checkpoint_compacts_old_journals_once_marked_past() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = base_config(tmp.path());
    config.max_journal_size_mb = 0;
    config.max_backup_journals = 0;
    config.journal_max_group_wait_ms = 2;
    config.journal_flush_when_queue_empty = true;

    let journal = Journal::open(config, Arc::new(LocalMetrics::new()), LogMark::MIN).unwrap();
    for i in 0..3u32 {
        let (tx, rx) = mpsc::channel();
        journal
            .log_add(
                bytes::Bytes::from(vec![1u8; 32]),
                1,
                i as i64,
                None,
                Box::new(move |rc| tx.send(rc).unwrap()),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    let mark_before = journal.last_log_mark();
    assert!(mark_before.log_id > 0);

    let ckpt = journal.new_checkpoint();
    journal.checkpoint_complete(ckpt, true).unwrap();

    let remaining = bookie_journal::channel::JournalChannel::list_journal_ids(&[tmp.path().to_path_buf()]);
    assert!(
        remaining.iter().all(|&id| id >= mark_before.log_id),
        "expected journals below the mark to be pruned, got {remaining:?}"
    );
    journal.shutdown();
}

#[test]
fn recover_replays_a_pre_existing_journal_without_a_live_journal() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut chan = bookie_journal::channel::JournalChannel::create(
            tmp.path(),
            1,
            4096,
            4096,
            bookie_journal::format::FORMAT_V5,
        )
        .unwrap();
        let mut framed = Vec::new();
        bookie_journal::format::encode_record(b"recovered-entry", &mut framed);
        chan.write(&framed).unwrap();
        chan.close(true).unwrap();
    }

    let config = base_config(tmp.path());
    let mut seen = Vec::new();
    let mark = journal::recover(&config, |rec| {
        seen.push(rec.payload.to_vec());
        Ok(())
    })
    .unwrap();

    assert_eq!(seen, vec![b"recovered-entry".to_vec()]);
    assert_eq!(mark.log_id, 1);
    assert!(mark.offset > 0);
}
