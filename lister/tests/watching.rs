#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::path::PathBuf;

use common::*;
use pretty_assertions::assert_eq;
use vfs_lister::{ListerConfig, OpenFlags};

#[test]
fn test_watch_is_shared_and_released_once() {
    let mut h = Harness::new();
    let dir = url("/vfs-test/a");
    let (l1, _rx1) = h.lister();
    let (l2, _rx2) = h.lister();
    h.open(l1, &dir);
    h.open(l2, &dir);
    assert_eq!(h.watch_count("/vfs-test/a"), 1);

    h.cache.set_auto_update(l1, false).unwrap();
    assert_eq!(h.watch_count("/vfs-test/a"), 1);
    assert!(h.cache.is_watched(&dir));

    h.cache.set_auto_update(l2, false).unwrap();
    assert_eq!(h.watch_count("/vfs-test/a"), 0);
    assert!(!h.cache.is_watched(&dir));

    h.cache.set_auto_update(l1, true).unwrap();
    h.cache.set_auto_update(l1, true).unwrap();
    assert_eq!(h.watch_count("/vfs-test/a"), 1);

    let path = PathBuf::from("/vfs-test/a");
    assert_eq!(
        h.watch_ops(),
        vec![
            WatchOp::Add(path.clone()),
            WatchOp::Remove(path.clone()),
            WatchOp::Add(path),
        ]
    );
}

#[test]
fn test_lister_without_auto_update_does_not_watch() {
    let mut h = Harness::new();
    let dir = url("/vfs-test/a");
    let (l1, _rx1) = h.lister();
    h.cache.set_auto_update(l1, false).unwrap();
    h.open(l1, &dir);
    assert_eq!(h.watch_count("/vfs-test/a"), 0);

    h.cache.set_auto_update_for(l1, &dir, true).unwrap();
    assert_eq!(h.watch_count("/vfs-test/a"), 1);
}

#[test]
fn test_incomplete_record_releases_watch_when_forgotten() {
    let mut h = Harness::new();
    let dir = url("/vfs-test/a");
    let (l1, _rx1) = h.lister();
    h.open(l1, &dir);
    h.cache.forget_dirs(l1).unwrap();

    assert!(!h.cache.is_in_use(&dir));
    assert!(!h.cache.is_cached(&dir));
    let path = PathBuf::from("/vfs-test/a");
    assert_eq!(
        h.watch_ops(),
        vec![WatchOp::Add(path.clone()), WatchOp::Remove(path)]
    );
}

#[test]
fn test_cached_record_keeps_watch() {
    let mut h = Harness::new();
    let dir = url("/vfs-test/a");
    let (l1, _rx1) = h.lister();
    h.open(l1, &dir);
    let job = h.last_job();
    h.complete(job, vec![file_entry("x", 1)]);

    h.cache.remove_lister(l1).unwrap();
    assert!(h.cache.is_cached(&dir));
    assert_eq!(h.watch_count("/vfs-test/a"), 1);
    assert_eq!(h.watch_ops().len(), 1);

    // Reopening hands the watch back to a lister without re-adding it.
    let (l2, _rx2) = h.lister();
    h.open(l2, &dir);
    assert_eq!(h.watch_ops().len(), 1);
    assert_eq!(h.cache.stats().watched, 1);
}

#[test]
fn test_cache_without_watches_relists_on_return() {
    let config = ListerConfig::default().with_keep_watch_while_cached(false);
    let mut h = Harness::with_config(config);
    let dir = url("/vfs-test/a");
    let (l1, _rx1) = h.lister();
    h.open(l1, &dir);
    let job = h.last_job();
    h.complete(job, vec![file_entry("x", 1)]);

    h.cache.remove_lister(l1).unwrap();
    assert!(h.cache.is_cached(&dir));
    assert_eq!(h.watch_count("/vfs-test/a"), 0);

    let (l2, mut rx2) = h.lister();
    h.cache.open_url(l2, &dir, OpenFlags::NONE).unwrap();
    h.cache.run_deferred();
    assert_eq!(added_names(&drain(&mut rx2)), vec!["x"]);
    assert_eq!(h.requests().len(), 2);
    assert_eq!(h.watch_count("/vfs-test/a"), 1);
}

#[test]
fn test_stats_track_listers_and_records() {
    let mut h = Harness::new();
    let (l1, _rx1) = h.lister();
    let (_l2, _rx2) = h.lister();
    h.open(l1, &url("/vfs-test/a"));

    let stats = h.cache.stats();
    assert_eq!(stats.listers, 2);
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.cached, 0);
    assert_eq!(stats.running_jobs, 1);
    assert_eq!(stats.watched, 1);
}
