//! End-to-end scenario coverage for the recursive ops, exercised through
//! the public API rather than any module's internals. Companion to the
//! inline `#[cfg(test)]` modules, which cover individual primitives and
//! estimator/traversal mechanics in isolation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cmdr_fsops::args::ConfirmArgs;
use cmdr_fsops::{
    CancellationToken, Crs, ErrCbResult, ErrorList, FsOpError, OpContext, OpResult, ProgressEstimator, Stage, ior_cp, ior_rm,
};

fn ctx(errors: &mut ErrorList) -> OpContext<'_> {
    OpContext::new(errors)
}

fn tree_contents(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut map = BTreeMap::new();
    collect_into(root, root, &mut map);
    map
}

fn collect_into(root: &Path, dir: &Path, map: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap().to_path_buf();
        if path.is_dir() {
            collect_into(root, &path, map);
        } else {
            map.insert(rel, fs::read(&path).unwrap());
        }
    }
}

// S1: rename on same filesystem ----------------------------------------------

#[test]
fn s1_rename_on_same_filesystem_moves_file_with_one_completion() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a");
    let dst = dir.path().join("b");
    fs::write(&src, b"payload").unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    let completions_clone = Arc::clone(&completions);
    let mut estimator = ProgressEstimator::new(CancellationToken::never());
    estimator.set_notifier(Arc::new(move |stage, _| {
        if stage == Stage::InProgress {
            completions_clone.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.estimator = Some(&mut estimator);
    let result = cmdr_fsops::ior_mv(&src, &dst, Crs::Fail, &mut context).unwrap();

    assert_eq!(result, OpResult::Succeeded);
    assert!(!src.exists());
    assert_eq!(fs::read(&dst).unwrap(), b"payload");
    assert_eq!(completions.load(Ordering::SeqCst), 1);
}

// S2: cross-device move decomposes into copy + silenced remove --------------

#[test]
fn s2_copy_then_silenced_remove_mirrors_cross_device_decomposition() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("f"), b"hello").unwrap();

    let updates = Arc::new(AtomicUsize::new(0));
    let updates_clone = Arc::clone(&updates);
    let mut estimator = ProgressEstimator::new(CancellationToken::never());
    estimator.set_notifier(Arc::new(move |stage, _| {
        if stage == Stage::InProgress {
            updates_clone.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.estimator = Some(&mut estimator);

    // Same two phases `ior_mv` runs internally when `rename(2)` reports
    // EXDEV: a full copy, then a remove of the source with its progress
    // silenced so the remove phase never shows up in visible progress.
    let cp_result = ior_cp(&src, &dst, Crs::Fail, true, false, &mut context).unwrap();
    assert_eq!(cp_result, OpResult::Succeeded);

    let previous_silent = context.estimator.as_deref_mut().unwrap().silent_on();
    let rm_result = ior_rm(&src, &mut context);
    context.estimator.as_deref_mut().unwrap().silent_set(previous_silent);
    assert_eq!(rm_result, OpResult::Succeeded);

    assert!(!src.exists());
    assert_eq!(fs::read(dst.join("f")).unwrap(), b"hello");
    // mkdir + file copy = 2 updates for the copy phase; the rmfile + rmdir
    // of the remove phase are silenced and contribute nothing, so the
    // notifier never sees the 4 updates an unsilenced decomposition would.
    assert_eq!(updates.load(Ordering::SeqCst), 2);
}

// S3: conflict overwrite, confirmed ------------------------------------------

#[test]
fn s3_conflict_overwrite_confirmed_replaces_colliding_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("s");
    let dst = dir.path().join("d");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    fs::write(src.join("x"), b"new").unwrap();
    fs::write(dst.join("x"), b"old").unwrap();

    let confirm_calls = Arc::new(AtomicUsize::new(0));
    let confirm_calls_clone = Arc::clone(&confirm_calls);
    let mut confirm = move |_: &ConfirmArgs| {
        confirm_calls_clone.fetch_add(1, Ordering::SeqCst);
        true
    };

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.confirm = Some(&mut confirm);
    let result = ior_cp(&src, &dst, Crs::ReplaceFiles, false, false, &mut context).unwrap();

    assert_eq!(result, OpResult::Succeeded);
    assert_eq!(fs::read(dst.join("x")).unwrap(), b"new");
    assert_eq!(confirm_calls.load(Ordering::SeqCst), 1);
}

// S4: conflict denied, rest of the tree still copies -------------------------

#[test]
fn s4_conflict_denied_leaves_collision_untouched_but_copies_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("s");
    let dst = dir.path().join("d");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    fs::write(src.join("x"), b"new").unwrap();
    fs::write(src.join("y"), b"fresh").unwrap();
    fs::write(dst.join("x"), b"old").unwrap();

    let mut decline = |_: &ConfirmArgs| false;
    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.confirm = Some(&mut decline);
    let result = ior_cp(&src, &dst, Crs::ReplaceFiles, false, false, &mut context).unwrap();

    assert_eq!(result, OpResult::Succeeded);
    assert_eq!(fs::read(dst.join("x")).unwrap(), b"old");
    assert_eq!(fs::read(dst.join("y")).unwrap(), b"fresh");
    assert!(errors.is_empty());
}

// S5: recursive remove with one unreadable child, ignored --------------------

#[test]
#[cfg(unix)]
fn s5_unreadable_child_ignored_still_succeeds_with_no_recorded_errors() {
    use std::os::unix::fs::PermissionsExt;

    // chmod 000 has no effect on root's ability to read a directory.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("t");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("ok"), b"x").unwrap();
    let bad = root.join("bad");
    fs::create_dir(&bad).unwrap();
    fs::set_permissions(&bad, fs::Permissions::from_mode(0o000)).unwrap();

    let mut always_ignore = |_: &cmdr_fsops::ErrorRecord| ErrCbResult::Ignore;
    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.error_cb = Some(&mut always_ignore);
    let result = ior_rm(&root, &mut context);

    fs::set_permissions(&bad, fs::Permissions::from_mode(0o700)).unwrap();

    assert_eq!(result, OpResult::Succeeded);
    assert!(errors.is_empty());
    assert!(!root.join("ok").exists());
    assert!(bad.exists());
}

// S6: cancellation mid-copy ---------------------------------------------------

#[test]
fn s6_cancellation_mid_copy_yields_skipped_with_partial_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big");
    let dst = dir.path().join("copy");
    let payload = vec![7u8; 1024 * 1024];
    fs::write(&src, &payload).unwrap();

    // Lets the first chunk through, then reports cancelled on every poll
    // after that — mid-file, not before the copy even starts.
    let polls = Arc::new(AtomicUsize::new(0));
    let polls_clone = Arc::clone(&polls);
    let cancellation = CancellationToken::from_fn(move || polls_clone.fetch_add(1, Ordering::SeqCst) >= 1);

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.cancellation = cancellation;
    let result = ior_cp(&src, &dst, Crs::Fail, false, false, &mut context).unwrap();

    assert_eq!(result, OpResult::Skipped);
    assert!(errors.is_empty());
    let copied = fs::read(&dst).unwrap();
    assert!(copied.len() < payload.len());
    assert_eq!(&copied[..], &payload[..copied.len()]);
}

#[test]
fn s6_cancellation_before_traversal_starts_visits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("s");
    let dst = dir.path().join("d");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"1").unwrap();
    fs::write(src.join("b"), b"2").unwrap();

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    context.cancellation = CancellationToken::from_fn(|| true);
    let result = ior_cp(&src, &dst, Crs::Fail, false, false, &mut context).unwrap();

    assert_eq!(result, OpResult::Skipped);
    assert!(errors.is_empty());
    assert!(!dst.exists());
}

// Round-trip / idempotence: REPLACE_ALL is structurally stable ---------------

#[test]
fn replace_all_round_trip_reproduces_identical_tree_contents() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let c = dir.path().join("c");
    fs::create_dir_all(a.join("nested")).unwrap();
    fs::write(a.join("top.txt"), b"top-level").unwrap();
    fs::write(a.join("nested/leaf.txt"), b"leaf contents").unwrap();

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    let first = ior_cp(&a, &b, Crs::ReplaceAll, false, false, &mut context).unwrap();
    assert_eq!(first, OpResult::Succeeded);

    let mut errors2 = ErrorList::new();
    let mut context2 = ctx(&mut errors2);
    let second = ior_cp(&b, &c, Crs::ReplaceAll, false, false, &mut context2).unwrap();
    assert_eq!(second, OpResult::Succeeded);

    let contents_a = tree_contents(&a);
    let contents_b = tree_contents(&b);
    let contents_c = tree_contents(&c);
    assert_eq!(contents_a, contents_b);
    assert_eq!(contents_b, contents_c);
}

#[test]
fn cp_rejects_destination_nested_inside_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir(&src).unwrap();
    let dst = src.join("inner");

    let mut errors = ErrorList::new();
    let mut context = ctx(&mut errors);
    let result = ior_cp(&src, &dst, Crs::Fail, false, false, &mut context);

    assert!(matches!(result, Err(FsOpError::DestinationInsideSource { .. })));
}
