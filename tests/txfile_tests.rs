// Transactional file engine tests
// Lifecycle, loading, transactions, versioning and locking.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use txstore::txfile::{Header, Recovery, PAGE_SIZE};
use txstore::{Error, Options, TransactionalFile};

fn open_at(dir: &tempfile::TempDir, name: &str) -> TransactionalFile {
    TransactionalFile::open_with(dir.path().join(name), Options::default()).unwrap()
}

fn write(file: &TransactionalFile, data: &[u8]) {
    file.transaction(|_| Ok::<_, Error>(data.to_vec())).unwrap();
}

// =============================================================================
// Test 1: Fresh open creates both files with an empty header page
// =============================================================================
#[test]
fn fresh_open_creates_empty_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");

    assert!(file.is_open());
    assert_eq!(file.recovery(), Some(Recovery::Initialized));
    assert_eq!(std::fs::metadata(file.data_path()).unwrap().len(), PAGE_SIZE as u64);
    assert!(file.backup_path().exists());
    assert_eq!(file.backup_path(), dir.path().join("data.bak"));

    assert_eq!(file.header().unwrap(), Header::empty());
    assert!(file.load().unwrap().is_empty());
}

// =============================================================================
// Test 2: Opening twice without close is an illegal state
// =============================================================================
#[test]
fn double_open_is_illegal_state() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");

    assert!(matches!(file.open(), Err(Error::IllegalState(_))));
    // Still usable afterwards
    write(&file, b"still fine");
    assert_eq!(file.load().unwrap(), b"still fine");
}

// =============================================================================
// Test 3: Close is idempotent, and safe without open
// =============================================================================
#[test]
fn close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();

    let never_opened = TransactionalFile::new(dir.path().join("never"), Options::default());
    never_opened.close();
    never_opened.close();
    assert!(!dir.path().join("never").exists());

    let file = open_at(&dir, "data");
    file.close();
    file.close();
    assert!(!file.is_open());
    assert!(matches!(file.load(), Err(Error::IllegalState(_))));

    // Reopen after close
    file.open().unwrap();
    assert!(file.load().unwrap().is_empty());
}

// =============================================================================
// Test 4: Transaction result is what the next load returns, across reopen
// =============================================================================
#[test]
fn transaction_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data");

    {
        let file = TransactionalFile::open_with(&path, Options::default()).unwrap();
        write(&file, b"hello world");
        assert_eq!(file.last_load().as_deref(), Some(&b"hello world"[..]));
    }

    let file = TransactionalFile::open_with(&path, Options::default()).unwrap();
    assert_eq!(file.recovery(), Some(Recovery::Valid));
    assert_eq!(file.load().unwrap(), b"hello world");
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        (PAGE_SIZE + b"hello world".len()) as u64
    );
}

// =============================================================================
// Test 5: The update function sees the previous payload
// =============================================================================
#[test]
fn update_receives_previous_payload() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");

    for _ in 0..5 {
        file.transaction(|old| {
            let mut next = old.map(<[u8]>::to_vec).unwrap_or_default();
            next.push(b'x');
            Ok::<_, Error>(next)
        })
        .unwrap();
    }
    assert_eq!(file.load().unwrap(), b"xxxxx");
}

// =============================================================================
// Test 6: Shrinking the payload truncates both files
// =============================================================================
#[test]
fn shrinking_payload_truncates_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");

    write(&file, &[7u8; 10_000]);
    write(&file, b"tiny");

    assert_eq!(file.load().unwrap(), b"tiny");
    let expected = (PAGE_SIZE + 4) as u64;
    assert_eq!(std::fs::metadata(file.data_path()).unwrap().len(), expected);
    assert_eq!(std::fs::metadata(file.backup_path()).unwrap().len(), expected);

    // Writing an empty payload clears the digest
    write(&file, b"");
    let header = file.header().unwrap();
    assert_eq!(header.data_len, 0);
    assert!(header.digest.is_empty());
}

// =============================================================================
// Test 7: Versions increase by one per transaction
// =============================================================================
#[test]
fn versions_increase_by_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");

    let mut versions = Vec::new();
    for i in 0..10u8 {
        write(&file, &[i]);
        versions.push(file.header().unwrap().version);
        assert_eq!(file.version(), *versions.last().unwrap());
    }
    assert_eq!(versions, (1..=10).collect::<Vec<i32>>());
}

// =============================================================================
// Test 8: Version wraps from i32::MAX back to 1
// =============================================================================
#[test]
fn version_wraps_after_max() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data");

    {
        let file = TransactionalFile::open_with(&path, Options::default()).unwrap();
        write(&file, b"seed");
    }

    // The version field is not covered by the digest, so patching it in
    // both files leaves them valid.
    for p in [path.clone(), txstore::txfile::backup_path_for(&path)] {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = std::fs::OpenOptions::new().write(true).open(&p).unwrap();
        f.seek(SeekFrom::Start(4)).unwrap();
        f.write_all(&(i32::MAX - 1).to_be_bytes()).unwrap();
        f.sync_all().unwrap();
    }

    let file = TransactionalFile::open_with(&path, Options::default()).unwrap();
    assert_eq!(file.recovery(), Some(Recovery::Valid));

    let mut versions = Vec::new();
    for i in 0..3u8 {
        write(&file, &[i]);
        versions.push(file.header().unwrap().version);
    }
    assert_eq!(versions, vec![i32::MAX, 1, 2]);
}

// =============================================================================
// Test 9: load_if_updated reports only other handles' writes
// =============================================================================
#[test]
fn load_if_updated_sees_other_handle() {
    let dir = tempfile::tempdir().unwrap();
    let a = open_at(&dir, "data");
    let b = open_at(&dir, "data");

    // Nothing written yet
    assert_eq!(b.load_if_updated().unwrap(), None);

    write(&a, b"from a");
    // Own write is already known to a
    assert_eq!(a.load_if_updated().unwrap(), None);

    assert_eq!(b.load_if_updated().unwrap().as_deref(), Some(&b"from a"[..]));
    assert_eq!(b.load_if_updated().unwrap(), None);
    assert_eq!(b.version(), a.version());

    // b builds on a's payload
    b.transaction(|old| {
        let mut next = old.unwrap().to_vec();
        next.extend_from_slice(b" and b");
        Ok::<_, Error>(next)
    })
    .unwrap();
    assert_eq!(a.load_if_updated().unwrap().as_deref(), Some(&b"from a and b"[..]));
}

// =============================================================================
// Test 10: A failing update propagates its own error and writes nothing
// =============================================================================
#[derive(Debug)]
enum AppError {
    Store(Error),
    Rejected(&'static str),
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError::Store(e)
    }
}

#[test]
fn update_error_propagates_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");
    write(&file, b"original");
    let before = file.header().unwrap();

    let result: Result<(), AppError> = file.transaction(|_| Err(AppError::Rejected("nope")));
    assert!(matches!(result, Err(AppError::Rejected("nope"))));

    assert_eq!(file.header().unwrap(), before);
    assert_eq!(file.load().unwrap(), b"original");

    file.close();
    let result: Result<(), AppError> = file.transaction(|_| Ok(Vec::new()));
    assert!(matches!(result, Err(AppError::Store(Error::IllegalState(_)))));
}

// =============================================================================
// Test 11: create() wipes both files
// =============================================================================
#[test]
fn create_resets_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let file = open_at(&dir, "data");
    write(&file, b"to be wiped");
    write(&file, b"to be wiped again");

    file.create().unwrap();
    assert!(file.is_open());
    assert!(file.load().unwrap().is_empty());
    assert_eq!(file.header().unwrap().version, 0);
    assert_eq!(std::fs::metadata(file.backup_path()).unwrap().len(), 0);

    write(&file, b"after");
    assert_eq!(file.header().unwrap().version, 1);
}

// =============================================================================
// Test 12: A held lock blocks another handle's transaction until released
// =============================================================================
#[test]
fn held_lock_blocks_other_handle() {
    let dir = tempfile::tempdir().unwrap();
    let a = open_at(&dir, "data");
    let b = open_at(&dir, "data");

    a.lock().unwrap();
    // Operations on the holder do not release the held lock
    assert!(a.load().unwrap().is_empty());

    let (tx, rx) = mpsc::channel();
    let writer = thread::spawn(move || {
        write(&b, b"from b");
        tx.send(()).unwrap();
    });

    assert!(
        rx.recv_timeout(Duration::from_millis(300)).is_err(),
        "transaction should wait for the lock"
    );
    a.unlock();
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    writer.join().unwrap();

    assert_eq!(a.load().unwrap(), b"from b");
}

// =============================================================================
// Test 13: Concurrent threads on one handle serialize their transactions
// =============================================================================
#[test]
fn concurrent_transactions_on_one_handle() {
    let dir = tempfile::tempdir().unwrap();
    let file = std::sync::Arc::new(open_at(&dir, "data"));

    let mut handles = vec![];
    for _ in 0..8 {
        let f = std::sync::Arc::clone(&file);
        handles.push(thread::spawn(move || {
            for _ in 0..25 {
                f.transaction(|old| {
                    let n = old
                        .filter(|d| d.len() == 8)
                        .map(|d| u64::from_be_bytes(d.try_into().unwrap()))
                        .unwrap_or(0);
                    Ok::<_, Error>((n + 1).to_be_bytes().to_vec())
                })
                .unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let data = file.load().unwrap();
    assert_eq!(u64::from_be_bytes(data.try_into().unwrap()), 200);
    assert_eq!(file.header().unwrap().version, 200);
}

// =============================================================================
// Test 14: Permission mode is applied to both files
// =============================================================================
#[cfg(unix)]
#[test]
fn permission_mode_applied() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let file = TransactionalFile::open_with(
        dir.path().join("data"),
        Options::other_read(true),
    )
    .unwrap();
    assert_eq!(file.mode(), 0o664);

    for p in [file.data_path(), file.backup_path()] {
        let mode = std::fs::metadata(p).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o664);
    }
}

// =============================================================================
// Test 15: Same version with a different digest is still a change
// =============================================================================
#[test]
fn digest_mismatch_with_equal_version_reloads() {
    use std::io::{Seek, SeekFrom, Write};

    let dir = tempfile::tempdir().unwrap();
    let a = open_at(&dir, "data");
    let b = open_at(&dir, "data");

    write(&a, b"x");
    assert_eq!(b.load().unwrap(), b"x");
    assert_eq!(b.version(), 1);

    // A second write whose version collides with what b last saw.
    write(&a, b"yy");
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .open(a.data_path())
        .unwrap();
    f.seek(SeekFrom::Start(4)).unwrap();
    f.write_all(&1i32.to_be_bytes()).unwrap();
    f.sync_all().unwrap();
    assert_eq!(b.header().unwrap().version, 1);

    // The unlocked peek only looks at the version.
    assert_eq!(b.load_if_updated().unwrap(), None);

    // Under the lock the digest decides: b must build on "yy", not "x".
    let mut seen = None;
    b.transaction(|old| {
        seen = old.map(<[u8]>::to_vec);
        Ok::<_, Error>(b"zzz".to_vec())
    })
    .unwrap();
    assert_eq!(seen.as_deref(), Some(&b"yy"[..]));
    assert_eq!(a.load().unwrap(), b"zzz");
}

// =============================================================================
// Test 16: A transaction after another handle's create() writes the live file
// =============================================================================
#[test]
fn transaction_follows_recreated_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = open_at(&dir, "data");
    let b = open_at(&dir, "data");

    write(&a, b"before reset");
    b.create().unwrap();
    write(&b, b"after reset");

    // a still has the unlinked files open; it must pick up the new ones.
    let mut seen = None;
    a.transaction(|old| {
        seen = old.map(<[u8]>::to_vec);
        Ok::<_, Error>(b"from a".to_vec())
    })
    .unwrap();
    assert_eq!(seen.as_deref(), Some(&b"after reset"[..]));
    assert_eq!(a.recovery(), Some(Recovery::Valid));

    assert_eq!(b.load().unwrap(), b"from a");
    assert_eq!(std::fs::read(a.backup_path()).unwrap(), std::fs::read(a.data_path()).unwrap());
}

#[test]
fn transaction_recreates_deleted_files() {
    let dir = tempfile::tempdir().unwrap();
    let a = open_at(&dir, "data");
    write(&a, b"soon gone");

    std::fs::remove_file(a.data_path()).unwrap();
    std::fs::remove_file(a.backup_path()).unwrap();

    a.transaction(|old| {
        assert_eq!(old, Some(&b""[..]));
        Ok::<_, Error>(b"new life".to_vec())
    })
    .unwrap();
    assert_eq!(a.recovery(), Some(Recovery::Initialized));

    let fresh = open_at(&dir, "data");
    assert_eq!(fresh.load().unwrap(), b"new life");
}
