use sdbmrs::{Error, OpenFlags, Store, StoreFlag};

fn prefix(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("db")
}

#[test]
fn reopen_after_close_preserves_data() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir);

    {
        let mut store = Store::open(&p, OpenFlags::ReadWrite, true).unwrap();
        for i in 1..=300 {
            let k = format!("key{}", i);
            let v = format!("val{}", i);
            store.store(k.as_bytes(), v.as_bytes(), StoreFlag::Replace).unwrap();
        }
        store.close().unwrap();
    }

    let mut store = Store::open(&p, OpenFlags::ReadWrite, false).unwrap();
    for i in 1..=300 {
        let k = format!("key{}", i);
        let v = format!("val{}", i);
        assert_eq!(store.fetch(k.as_bytes()).unwrap(), Some(v.into_bytes()));
    }
}

#[test]
fn iteration_is_complete_and_non_restarting_mid_stream() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir);
    let mut store = Store::open(&p, OpenFlags::ReadWrite, true).unwrap();

    let mut expected = std::collections::BTreeSet::new();
    for i in 1..=500 {
        let k = format!("k{}", i);
        let v = format!("v{}", i);
        store.store(k.as_bytes(), v.as_bytes(), StoreFlag::Replace).unwrap();
        expected.insert(k.into_bytes());
    }

    let mut seen = std::collections::BTreeSet::new();
    let mut k = store.first_key().unwrap();
    while let Some(key) = k {
        seen.insert(key);
        k = store.next_key().unwrap();
    }
    assert_eq!(seen, expected);

    // next_key after exhaustion keeps returning absent.
    assert_eq!(store.next_key().unwrap(), None);
    assert_eq!(store.next_key().unwrap(), None);
}

#[test]
fn empty_value_is_distinct_from_absent() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir);
    let mut store = Store::open(&p, OpenFlags::ReadWrite, true).unwrap();

    store.store(b"k", b"", StoreFlag::Replace).unwrap();
    assert_eq!(store.fetch(b"k").unwrap(), Some(Vec::new()));
    assert_eq!(store.fetch(b"missing").unwrap(), None);
}

#[test]
fn read_only_reopen_does_not_mutate_files() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir);

    {
        let mut store = Store::open(&p, OpenFlags::ReadWrite, true).unwrap();
        for i in 1..=150 {
            let k = format!("key{}", i);
            let v = format!("val{}", i);
            store.store(k.as_bytes(), v.as_bytes(), StoreFlag::Replace).unwrap();
        }
        store.close().unwrap();
    }

    let pag_path = format!("{}.pag", p.display());
    let dir_path = format!("{}.dir", p.display());
    let pag_before = std::fs::read(&pag_path).unwrap();
    let dir_before = std::fs::read(&dir_path).unwrap();

    let mut store = Store::open(&p, OpenFlags::ReadOnly, false).unwrap();
    assert!(store.is_read_only());
    for i in 1..=150 {
        let k = format!("key{}", i);
        let v = format!("val{}", i);
        assert_eq!(store.fetch(k.as_bytes()).unwrap(), Some(v.into_bytes()));
    }
    assert!(matches!(store.store(b"new", b"v", StoreFlag::Insert), Err(Error::ReadOnly)));
    assert!(matches!(store.delete(b"key1"), Err(Error::ReadOnly)));

    assert_eq!(std::fs::read(&pag_path).unwrap(), pag_before);
    assert_eq!(std::fs::read(&dir_path).unwrap(), dir_before);
}

#[test]
fn open_requires_non_empty_prefix() {
    let err = Store::open("", OpenFlags::ReadWrite, true).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }));
}

#[test]
fn open_without_create_on_missing_files_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = prefix(&dir);
    let err = Store::open(&p, OpenFlags::ReadWrite, false).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}
