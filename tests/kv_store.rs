use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use cachekv::{FileBackend, KvStore, KvsEngine, KvsError, Result};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use walkdir::WalkDir;

fn store(temp_dir: &TempDir, capacity: usize) -> KvStore {
    let backend = FileBackend::init(temp_dir.path()).expect("unable to prepare storage directory");
    KvStore::new(backend, capacity)
}

fn stored_files(temp_dir: &TempDir) -> usize {
    WalkDir::new(temp_dir.path())
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

// Should get previously inserted value
#[test]
fn lookup_stored_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 4);

    store.insert("key1".to_owned(), b"value1".to_vec())?;
    store.insert("key2".to_owned(), b"value2".to_vec())?;

    assert_eq!(store.lookup("key1")?, b"value1".to_vec());
    assert_eq!(store.lookup("key2")?, b"value2".to_vec());
    Ok(())
}

// Should overwrite existent value
#[test]
fn overwrite_value() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 4);

    store.insert("key1".to_owned(), b"value1".to_vec())?;
    store.insert("key1".to_owned(), b"value2".to_vec())?;
    assert_eq!(store.lookup("key1")?, b"value2".to_vec());
    Ok(())
}

#[test]
fn lookup_non_existent_value() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 4);

    assert!(matches!(store.lookup("key2"), Err(KvsError::NotFound(_))));
}

#[test]
fn remove_key() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 4);

    store.insert("key1".to_owned(), b"value1".to_vec())?;
    store.remove("key1")?;
    assert!(matches!(store.lookup("key1"), Err(KvsError::NotFound(_))));
    // removing a key that is not there succeeds
    store.remove("key1")?;
    Ok(())
}

#[test]
fn eviction_writes_the_oldest_entry_to_disk() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 2);

    store.insert("a".to_owned(), b"1".to_vec())?;
    store.insert("b".to_owned(), b"2".to_vec())?;
    assert_eq!(stored_files(&temp_dir), 0);

    store.insert("c".to_owned(), b"3".to_vec())?;
    assert_eq!(store.cached_keys(), vec!["b", "c"]);
    assert_eq!(fs::read(temp_dir.path().join("a"))?, b"1".to_vec());
    assert_eq!(stored_files(&temp_dir), 1);

    // "a" comes back from disk and pushes "b" out
    assert_eq!(store.lookup("a")?, b"1".to_vec());
    assert_eq!(store.cached_keys(), vec!["c", "a"]);
    assert_eq!(fs::read(temp_dir.path().join("b"))?, b"2".to_vec());
    Ok(())
}

#[test]
fn cache_of_size_one() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 1);

    store.insert("x".to_owned(), b"1".to_vec())?;
    store.insert("y".to_owned(), b"2".to_vec())?;
    assert_eq!(store.cached_keys(), vec!["y"]);
    assert_eq!(store.lookup("x")?, b"1".to_vec());
    assert_eq!(store.cached_keys(), vec!["x"]);
    assert_eq!(store.lookup("y")?, b"2".to_vec());
    Ok(())
}

#[test]
fn remove_deletes_the_file_at_once() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 1);

    store.insert("a".to_owned(), b"1".to_vec())?;
    store.insert("b".to_owned(), b"2".to_vec())?;
    assert!(temp_dir.path().join("a").exists());

    store.remove("a")?;
    assert!(!temp_dir.path().join("a").exists());
    assert!(matches!(store.lookup("a"), Err(KvsError::NotFound(_))));
    Ok(())
}

#[test]
fn zero_capacity_writes_through() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 0);

    store.insert("a".to_owned(), b"1".to_vec())?;
    assert_eq!(fs::read(temp_dir.path().join("a"))?, b"1".to_vec());
    assert_eq!(store.lookup("a")?, b"1".to_vec());
    assert_eq!(store.cache_len(), 0);
    Ok(())
}

#[test]
fn keys_with_special_characters_stay_inside_the_directory() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 0);

    store.insert("../escape".to_owned(), b"1".to_vec())?;
    store.insert("a/b c".to_owned(), b"2".to_vec())?;
    assert_eq!(store.lookup("../escape")?, b"1".to_vec());
    assert_eq!(store.lookup("a/b c")?, b"2".to_vec());

    for entry in WalkDir::new(temp_dir.path()).min_depth(1) {
        let entry = entry.expect("unable to walk storage directory");
        assert_eq!(entry.depth(), 1);
        assert!(entry.file_type().is_file());
    }
    assert_eq!(stored_files(&temp_dir), 2);
    Ok(())
}

#[test]
fn flush_and_drop_write_everything_back() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 10);
    for i in 0..5 {
        store.insert(format!("key{}", i), format!("value{}", i).into_bytes())?;
    }
    store.flush()?;
    assert_eq!(stored_files(&temp_dir), 5);

    store.insert("late".to_owned(), b"v".to_vec())?;
    drop(store);
    assert_eq!(fs::read(temp_dir.path().join("late"))?, b"v".to_vec());

    // a store reopened over the same directory sees every value
    let store = KvStore::new(FileBackend::open(temp_dir.path())?, 2);
    for i in 0..5 {
        assert_eq!(store.lookup(&format!("key{}", i))?, format!("value{}", i).into_bytes());
    }
    Ok(())
}

#[test]
fn init_clears_a_previous_run() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    {
        let store = store(&temp_dir, 0);
        store.insert("old".to_owned(), b"v".to_vec())?;
    }
    let store = store(&temp_dir, 4);
    assert!(matches!(store.lookup("old"), Err(KvsError::NotFound(_))));
    assert_eq!(stored_files(&temp_dir), 0);
    Ok(())
}

// a random trace of operations must behave exactly like a plain map, whatever the capacity
#[test]
fn random_trace_matches_a_map() -> Result<()> {
    for capacity in [0, 1, 3, 16] {
        let temp_dir = TempDir::new().expect("unable to create temporary working directory");
        let store = store(&temp_dir, capacity);
        let mut model: HashMap<String, Vec<u8>> = HashMap::new();
        let mut rng = SmallRng::seed_from_u64(capacity as u64);

        for step in 0..2000 {
            let key = format!("k{}", rng.gen_range(0..24));
            match rng.gen_range(0..3) {
                0 => {
                    let value = format!("v{}", step).into_bytes();
                    store.insert(key.clone(), value.clone())?;
                    model.insert(key, value);
                }
                1 => match model.get(&key) {
                    Some(expected) => assert_eq!(&store.lookup(&key)?, expected),
                    None => assert!(matches!(store.lookup(&key), Err(KvsError::NotFound(_)))),
                },
                _ => {
                    store.remove(&key)?;
                    model.remove(&key);
                }
            }
            assert!(store.cache_len() <= capacity);
        }

        store.flush()?;
        assert_eq!(stored_files(&temp_dir), model.len());
    }
    Ok(())
}

#[test]
fn concurrent_inserts_and_lookups() -> Result<()> {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = store(&temp_dir, 8);
    let errors = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            let errors = Arc::clone(&errors);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{}-{}", t, i);
                    let value = format!("{}", i).into_bytes();
                    if store.insert(key.clone(), value.clone()).is_err()
                        || store.lookup(&key).ok() != Some(value)
                    {
                        errors.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(store.cache_len() <= 8);
    for t in 0..8 {
        for i in 0..100 {
            assert_eq!(store.lookup(&format!("t{}-{}", t, i))?, format!("{}", i).into_bytes());
        }
    }
    Ok(())
}
