//! On-disk storage and the profile records kept in it.

use std::sync::Arc;

use coach_lib::adapters::FileKeyValueStore;
use tempfile::TempDir;
use titanfit_core::domain::ProgressEntry;
use titanfit_core::ports::KeyValueStore;
use titanfit_core::profile_store::{PROFILE_KEY, PROGRESS_KEY};
use titanfit_core::{ProfileStore, SaveOutcome, UserProfile, WaterLog};

fn open(dir: &TempDir) -> Arc<FileKeyValueStore> {
    Arc::new(FileKeyValueStore::open(dir.path()).unwrap())
}

#[test]
fn values_survive_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    open(&dir).set("greeting", "olá").unwrap();

    assert_eq!(
        open(&dir).get("greeting").unwrap(),
        Some("olá".to_string())
    );
    assert_eq!(open(&dir).get("missing").unwrap(), None);
}

#[test]
fn batch_writes_land_together_and_clear_empties_the_store() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .set_many(&[("a", "1".to_string()), ("b", "2".to_string())])
        .unwrap();
    assert_eq!(store.get("a").unwrap(), Some("1".to_string()));
    assert_eq!(store.get("b").unwrap(), Some("2".to_string()));

    store.remove("a").unwrap();
    assert_eq!(store.get("a").unwrap(), None);

    store.clear().unwrap();
    assert_eq!(store.get("b").unwrap(), None);
    // No temporary file is left behind after a write.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn corrupt_store_file_reads_as_empty_and_is_replaced() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    std::fs::write(store.path(), "{ not json").unwrap();

    assert_eq!(store.get("anything").unwrap(), None);
    store.set("fresh", "value").unwrap();
    assert_eq!(store.get("fresh").unwrap(), Some("value".to_string()));
}

#[test]
fn saved_profile_is_loaded_by_a_new_process() {
    let dir = TempDir::new().unwrap();
    let profile = UserProfile {
        name: "Ana".to_string(),
        weight: 82.0,
        target_weight: 72.0,
        ..UserProfile::default()
    };
    let progress = vec![
        ProgressEntry::seed(),
        ProgressEntry {
            date: "12/03".to_string(),
            weight: 81.2,
            calories_burned: 350.0,
        },
    ];

    let outcome = ProfileStore::new(open(&dir)).save(&profile, &progress);
    assert_eq!(outcome, SaveOutcome::Saved);

    let loaded = ProfileStore::new(open(&dir)).load();
    assert_eq!(loaded.profile, profile);
    assert_eq!(loaded.progress, progress);
}

#[test]
fn unreadable_profile_record_resets_to_defaults() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.set(PROFILE_KEY, "not a profile").unwrap();
    store.set(PROGRESS_KEY, "[]").unwrap();
    store.set("titanfit_water_count", "4").unwrap();

    let loaded = ProfileStore::new(store.clone()).load();
    assert_eq!(loaded.profile, UserProfile::default());
    assert_eq!(loaded.progress, vec![ProgressEntry::seed()]);
    // The whole store is wiped, not just the broken record.
    assert_eq!(WaterLog::new(store).get(), 0);
}

#[test]
fn water_count_is_persisted_and_never_negative() {
    let dir = TempDir::new().unwrap();
    let water = WaterLog::new(open(&dir));

    assert_eq!(water.set(3), 3);
    assert_eq!(WaterLog::new(open(&dir)).get(), 3);
    assert_eq!(water.set(-2), 0);
    assert_eq!(water.get(), 0);
}

#[test]
fn a_year_of_weigh_ins_keeps_the_document_small() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let profile = UserProfile {
        name: "Ana".to_string(),
        ..UserProfile::default()
    };
    let progress: Vec<ProgressEntry> = (0..365)
        .map(|day| ProgressEntry {
            date: format!("{:02}/{:02}", day % 28 + 1, day / 31 + 1),
            weight: 90.0 - f64::from(day) * 0.05,
            calories_burned: 420.5,
        })
        .collect();

    assert_eq!(
        ProfileStore::new(store.clone()).save(&profile, &progress),
        SaveOutcome::Saved
    );
    let size = std::fs::metadata(store.path()).unwrap().len();
    assert!(size < 64 * 1024, "store document grew to {size} bytes");
}
