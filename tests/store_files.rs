// tests/store_files.rs
use chrono::{FixedOffset, TimeZone};

use city_sense::features::FeatureRecord;
use city_sense::pipeline::ProcessedRecord;
use city_sense::scoring::ScoreSet;
use city_sense::store::{file_name, FileStore};

fn record(city: &str, day: u32, hour: u32) -> ProcessedRecord {
    let at = FixedOffset::west_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 3, day, hour, 5, 9)
        .unwrap();
    ProcessedRecord {
        city: city.to_string(),
        features: FeatureRecord::at(25.0, 60.0, 15.0, &at),
        aqi: 42,
        safety_index: 7.1,
        scores: ScoreSet::compute(25.0, 60.0, 15.0),
        predicted_iqv: 7.5,
        timestamp: at,
    }
}

#[test]
fn file_name_format() {
    assert_eq!(
        file_name(&record("Sao Paulo", 1, 8)),
        "Sao_Paulo_20250301_080509.json"
    );
}

#[test]
fn save_writes_pretty_json() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("nested").join("data"));
    let path = store.save(&record("Recife", 2, 10)).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\n  \"city\": \"Recife\""));
    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["predicted_iqv"], 7.5);
}

#[test]
fn same_second_runs_are_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    let a = store.save(&record("Recife", 2, 10)).unwrap();
    let b = store.save(&record("Recife", 2, 10)).unwrap();
    assert_ne!(a, b);
    assert_eq!(store.list("Recife", 10).unwrap().len(), 2);
}

#[test]
fn list_is_per_city_newest_first_and_limited() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.save(&record("Sao Paulo", 1, 8)).unwrap();
    store.save(&record("Sao Paulo", 3, 8)).unwrap();
    store.save(&record("Sao Paulo", 2, 8)).unwrap();
    store.save(&record("Sao", 4, 8)).unwrap();
    store.save(&record("Recife", 5, 8)).unwrap();
    std::fs::write(dir.path().join("Sao_Paulo_notes.json"), "{}").unwrap();
    std::fs::write(dir.path().join("Sao_Paulo_20250309_000000.json"), "garbage").unwrap();

    let all = store.list("Sao Paulo", 10).unwrap();
    let days: Vec<u32> = all
        .iter()
        .map(|r| chrono::Datelike::day(&r.timestamp))
        .collect();
    assert_eq!(days, vec![3, 2, 1]);
    assert!(all.iter().all(|r| r.city == "Sao Paulo"));

    assert_eq!(store.list("Sao Paulo", 2).unwrap().len(), 2);
    assert_eq!(store.list("Sao", 10).unwrap().len(), 1);
    assert!(store.list("Natal", 10).unwrap().is_empty());
}

#[test]
fn missing_directory_lists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("absent"));
    assert!(store.list("Recife", 5).unwrap().is_empty());
}

#[test]
fn city_cannot_escape_the_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("data"));
    assert!(store.save(&record("../escaped", 2, 10)).is_err());
    assert!(store.save(&record("nested/escaped", 2, 10)).is_err());
    let root: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name())
        .filter(|n| n != "data")
        .collect();
    assert!(root.is_empty(), "{root:?}");
}

#[test]
fn concurrent_same_second_saves_keep_every_record() {
    const WRITERS: usize = 6;
    for _ in 0..25 {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let rec = record("Recife", 2, 10);
        let barrier = std::sync::Barrier::new(WRITERS);
        let (store, rec, barrier) = (&store, &rec, &barrier);

        let mut paths: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|_| {
                    s.spawn(move || {
                        barrier.wait();
                        store.save(&rec).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), WRITERS);
        assert_eq!(store.list("Recife", 100).unwrap().len(), WRITERS);
    }
}

#[test]
fn list_all_spans_cities_and_skips_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store.save(&record("Sao Paulo", 1, 8)).unwrap();
    store.save(&record("Recife", 2, 8)).unwrap();
    store.save(&record("Recife", 2, 8)).unwrap();
    std::fs::write(dir.path().join("notes.json"), "{}").unwrap();
    std::fs::write(dir.path().join("training.csv"), "x").unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.iter().filter(|r| r.city == "Recife").count(), 2);
}
