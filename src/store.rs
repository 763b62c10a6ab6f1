// src/store.rs
//! Persistence of processed records: one pretty-printed JSON file per run,
//! named `{City_Name}_{YYYYMMDD_HHMMSS}.json`. Nothing is ever rewritten.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::pipeline::ProcessedRecord;

/// Destination for processed records.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one record, returning where it went.
    async fn store(&self, record: &ProcessedRecord) -> Result<PathBuf>;
}

/// `Sao Paulo` -> `Sao_Paulo`
pub fn city_file_prefix(city: &str) -> String {
    city.trim().replace(' ', "_")
}

pub fn file_name(record: &ProcessedRecord) -> String {
    format!(
        "{}_{}.json",
        city_file_prefix(&record.city),
        record.timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// True for `YYYYMMDD_HHMMSS` optionally followed by `_<n>`.
fn is_stamp(s: &str) -> bool {
    let digits = |p: &str, n: usize| p.len() == n && p.bytes().all(|b| b.is_ascii_digit());
    let mut parts = s.split('_');
    let (Some(d), Some(t)) = (parts.next(), parts.next()) else {
        return false;
    };
    let dup_ok = match parts.next() {
        None => true,
        Some(n) => !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()),
    };
    digits(d, 8) && digits(t, 6) && dup_ok && parts.next().is_none()
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `name` joined onto the data dir, refusing anything that would land elsewhere.
    fn path_in_dir(&self, name: &str) -> Result<PathBuf> {
        let mut parts = Path::new(name).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(name)),
            _ => bail!("refusing file name {name:?} outside {}", self.dir.display()),
        }
    }

    /// Write `record` under a fresh name. Same-second runs get a `_<n>` suffix.
    /// Names are claimed with `create_new`, so concurrent writers never share one.
    pub fn save(&self, record: &ProcessedRecord) -> Result<PathBuf> {
        let base = file_name(record);
        let stem = base.trim_end_matches(".json").to_string();
        self.path_in_dir(&base)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating data dir {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(record).context("encoding record")?;

        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                base.clone()
            } else {
                format!("{stem}_{n}.json")
            };
            let path = self.path_in_dir(&name)?;
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())
                        .with_context(|| format!("writing {}", path.display()))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
            }
        }
    }

    /// Records for `city`, newest first, at most `limit`.
    /// Unreadable or foreign files are skipped.
    pub fn list(&self, city: &str, limit: usize) -> Result<Vec<ProcessedRecord>> {
        let prefix = city_file_prefix(city);
        self.path_in_dir(&prefix)?;
        let prefix = format!("{prefix}_");
        self.read_matching(|stem| stem.strip_prefix(&prefix).is_some_and(is_stamp), limit)
    }

    /// Every record in the directory, any city, newest file name first.
    pub fn list_all(&self) -> Result<Vec<ProcessedRecord>> {
        self.read_matching(
            |stem| {
                stem.match_indices('_')
                    .any(|(i, _)| i > 0 && is_stamp(&stem[i + 1..]))
            },
            usize::MAX,
        )
    }

    fn read_matching(
        &self,
        keep: impl Fn(&str) -> bool,
        limit: usize,
    ) -> Result<Vec<ProcessedRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("listing {}", self.dir.display()));
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.strip_suffix(".json").is_some_and(&keep))
            .collect();
        names.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::new();
        for name in names {
            if out.len() >= limit {
                break;
            }
            let path = self.dir.join(&name);
            match fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<ProcessedRecord>(&s).map_err(Into::into))
            {
                Ok(rec) => out.push(rec),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping record"),
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl RecordSink for FileStore {
    async fn store(&self, record: &ProcessedRecord) -> Result<PathBuf> {
        self.save(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_shapes() {
        assert!(is_stamp("20250301_101500"));
        assert!(is_stamp("20250301_101500_2"));
        assert!(!is_stamp("Paulo_20250301_101500"));
        assert!(!is_stamp("2025031_101500"));
        assert!(!is_stamp("20250301"));
        assert!(!is_stamp("20250301_101500_"));
    }

    #[test]
    fn names_outside_the_dir_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));
        assert!(store.path_in_dir("Recife_20250301_101500.json").is_ok());
        for bad in ["../x.json", "a/b.json", "/etc/x.json", "..", ".", ""] {
            assert!(store.path_in_dir(bad).is_err(), "{bad}");
        }
        assert!(store.list("../data", 10).is_err());
    }

    #[test]
    fn prefix_uses_underscores() {
        assert_eq!(city_file_prefix("Rio de Janeiro"), "Rio_de_Janeiro");
        assert_eq!(city_file_prefix("Recife"), "Recife");
    }
}
