use super::audio_types::AudioRecord;
use super::types::ServiceError;

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const AUDIO_EXT: &str = ".wav";

/// Flat-directory storage for rendered audio with a keep-newest retention
/// policy. Filenames embed a microsecond timestamp; a counter suffix breaks
/// same-instant collisions, so concurrent saves never overwrite each other.
#[derive(Debug, Clone)]
pub struct AudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| ServiceError::Storage {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh filename derived from `base_name` and
    /// return that filename (never a path, so callers stay decoupled from
    /// the storage location).
    pub fn save(&self, bytes: &[u8], base_name: &str) -> Result<String, ServiceError> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidInput(
                "audio data cannot be empty".to_string(),
            ));
        }
        let base_name = base_name.trim();
        if base_name.is_empty() {
            return Err(ServiceError::InvalidInput(
                "base name cannot be empty".to_string(),
            ));
        }

        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        let base = sanitize(base_name);

        let mut filename = format!("{micros}_{base}{AUDIO_EXT}");
        let mut seq = 1u32;
        loop {
            let path = self.dir.join(&filename);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes).map_err(|e| ServiceError::Storage {
                        path: path.clone(),
                        source: e,
                    })?;
                    return Ok(filename);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    filename = format!("{micros}-{seq}_{base}{AUDIO_EXT}");
                    seq += 1;
                }
                Err(e) => {
                    return Err(ServiceError::Storage {
                        path,
                        source: e,
                    })
                }
            }
        }
    }

    /// Read a stored file back. The default extension is appended when the
    /// caller left it off.
    pub fn get(&self, filename: &str) -> Result<Vec<u8>, ServiceError> {
        let filename = if filename.ends_with(AUDIO_EXT) {
            filename.to_string()
        } else {
            format!("{filename}{AUDIO_EXT}")
        };

        let path = self.dir.join(&filename);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ServiceError::NotFound(filename)),
            Err(e) => Err(ServiceError::Storage { path, source: e }),
        }
    }

    /// All stored files, newest first.
    pub fn list(&self) -> Result<Vec<AudioRecord>, ServiceError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| ServiceError::Storage {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let created_at = meta.created().or_else(|_| meta.modified()).unwrap_or(UNIX_EPOCH);
            records.push(AudioRecord {
                filename: entry.file_name().to_string_lossy().into_owned(),
                created_at,
                size_bytes: meta.len(),
            });
        }

        // Filenames embed the save timestamp, so they break creation-time ties.
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        Ok(records)
    }

    /// Delete everything beyond the `max_keep` newest files. A file that
    /// refuses to delete is logged and skipped; the rest of the batch still
    /// runs. Returns how many files were actually deleted.
    pub fn cleanup(&self, max_keep: usize) -> Result<usize, ServiceError> {
        let records = self.list()?;
        let mut deleted = 0;

        for record in records.iter().skip(max_keep) {
            let path = self.dir.join(&record.filename);
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(file = %record.filename, error = %e, "failed to delete audio file");
                }
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, kept = max_keep, "audio retention cleanup");
        }
        Ok(deleted)
    }
}

fn sanitize(base_name: &str) -> String {
    base_name
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' || c == '.' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AudioStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioStore::new(dir.path().join("audio")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_get_round_trip() {
        let (_dir, store) = store();
        let bytes = vec![1u8, 2, 3, 4, 5];
        let filename = store.save(&bytes, "tsukkomi_0").unwrap();
        assert!(filename.ends_with(".wav"));
        assert_eq!(store.get(&filename).unwrap(), bytes);
    }

    #[test]
    fn test_get_appends_extension() {
        let (_dir, store) = store();
        let filename = store.save(b"abc", "line").unwrap();
        let stem = filename.trim_end_matches(".wav");
        assert_eq!(store.get(stem).unwrap(), b"abc");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store.get("nothing_here").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn test_save_rejects_empty_input() {
        let (_dir, store) = store();
        assert!(matches!(
            store.save(&[], "name").unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
        assert!(matches!(
            store.save(b"data", "  ").unwrap_err(),
            ServiceError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_same_instant_saves_get_distinct_names() {
        let (_dir, store) = store();
        let mut names = std::collections::HashSet::new();
        for _ in 0..20 {
            assert!(names.insert(store.save(b"x", "burst").unwrap()));
        }
        assert_eq!(store.list().unwrap().len(), 20);
    }

    #[test]
    fn test_list_is_newest_first() {
        let (_dir, store) = store();
        for i in 0..5 {
            store.save(b"x", &format!("clip{i}")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let records = store.list().unwrap();
        assert_eq!(records.len(), 5);
        for pair in records.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        assert!(records[0].filename.contains("clip4"));
        assert!(records[4].filename.contains("clip0"));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let (_dir, store) = store();
        for i in 0..7 {
            store.save(b"x", &format!("clip{i}")).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let deleted = store.cleanup(3).unwrap();
        assert_eq!(deleted, 4);

        let left = store.list().unwrap();
        assert_eq!(left.len(), 3);
        let names: Vec<_> = left.iter().map(|r| r.filename.as_str()).collect();
        assert!(names[0].contains("clip6"));
        assert!(names[1].contains("clip5"));
        assert!(names[2].contains("clip4"));
    }

    #[test]
    fn test_cleanup_with_fewer_files_deletes_nothing() {
        let (_dir, store) = store();
        store.save(b"x", "only").unwrap();
        assert_eq!(store.cleanup(10).unwrap(), 0);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_sanitize_strips_path_separators() {
        let (_dir, store) = store();
        let filename = store.save(b"x", "a/b\\c d.e").unwrap();
        assert!(!filename.contains('/'));
        assert!(!filename.contains('\\'));
        assert!(!filename.contains(' '));
        assert_eq!(store.get(&filename).unwrap(), b"x");
    }
}
