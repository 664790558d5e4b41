//! File-backed profile store
//!
//! One pretty-printed JSON document per profile key, kept in a single
//! directory. Writes go to a temporary file first and are renamed into place,
//! so a reader never sees a half-written record.

use async_trait::async_trait;
use lingua_core::profile::{ProfileStore, StoreError, StudentProfile};
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::debug;

pub struct FileProfileStore {
    dir: PathBuf,
}

impl FileProfileStore {
    /// Opens the store, creating the directory when it does not exist yet.
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.contains("..");
        if !valid {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "key is not a safe file name"),
            });
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn load(&self, key: &str) -> Result<Option<StudentProfile>, StoreError> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                });
            }
        };
        let profile = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(profile))
    }

    async fn save(&self, key: &str, profile: &StudentProfile) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let json = serde_json::to_vec_pretty(profile).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        debug!(key, path = %path.display(), "Profile saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lingua_core::profile::{Skill, load_or_create, profile_key};

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::open(dir.path().join("profiles"))
            .await
            .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap();

        let key = profile_key("Nguyen Thuy Tien");
        assert!(store.load(&key).await.unwrap().is_none());

        let mut profile = StudentProfile::new("Nguyen Thuy Tien", now);
        profile.record(Skill::Writing, 7.2, now);
        store.save(&key, &profile).await.unwrap();

        assert!(store.dir().join("lingua_stats_Nguyen_Thuy_Tien.json").exists());
        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_load_or_create_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::open(dir.path()).await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 4, 2, 9, 0, 0).unwrap();

        let created = load_or_create(&store, "Vu Thi Ha Vy", now).await.unwrap();
        assert_eq!(created.streak, 1);

        let reopened = FileProfileStore::open(dir.path()).await.unwrap();
        let loaded = reopened
            .load(&profile_key("Vu Thi Ha Vy"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("lingua_stats_Broken.json"), b"{not json").unwrap();

        let err = store.load("lingua_stats_Broken").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProfileStore::open(dir.path()).await.unwrap();
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
