use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use fs2::FileExt;

use crate::{
    infra::storage_layout::StorageLayout,
    usecases::contracts::{KeyValueStore, StoreError},
};

type Entries = BTreeMap<String, String>;

/// String map persisted as TOML. Every access holds an exclusive lock on a
/// sibling lock file, so concurrent processes never interleave writes.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl AsRef<Path>, lock_path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock_path: lock_path.as_ref().to_path_buf(),
        }
    }

    pub fn from_layout(layout: &StorageLayout) -> Self {
        Self::new(layout.store_file(), layout.store_lock_file())
    }

    async fn with_entries<T, F>(&self, func: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Entries) -> Result<(T, bool), StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        tokio::task::spawn_blocking(move || {
            let lock = acquire_lock(&lock_path)?;
            let mut entries = read_entries(&path)?;
            let (value, dirty) = func(&mut entries)?;
            if dirty {
                write_entries(&path, &entries)?;
            }
            drop(lock);
            Ok(value)
        })
        .await
        .map_err(|error| StoreError::Unavailable(error.to_string()))?
    }
}

#[async_trait(?Send)]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_owned();
        self.with_entries(move |entries| Ok((entries.get(&key).cloned(), false)))
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.with_entries(move |entries| {
            let changed = entries.get(&key) != Some(&value);
            entries.insert(key, value);
            Ok(((), changed))
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_owned();
        self.with_entries(move |entries| Ok(((), entries.remove(&key).is_some())))
            .await
    }
}

struct LockGuard(File);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn acquire_lock(lock_path: &Path) -> Result<LockGuard, StoreError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(|source| io_error(lock_path, source))?;
    file.lock_exclusive()
        .map_err(|source| io_error(lock_path, source))?;

    Ok(LockGuard(file))
}

fn read_entries(path: &Path) -> Result<Entries, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
        Err(source) => return Err(io_error(path, source)),
    };

    toml::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_entries(path: &Path, entries: &Entries) -> Result<(), StoreError> {
    let encoded = toml::to_string(entries)?;
    let staging = path.with_extension("toml.tmp");

    fs::write(&staging, encoded).map_err(|source| io_error(&staging, source))?;
    fs::rename(&staging, path).map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> FileKeyValueStore {
        FileKeyValueStore::from_layout(&StorageLayout::under(dir.join("chatcore")))
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(temp_dir.path());

        assert_eq!(store.get("token").await.expect("get"), None);
    }

    #[tokio::test]
    async fn values_survive_a_new_store_instance() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        store_in(temp_dir.path())
            .set("token", "a1")
            .await
            .expect("set");
        store_in(temp_dir.path())
            .set("refreshToken", "r1")
            .await
            .expect("set");

        let reopened = store_in(temp_dir.path());

        assert_eq!(reopened.get("token").await.expect("get").as_deref(), Some("a1"));
        assert_eq!(
            reopened.get("refreshToken").await.expect("get").as_deref(),
            Some("r1")
        );
    }

    #[tokio::test]
    async fn remove_deletes_only_the_given_key() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = store_in(temp_dir.path());
        store.set("token", "a1").await.expect("set");
        store.set("pushToken", "device").await.expect("set");

        store.remove("token").await.expect("remove");
        store.remove("token").await.expect("second remove is a no-op");

        assert_eq!(store.get("token").await.expect("get"), None);
        assert_eq!(
            store.get("pushToken").await.expect("get").as_deref(),
            Some("device")
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let layout = StorageLayout::under(temp_dir.path().join("chatcore"));
        layout.ensure_dirs().expect("dirs");
        fs::write(layout.store_file(), "token = [unclosed").expect("write");

        let result = FileKeyValueStore::from_layout(&layout).get("token").await;

        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
