use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

/// Named-blob store backed by JSON files.
///
/// Each blob lives in `<data_dir>/<name>.json`. Writes go to a temporary
/// sibling first and are moved into place with a rename, so a crash mid-write
/// never leaves a truncated blob behind.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    data_dir: PathBuf,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self { data_dir })
    }

    /// Loads a blob by name. A missing blob is `None`, not an error.
    pub async fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.blob_path(name);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("📭 Blob {} no existe todavía", name);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let value = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(value))
    }

    /// Saves a blob by name, replacing any previous version atomically.
    pub async fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.blob_path(name);
        let tmp = self.data_dir.join(format!("{name}.json.tmp"));

        let content = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;

        if let Err(e) = fs::rename(&tmp, &path).await {
            warn!("No se pudo reemplazar {}: {}", path.display(), e);
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("renaming into {}", path.display()));
        }

        debug!("💾 Blob {} guardado", name);
        Ok(())
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[tokio::test]
    async fn missing_blob_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        let loaded: Option<HashMap<u64, u64>> = storage.load("dj_roles").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn saved_blob_is_loaded_back_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        let roles: HashMap<u64, u64> = [(1, 10), (2, 20)].into_iter().collect();
        storage.save("dj_roles", &roles).await.unwrap();
        storage.save("dj_roles", &roles).await.unwrap();

        let loaded: HashMap<u64, u64> = storage.load("dj_roles").await.unwrap().unwrap();
        assert_eq!(loaded, roles);
        assert!(!dir.path().join("dj_roles.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_blob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dj_roles.json"), "{not json").unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        let loaded: Result<Option<HashMap<u64, u64>>> = storage.load("dj_roles").await;
        assert!(loaded.is_err());
    }
}
