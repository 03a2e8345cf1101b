use super::{RemoteFile, Storage};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

/// In-memory destination for tests. Keeps every uploaded payload and an
/// ordered log of the operations performed against it.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    log: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    unlistable: Mutex<HashSet<String>>,
}

impl MemoryStorage {
    pub fn insert(&self, dest: &str, name: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((dest.to_string(), name.to_string()), data.to_vec());
    }

    /// Makes every operation against `dest` fail.
    pub fn fail_destination(&self, dest: &str) {
        self.failing.lock().unwrap().insert(dest.to_string());
    }

    /// Makes only `list` fail for `dest`.
    pub fn fail_listing(&self, dest: &str) {
        self.unlistable.lock().unwrap().insert(dest.to_string());
    }

    pub fn names(&self, dest: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .keys()
            .filter(|(d, _)| d == dest)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn get(&self, dest: &str, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(dest.to_string(), name.to_string()))
            .cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn check(&self, op: &str, dest: &str, name: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("{} {} {}", op, dest, name));
        if self.failing.lock().unwrap().contains(dest) {
            return Err(BackupError::Connectivity(format!("{}: {} unreachable", op, dest)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn list(&self, dest: &str) -> Result<Vec<RemoteFile>> {
        self.check("list", dest, "")?;
        if self.unlistable.lock().unwrap().contains(dest) {
            return Err(BackupError::Connectivity(format!("list: {} unreachable", dest)));
        }
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .filter(|((d, _), _)| d == dest)
            .map(|((_, name), data)| RemoteFile {
                name: name.clone(),
                size: data.len() as u64,
                mod_time: Utc::now(),
            })
            .collect())
    }

    async fn upload(&self, local_path: &Path, dest: &str) -> Result<()> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.check("upload", dest, &name)?;
        let data = std::fs::read(local_path)?;
        self.insert(dest, &name, &data);
        Ok(())
    }

    async fn download(&self, dest: &str, file_name: &str, local_dir: &Path) -> Result<()> {
        self.check("download", dest, file_name)?;
        let data = self
            .get(dest, file_name)
            .ok_or_else(|| BackupError::Connectivity(format!("object not found: {}", file_name)))?;
        std::fs::write(local_dir.join(file_name), data)?;
        Ok(())
    }

    async fn delete(&self, dest: &str, file_name: &str) -> Result<()> {
        self.check("delete", dest, file_name)?;
        self.files
            .lock()
            .unwrap()
            .remove(&(dest.to_string(), file_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| BackupError::Connectivity(format!("object not found: {}", file_name)))
    }

    async fn test_access(&self, dest: &str) -> Result<()> {
        self.check("access", dest, "")
    }
}
