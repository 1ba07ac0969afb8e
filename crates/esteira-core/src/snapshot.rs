use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::SnapshotError;
use crate::message::Message;

/// JSON-backed save/load of messages awaiting processing, used for crash
/// recovery and for handing a batch from the publisher to the processor in
/// local mode.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create the parent directory if needed. The file itself appears on the
    /// first `save`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialise the given messages, replacing any previous snapshot.
    pub fn save(&self, messages: &[Message]) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(messages)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// The previously saved list, order preserved. An absent or unparseable
    /// file reads as the empty list.
    pub fn load(&self) -> Result<Vec<Message>, SnapshotError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot unreadable, treating as empty");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> SnapshotStore {
        SnapshotStore::new(dir.path().join("snapshot.json")).unwrap()
    }

    #[test]
    fn save_then_load_is_the_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let messages = vec![
            Message::new("OrderService", "order-created 1001"),
            Message::new("BillingService", "invoice-issued 77"),
            Message::new("InventoryService", "stock-adjusted 9"),
        ];

        store.save(&messages).unwrap();
        assert_eq!(store.load().unwrap(), messages);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn invalid_json_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_replaces_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store
            .save(&[Message::new("a", "1"), Message::new("a", "2")])
            .unwrap();
        let only = vec![Message::new("b", "3")];
        store.save(&only).unwrap();
        assert_eq!(store.load().unwrap(), only);
    }

    #[test]
    fn new_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/snapshot.json");
        let store = SnapshotStore::new(&path).unwrap();
        store.save(&[]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn wire_fields_use_integer_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(&[Message::new("s", "p")]).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"MessageId\""));
        assert!(raw.contains("\"SourceSystem\""));
        assert!(raw.contains("\"Status\": 0"));
    }
}
