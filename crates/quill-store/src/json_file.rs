use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use quill_core::conversation::Conversation;

use crate::error::StoreError;
use crate::names::validate_session_name;
use crate::ConversationStore;

const FILE_NAME: &str = "conversation.json";

/// One pretty-printed JSON file per session:
/// `<data_dir>/sessions/<name>/conversation.json`.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("sessions"),
        }
    }

    fn file_for(&self, session: &str) -> Result<PathBuf, StoreError> {
        validate_session_name(session)?;
        Ok(self.root.join(session).join(FILE_NAME))
    }
}

impl ConversationStore for JsonFileStore {
    #[instrument(skip(self))]
    fn load(&self, session: &str) -> Result<Option<Conversation>, StoreError> {
        let path = self.file_for(session)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
        };
        let conversation: Conversation = serde_json::from_str(&content)?;
        debug!(turns = conversation.len(), "conversation loaded");
        Ok(Some(conversation))
    }

    #[instrument(skip(self, conversation), fields(turns = conversation.len()))]
    fn save(&self, session: &str, conversation: &Conversation) -> Result<(), StoreError> {
        let path = self.file_for(session)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        // Write-then-rename so a crash never leaves a truncated file.
        let json = serde_json::to_string_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_session_name(&name).is_ok() && entry.path().join(FILE_NAME).is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    #[instrument(skip(self))]
    fn delete(&self, session: &str) -> Result<bool, StoreError> {
        let path = self.file_for(session)?;
        let Some(dir) = path.parent() else {
            return Ok(false);
        };
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(dir)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        let mut c = Conversation::new("The storm has passed.");
        c.set_title("Lighthouse");
        c.add_user_turn("Climb the stairs.");
        c.add_assistant_turn("The lamp room is dark.");
        c.add_user_turn("Light it.");
        assert!(c.apply_fold("Mara climbed to the dark lamp room.", 2));
        c
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let original = sample();

        store.save("lighthouse", &original).unwrap();
        assert!(dir.path().join("sessions/lighthouse/conversation.json").is_file());
        assert!(!dir.path().join("sessions/lighthouse/conversation.json.tmp").exists());

        let loaded = store.load("lighthouse").unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.fold_boundary(), 2);
    }

    #[test]
    fn missing_session_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("nobody").unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut c = sample();
        store.save("s", &c).unwrap();
        c.add_assistant_turn("Light floods the sea.");
        store.save("s", &c).unwrap();
        assert_eq!(store.load("s").unwrap().unwrap().len(), 4);
    }

    #[test]
    fn list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.save("beta", &sample()).unwrap();
        store.save("alpha", &sample()).unwrap();
        std::fs::create_dir_all(dir.path().join("sessions/empty-dir")).unwrap();

        assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
        assert!(store.delete("alpha").unwrap());
        assert!(!store.delete("alpha").unwrap());
        assert_eq!(store.list().unwrap(), vec!["beta"]);
    }

    #[test]
    fn corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let path = dir.path().join("sessions/bad/conversation.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(matches!(store.load("bad"), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn boundary_past_turns_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut value = serde_json::to_value(sample()).unwrap();
        value["fold_boundary"] = serde_json::json!(9);
        let path = dir.path().join("sessions/skewed/conversation.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, value.to_string()).unwrap();
        assert!(matches!(store.load("skewed"), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn invalid_name_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(matches!(
            store.save("../escape", &sample()),
            Err(StoreError::InvalidName(_))
        ));
        assert!(!dir.path().join("escape").exists());
    }
}
