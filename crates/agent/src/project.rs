//! Project state layout and the dialogs index.
//!
//! Everything the server persists lives under `<project>/.codeforge/`. The
//! journal is the source of truth for dialog content; `dialogs/index.json` is
//! a derived projection holding dialog metadata and the current selection,
//! rewritten atomically (temp file + rename) on every mutation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

/// Reserved dialog used by IDE-side inspection. It shares one journal across
/// uses and never appears in the dialog index.
pub const INSPECTOR_DIALOG: &str = "inspector";

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".codeforge";

/// Metadata row of one dialog in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_approved_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_checkpoint: Option<String>,
}

/// The persisted `dialogs/index.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogsIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_dialog_id: Option<String>,
    #[serde(default)]
    pub dialogs: Vec<DialogMeta>,
}

/// One opened project: the workspace root plus its state directory.
pub struct Project {
    root: PathBuf,
    state_dir: PathBuf,
    index_lock: Mutex<()>,
}

impl Project {
    pub fn open(root: impl Into<PathBuf>) -> AgentResult<Self> {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        fs::create_dir_all(state_dir.join("dialogs"))?;
        Ok(Self {
            root,
            state_dir,
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn dialogs_dir(&self) -> PathBuf {
        self.state_dir.join("dialogs")
    }

    fn index_path(&self) -> PathBuf {
        self.dialogs_dir().join("index.json")
    }

    /// Journal location for a dialog. The inspector shares one journal at the
    /// dialogs root instead of owning a directory.
    pub fn journal_path(&self, dialog_id: &str) -> PathBuf {
        if dialog_id == INSPECTOR_DIALOG {
            self.dialogs_dir().join("journal.sqlite")
        } else {
            self.dialogs_dir().join(dialog_id).join("journal.sqlite")
        }
    }

    /// Versioning repository location for a dialog.
    pub fn repo_dir(&self, dialog_id: &str) -> PathBuf {
        self.dialogs_dir().join(dialog_id).join("repo")
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    // ── Dialog index ───────────────────────────────────────────────────────

    pub fn load_dialogs_index(&self) -> AgentResult<DialogsIndex> {
        let path = self.index_path();
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DialogsIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_dialogs_index(&self, index: &DialogsIndex) -> AgentResult<()> {
        let path = self.index_path();
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(index)?;
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Create a dialog with a fresh id. The reserved inspector id cannot be
    /// created this way.
    pub fn create_dialog(
        &self,
        title: Option<String>,
        set_current: bool,
    ) -> AgentResult<DialogMeta> {
        let _guard = self.index_lock.lock();
        let id = Uuid::new_v4().to_string();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let meta = DialogMeta {
            id: id.clone(),
            title,
            created_at: now,
            updated_at: now,
            active_session: None,
            last_approved_at: None,
            initial_checkpoint: None,
        };

        let mut index = self.load_dialogs_index()?;
        index.dialogs.push(meta.clone());
        if set_current {
            index.current_dialog_id = Some(id.clone());
        }
        self.save_dialogs_index(&index)?;

        fs::create_dir_all(self.dialogs_dir().join(&id))?;
        Ok(meta)
    }

    pub fn get_dialog(&self, dialog_id: &str) -> AgentResult<DialogMeta> {
        let index = self.load_dialogs_index()?;
        index
            .dialogs
            .into_iter()
            .find(|d| d.id == dialog_id)
            .ok_or_else(|| AgentError::DialogNotFound {
                dialog_id: dialog_id.to_string(),
            })
    }

    pub fn dialog_exists(&self, dialog_id: &str) -> bool {
        dialog_id == INSPECTOR_DIALOG
            || self
                .load_dialogs_index()
                .map(|index| index.dialogs.iter().any(|d| d.id == dialog_id))
                .unwrap_or(false)
    }

    /// Delete the dialog's on-disk directory and its index row.
    pub fn delete_dialog(&self, dialog_id: &str) -> AgentResult<()> {
        if dialog_id == INSPECTOR_DIALOG {
            return Err(AgentError::InvalidRequest(
                "the inspector dialog cannot be deleted".to_string(),
            ));
        }
        let _guard = self.index_lock.lock();
        let mut index = self.load_dialogs_index()?;
        let before = index.dialogs.len();
        index.dialogs.retain(|d| d.id != dialog_id);
        if index.dialogs.len() == before {
            return Err(AgentError::DialogNotFound {
                dialog_id: dialog_id.to_string(),
            });
        }
        if index.current_dialog_id.as_deref() == Some(dialog_id) {
            index.current_dialog_id = None;
        }
        self.save_dialogs_index(&index)?;

        let dir = self.dialogs_dir().join(dialog_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn current_dialog_id(&self) -> AgentResult<Option<String>> {
        Ok(self.load_dialogs_index()?.current_dialog_id)
    }

    pub fn set_current_dialog(&self, dialog_id: &str) -> AgentResult<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.load_dialogs_index()?;
        if !index.dialogs.iter().any(|d| d.id == dialog_id) {
            return Err(AgentError::DialogNotFound {
                dialog_id: dialog_id.to_string(),
            });
        }
        index.current_dialog_id = Some(dialog_id.to_string());
        self.save_dialogs_index(&index)
    }

    /// Apply `mutate` to a dialog's metadata row and persist the index.
    pub fn update_dialog<F>(&self, dialog_id: &str, mutate: F) -> AgentResult<DialogMeta>
    where
        F: FnOnce(&mut DialogMeta),
    {
        let _guard = self.index_lock.lock();
        let mut index = self.load_dialogs_index()?;
        let meta = index
            .dialogs
            .iter_mut()
            .find(|d| d.id == dialog_id)
            .ok_or_else(|| AgentError::DialogNotFound {
                dialog_id: dialog_id.to_string(),
            })?;
        mutate(meta);
        meta.updated_at = OffsetDateTime::now_utc().unix_timestamp();
        let updated = meta.clone();
        self.save_dialogs_index(&index)?;
        Ok(updated)
    }

    /// Bump a dialog's `updated_at`. The inspector is exempt: probing it must
    /// not reorder the user's dialog list.
    pub fn touch_dialog(&self, dialog_id: &str) {
        if dialog_id == INSPECTOR_DIALOG {
            return;
        }
        let _ = self.update_dialog(dialog_id, |_| {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        let project = Project::open(dir.path()).unwrap();
        (dir, project)
    }

    #[test]
    fn create_and_load_round_trip() {
        let (_dir, project) = project();
        let meta = project.create_dialog(Some("First".into()), true).unwrap();

        let index = project.load_dialogs_index().unwrap();
        assert_eq!(index.dialogs.len(), 1);
        assert_eq!(index.current_dialog_id.as_deref(), Some(meta.id.as_str()));
        assert_eq!(project.get_dialog(&meta.id).unwrap().title.as_deref(), Some("First"));
    }

    #[test]
    fn delete_removes_row_and_directory() {
        let (_dir, project) = project();
        let meta = project.create_dialog(None, true).unwrap();
        let dialog_dir = project.dialogs_dir().join(&meta.id);
        assert!(dialog_dir.exists());

        project.delete_dialog(&meta.id).unwrap();
        assert!(!dialog_dir.exists());
        assert!(project.load_dialogs_index().unwrap().dialogs.is_empty());
        assert!(project.current_dialog_id().unwrap().is_none());
    }

    #[test]
    fn inspector_uses_shared_journal_path() {
        let (_dir, project) = project();
        assert_eq!(
            project.journal_path(INSPECTOR_DIALOG),
            project.dialogs_dir().join("journal.sqlite")
        );
        assert_eq!(
            project.journal_path("d-1"),
            project.dialogs_dir().join("d-1").join("journal.sqlite")
        );
    }

    #[test]
    fn inspector_cannot_be_deleted_or_touched() {
        let (_dir, project) = project();
        assert!(project.delete_dialog(INSPECTOR_DIALOG).is_err());
        // Touching the inspector is a silent no-op.
        project.touch_dialog(INSPECTOR_DIALOG);
        assert!(project.load_dialogs_index().unwrap().dialogs.is_empty());
    }

    #[test]
    fn update_bumps_updated_at() {
        let (_dir, project) = project();
        let meta = project.create_dialog(None, false).unwrap();
        let updated = project
            .update_dialog(&meta.id, |d| d.title = Some("Renamed".into()))
            .unwrap();
        assert_eq!(updated.title.as_deref(), Some("Renamed"));
        assert!(updated.updated_at >= meta.updated_at);
    }

    #[test]
    fn set_current_requires_existing_dialog() {
        let (_dir, project) = project();
        assert!(project.set_current_dialog("missing").is_err());
    }
}
