//! The per-dialog versioning engine.
//!
//! Repository layout: a bare gix repository under the dialog's state
//! directory. The staging area and the tracked-paths set are persisted as
//! JSON sidecar files next to the refs, so a restarted server picks up
//! exactly where it left off. Branch heads are mirrored into the journal's
//! `dialog_branches` table, which is the resolution source for `main` /
//! `session_N` names.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::session::{BranchPointer, BranchType, DialogJournal, SessionRecord, SessionState};

use super::diff::{is_binary, unified_diff};
use super::{
    ApproveOutcome, CheckpointInfo, FileChange, FileChangeStatus, ResetOutcome, VersioningError,
    VersioningResult, normalize_path,
};

const STAGING_FILE: &str = "staging.json";
const TRACKED_FILE: &str = "tracked_paths.json";

/// What a tool did to a file inside an edit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    Write,
    Delete,
}

/// One staged path: either a blob written to the object store or an explicit
/// deletion relative to the session head.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StagedEntry {
    Blob { oid: String, executable: bool },
    Deleted,
}

type Staging = BTreeMap<String, StagedEntry>;
type TrackedPaths = BTreeSet<String>;

/// Pre-images captured by `start_edit`, plus deferred staging operations.
struct EditTransaction {
    pre_images: BTreeMap<String, Option<Vec<u8>>>,
    pending: Vec<(String, TrackOp)>,
}

/// Handle to one dialog's versioning state. Cheap to clone; repository
/// access happens on the blocking pool per operation.
#[derive(Clone)]
pub struct VersioningEngine {
    dialog_id: String,
    repo_dir: PathBuf,
    workspace: PathBuf,
    journal: DialogJournal,
    txn: Arc<parking_lot::Mutex<Option<EditTransaction>>>,
}

impl VersioningEngine {
    pub fn new(
        dialog_id: impl Into<String>,
        repo_dir: PathBuf,
        workspace: PathBuf,
        journal: DialogJournal,
    ) -> Self {
        Self {
            dialog_id: dialog_id.into(),
            repo_dir,
            workspace,
            journal,
            txn: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    // ── Sessions and branch pointers ───────────────────────────────────────

    /// The active session, created as `session_1` on first use.
    pub async fn ensure_active_session(&self) -> VersioningResult<SessionRecord> {
        if let Some(session) = self.journal.active_session(&self.dialog_id).await? {
            return Ok(session);
        }

        let existing = self.journal.list_sessions(&self.dialog_id).await?;
        let name = format!("session_{}", existing.len() + 1);
        let record = SessionRecord {
            name: name.clone(),
            ref_name: format!("refs/heads/{name}"),
            status: SessionState::Active,
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            closed_at: None,
            approved_commit: None,
            checkpoints_count: 0,
            branch_exists: false,
        };
        self.journal.insert_session(&self.dialog_id, &record).await?;
        self.journal
            .set_branch(
                &self.dialog_id,
                &BranchPointer {
                    branch_type: BranchType::Session,
                    ref_name: record.ref_name.clone(),
                    head_commit: None,
                    valid: true,
                },
            )
            .await?;
        if self
            .journal
            .get_branch(&self.dialog_id, BranchType::Main)
            .await?
            .is_none()
        {
            self.journal
                .set_branch(
                    &self.dialog_id,
                    &BranchPointer {
                        branch_type: BranchType::Main,
                        ref_name: "refs/heads/main".to_string(),
                        head_commit: None,
                        valid: true,
                    },
                )
                .await?;
        }
        info!("dialog {}: opened {}", self.dialog_id, name);
        Ok(record)
    }

    pub async fn main_head(&self) -> VersioningResult<Option<String>> {
        Ok(self
            .journal
            .get_branch(&self.dialog_id, BranchType::Main)
            .await?
            .and_then(|b| b.head_commit))
    }

    pub async fn session_head(&self) -> VersioningResult<Option<String>> {
        Ok(self
            .journal
            .get_branch(&self.dialog_id, BranchType::Session)
            .await?
            .and_then(|b| b.head_commit))
    }

    /// Whether the active session has anything main does not: commits past
    /// the approved baseline, or staged-but-uncommitted changes.
    pub async fn has_unapproved(&self) -> VersioningResult<bool> {
        if self.has_staged_changes().await? {
            return Ok(true);
        }
        let main = self.main_head().await?;
        let head = self.session_head().await?;
        Ok(head.is_some() && head != main)
    }

    // ── Staging ────────────────────────────────────────────────────────────

    /// Hash a file's current on-disk bytes into a blob and stage it.
    /// Staging bytes identical to the session head is a no-op.
    pub async fn stage_file(&self, path: &str) -> VersioningResult<()> {
        let rel = normalize_path(path);
        let head = self.session_head_oid().await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.blocking_stage_file(&rel, head))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    /// Record an explicit deletion relative to the session head.
    pub async fn stage_file_deletion(&self, path: &str) -> VersioningResult<()> {
        let rel = normalize_path(path);
        let head = self.session_head_oid().await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let repo = this.open_or_init()?;
            let mut staging = this.load_staging()?;
            let in_head = match head {
                Some(head) => this.collect_commit_tree(&repo, head)?.contains_key(&rel),
                None => false,
            };
            if in_head {
                staging.insert(rel, StagedEntry::Deleted);
            } else {
                // Deleting a file the head never had simply cancels any
                // staged blob for it.
                staging.remove(&rel);
            }
            this.save_staging(&staging)
        })
        .await
        .map_err(|_| VersioningError::TaskPanicked)?
    }

    pub async fn has_staged_changes(&self) -> VersioningResult<bool> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || Ok(!this.load_staging()?.is_empty()))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    /// Staged paths with their status relative to the session head.
    pub async fn get_staged_files(&self) -> VersioningResult<Vec<FileChange>> {
        let head = self.session_head_oid().await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.blocking_staged_changes(head, false))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    /// Reset staging to match the session head.
    pub async fn clear_staging(&self) -> VersioningResult<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.save_staging(&Staging::new()))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    // ── Edit transactions ──────────────────────────────────────────────────

    /// Begin a best-effort transaction over `paths`: their current content is
    /// captured so `abort_edit` can roll the files back.
    pub async fn start_edit(&self, paths: &[String]) -> VersioningResult<()> {
        let mut pre_images = BTreeMap::new();
        for path in paths {
            let rel = normalize_path(path);
            let disk = self.workspace.join(&rel);
            let bytes = match fs::read(&disk) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(VersioningError::Filesystem(e.to_string())),
            };
            pre_images.insert(rel, bytes);
        }
        *self.txn.lock() = Some(EditTransaction {
            pre_images,
            pending: Vec::new(),
        });
        Ok(())
    }

    /// Record a file change made inside the transaction; the corresponding
    /// staging update is deferred to `finalize_edit`.
    pub fn track_file_change(&self, path: &str, op: TrackOp) -> VersioningResult<()> {
        let mut guard = self.txn.lock();
        let txn = guard.as_mut().ok_or(VersioningError::NoTransaction)?;
        txn.pending.push((normalize_path(path), op));
        Ok(())
    }

    /// Restore every pre-image captured by `start_edit` and drop the
    /// transaction.
    pub async fn abort_edit(&self) -> VersioningResult<()> {
        let txn = self.txn.lock().take().ok_or(VersioningError::NoTransaction)?;
        for (rel, pre_image) in txn.pre_images {
            let disk = self.workspace.join(&rel);
            let result = match pre_image {
                Some(bytes) => {
                    if let Some(parent) = disk.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    fs::write(&disk, bytes)
                }
                None => match fs::remove_file(&disk) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = result {
                warn!("rollback of {} failed: {}", rel, e);
            }
        }
        Ok(())
    }

    /// Apply the transaction's deferred staging operations and discard the
    /// rollback snapshot.
    pub async fn finalize_edit(&self) -> VersioningResult<()> {
        let pending = {
            let mut guard = self.txn.lock();
            let txn = guard.take().ok_or(VersioningError::NoTransaction)?;
            txn.pending
        };
        for (path, op) in pending {
            match op {
                TrackOp::Write => self.stage_file(&path).await?,
                TrackOp::Delete => self.stage_file_deletion(&path).await?,
            }
        }
        Ok(())
    }

    // ── Checkpoints ────────────────────────────────────────────────────────

    /// Commit the staged tree onto the active session branch. Files already
    /// known to the repo (head tree or tracked set) are re-scanned first so
    /// out-of-band edits to them are captured. Returns the session head
    /// unchanged when there is nothing to commit.
    pub async fn create_checkpoint(&self, message: &str) -> VersioningResult<String> {
        let session = self.ensure_active_session().await?;
        let head = self.session_head_oid().await?;
        let message = message.to_string();
        let ref_name = session.ref_name.clone();

        let this = self.clone();
        let (commit_id, created) = tokio::task::spawn_blocking(move || {
            this.blocking_checkpoint(&message, &ref_name, head)
        })
        .await
        .map_err(|_| VersioningError::TaskPanicked)??;

        if created {
            self.journal
                .increment_checkpoints(&self.dialog_id, &session.name)
                .await?;
            self.journal
                .set_branch(
                    &self.dialog_id,
                    &BranchPointer {
                        branch_type: BranchType::Session,
                        ref_name: session.ref_name,
                        head_commit: Some(commit_id.clone()),
                        valid: true,
                    },
                )
                .await?;
            debug!("dialog {}: checkpoint {}", self.dialog_id, commit_id);
        }
        Ok(commit_id)
    }

    /// Checkpoints reachable from the session head, oldest first.
    pub async fn list_checkpoints(&self) -> VersioningResult<Vec<CheckpointInfo>> {
        let Some(head) = self.session_head_oid().await? else {
            return Ok(Vec::new());
        };
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.blocking_list_checkpoints(head))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    /// Materialize a checkpoint's tree in the workspace.
    ///
    /// Files present in the target are overwritten from blob bytes. Files
    /// that exist now (tracked set ∪ session head tree) but not in the target
    /// are deleted only when the agent introduced them; user-owned files are
    /// left untouched. A fresh checkpoint is created afterwards so the
    /// restore itself is reversible.
    pub async fn restore_checkpoint(
        &self,
        commit_id: &str,
    ) -> VersioningResult<super::RestoreOutcome> {
        let target = parse_oid(commit_id)?;
        let head = self.session_head_oid().await?;
        let this = self.clone();
        let restored = tokio::task::spawn_blocking(move || this.blocking_restore(target, head))
            .await
            .map_err(|_| VersioningError::TaskPanicked)??;

        let short: String = commit_id.chars().take(8).collect();
        let new_checkpoint = self
            .create_checkpoint(&format!("Restore to {short}"))
            .await?;
        Ok(super::RestoreOutcome {
            restored_paths: restored,
            new_checkpoint,
        })
    }

    // ── Approve / reset ────────────────────────────────────────────────────

    /// Fast-forward `main` to the session head and open the next session.
    pub async fn approve_all(&self, message: Option<&str>) -> VersioningResult<ApproveOutcome> {
        let session = self.ensure_active_session().await?;

        let message = message.unwrap_or("Approve session").to_string();
        // A final checkpoint captures anything still staged or drifted.
        let head_id = self.create_checkpoint(&message).await?;
        if self.session_head().await?.is_none() {
            return Err(VersioningError::NotFound(
                "session has no checkpoints to approve".to_string(),
            ));
        }

        let head = parse_oid(&head_id)?;
        let old_main = self.main_head_oid().await?;

        let this = self.clone();
        let commits_approved =
            tokio::task::spawn_blocking(move || this.blocking_count_range(old_main, head))
                .await
                .map_err(|_| VersioningError::TaskPanicked)??;

        let this = self.clone();
        let head_for_ref = head;
        tokio::task::spawn_blocking(move || {
            let repo = this.open_or_init()?;
            this.update_ref(&repo, "refs/heads/main", head_for_ref, "approve session")
        })
        .await
        .map_err(|_| VersioningError::TaskPanicked)??;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.journal
            .set_session_status(
                &self.dialog_id,
                &session.name,
                SessionState::Merged,
                Some(now),
                Some(&head_id),
            )
            .await?;
        self.journal
            .set_branch(
                &self.dialog_id,
                &BranchPointer {
                    branch_type: BranchType::Main,
                    ref_name: "refs/heads/main".to_string(),
                    head_commit: Some(head_id.clone()),
                    valid: true,
                },
            )
            .await?;

        let new_session = self.open_next_session(&session.name, head, &head_id).await?;

        // The approval boundary moved; nothing is "agent-introduced" anymore.
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.save_tracked(&TrackedPaths::new()))
            .await
            .map_err(|_| VersioningError::TaskPanicked)??;

        info!(
            "dialog {}: approved {} commit(s) into main, now on {}",
            self.dialog_id, commits_approved, new_session
        );
        Ok(ApproveOutcome {
            approved_commit: head_id,
            new_session,
            commits_approved,
        })
    }

    /// Abandon the active session and open a new one at `main`. The caller
    /// realizes the files on disk with `restore_checkpoint(reset_to)`.
    pub async fn reset_to_approved(&self) -> VersioningResult<ResetOutcome> {
        let session = self.ensure_active_session().await?;
        let main_id = self
            .main_head()
            .await?
            .ok_or(VersioningError::NoApprovedCommit)?;

        // Auto-save anything uncommitted on the session being abandoned. A
        // session with no commits and nothing staged has nothing to save.
        let head_before = self.session_head().await?;
        let pre_reset_checkpoint =
            if head_before.is_some() || self.has_staged_changes().await? {
                let saved = self.create_checkpoint("Auto-save before reset").await?;
                (head_before.as_deref() != Some(saved.as_str())).then_some(saved)
            } else {
                None
            };

        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.journal
            .set_session_status(
                &self.dialog_id,
                &session.name,
                SessionState::Abandoned,
                Some(now),
                None,
            )
            .await?;

        let main = parse_oid(&main_id)?;
        let new_session = self.open_next_session(&session.name, main, &main_id).await?;

        info!(
            "dialog {}: reset to {} on {}",
            self.dialog_id, main_id, new_session
        );
        Ok(ResetOutcome {
            reset_to: main_id,
            new_session,
            pre_reset_checkpoint,
        })
    }

    // ── Diffs ──────────────────────────────────────────────────────────────

    /// Compare two committed trees. `a` and `b` accept `main`, a session
    /// name, or a commit id.
    pub async fn get_tree_diff(
        &self,
        ref_a: &str,
        ref_b: &str,
        include_diff: bool,
    ) -> VersioningResult<Vec<FileChange>> {
        let a = self.resolve_commitish(ref_a).await?;
        let b = self.resolve_commitish(ref_b).await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.blocking_tree_diff(a, b, include_diff))
            .await
            .map_err(|_| VersioningError::TaskPanicked)?
    }

    /// Everything the active session changed relative to the approved
    /// baseline: committed tree differences merged with staged entries.
    pub async fn session_changed_files(
        &self,
        include_diff: bool,
    ) -> VersioningResult<Vec<FileChange>> {
        let main = self.main_head_oid().await?;
        let head = self.session_head_oid().await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut by_path: BTreeMap<String, FileChange> = BTreeMap::new();
            for change in this.blocking_tree_diff(main, head, include_diff)? {
                by_path.insert(change.path.clone(), change);
            }
            // Staged entries are measured against main: they are unapproved
            // work even when the session has no commits yet.
            for change in this.blocking_staged_changes(main, include_diff)? {
                by_path.insert(change.path.clone(), change);
            }
            Ok(by_path.into_values().collect())
        })
        .await
        .map_err(|_| VersioningError::TaskPanicked)?
    }

    // ── Internal: async helpers ────────────────────────────────────────────

    async fn session_head_oid(&self) -> VersioningResult<Option<gix::ObjectId>> {
        self.session_head().await?.map(|id| parse_oid(&id)).transpose()
    }

    async fn main_head_oid(&self) -> VersioningResult<Option<gix::ObjectId>> {
        self.main_head().await?.map(|id| parse_oid(&id)).transpose()
    }

    async fn resolve_commitish(&self, name: &str) -> VersioningResult<Option<gix::ObjectId>> {
        if name == "main" || name == "refs/heads/main" {
            return self.main_head_oid().await;
        }
        if let Some(session) = self
            .journal
            .get_session(&self.dialog_id, name.trim_start_matches("refs/heads/"))
            .await?
        {
            // The active session resolves through its branch pointer; closed
            // sessions resolve through their recorded approval commit.
            if session.status == SessionState::Active {
                return self.session_head_oid().await;
            }
            if let Some(approved) = session.approved_commit {
                return Ok(Some(parse_oid(&approved)?));
            }
            return Ok(None);
        }
        Ok(Some(parse_oid(name)?))
    }

    async fn open_next_session(
        &self,
        current_name: &str,
        head: gix::ObjectId,
        head_id: &str,
    ) -> VersioningResult<String> {
        let next_number = current_name
            .strip_prefix("session_")
            .and_then(|n| n.parse::<u32>().ok())
            .map(|n| n + 1);
        let name = match next_number {
            Some(n) => format!("session_{n}"),
            None => {
                let count = self.journal.list_sessions(&self.dialog_id).await?.len();
                format!("session_{}", count + 1)
            }
        };
        let ref_name = format!("refs/heads/{name}");

        let this = self.clone();
        let ref_for_repo = ref_name.clone();
        tokio::task::spawn_blocking(move || {
            let repo = this.open_or_init()?;
            this.update_ref(&repo, &ref_for_repo, head, "open session")
        })
        .await
        .map_err(|_| VersioningError::TaskPanicked)??;

        self.journal
            .insert_session(
                &self.dialog_id,
                &SessionRecord {
                    name: name.clone(),
                    ref_name: ref_name.clone(),
                    status: SessionState::Active,
                    created_at: OffsetDateTime::now_utc().unix_timestamp(),
                    closed_at: None,
                    approved_commit: None,
                    checkpoints_count: 0,
                    branch_exists: true,
                },
            )
            .await?;
        self.journal
            .set_branch(
                &self.dialog_id,
                &BranchPointer {
                    branch_type: BranchType::Session,
                    ref_name,
                    head_commit: Some(head_id.to_string()),
                    valid: true,
                },
            )
            .await?;
        Ok(name)
    }

    // ── Internal: blocking repository operations ───────────────────────────

    /// Initialize or open the bare repository.
    ///
    /// `core.worktree` points at the user's workspace and a local identity is
    /// written so commits can be created without global git configuration.
    fn open_or_init(&self) -> VersioningResult<gix::Repository> {
        if self.repo_dir.join("HEAD").exists() {
            return gix::open(&self.repo_dir).map_err(|e| {
                VersioningError::Repository(format!("failed to open repository: {e}"))
            });
        }

        fs::create_dir_all(&self.repo_dir).map_err(|e| {
            VersioningError::Filesystem(format!("failed to create repository directory: {e}"))
        })?;
        gix::init_bare(&self.repo_dir).map_err(|e| {
            VersioningError::Repository(format!("failed to initialize repository: {e}"))
        })?;

        let config_path = self.repo_dir.join("config");
        let config_content = fs::read_to_string(&config_path).unwrap_or_default();
        let extra = format!(
            "\n[core]\n\tworktree = {}\n[user]\n\tname = codeforge\n\temail = versioning@codeforge.local\n",
            self.workspace.display()
        );
        fs::write(&config_path, format!("{config_content}{extra}"))
            .map_err(|e| VersioningError::Filesystem(format!("failed to write config: {e}")))?;

        gix::open(&self.repo_dir).map_err(|e| {
            VersioningError::Repository(format!("failed to re-open repository: {e}"))
        })
    }

    fn update_ref(
        &self,
        repo: &gix::Repository,
        name: &str,
        target: gix::ObjectId,
        log_message: &str,
    ) -> VersioningResult<()> {
        use gix::refs::transaction::PreviousValue;
        repo.reference(name, target, PreviousValue::Any, log_message)
            .map_err(|e| VersioningError::Repository(format!("failed to update {name}: {e}")))?;
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        self.repo_dir.join(STAGING_FILE)
    }

    fn tracked_path(&self) -> PathBuf {
        self.repo_dir.join(TRACKED_FILE)
    }

    fn load_staging(&self) -> VersioningResult<Staging> {
        load_json(&self.staging_path())
    }

    fn save_staging(&self, staging: &Staging) -> VersioningResult<()> {
        save_json(&self.staging_path(), staging)
    }

    fn load_tracked(&self) -> VersioningResult<TrackedPaths> {
        load_json(&self.tracked_path())
    }

    fn save_tracked(&self, tracked: &TrackedPaths) -> VersioningResult<()> {
        save_json(&self.tracked_path(), tracked)
    }

    fn blocking_stage_file(
        &self,
        rel: &str,
        head: Option<gix::ObjectId>,
    ) -> VersioningResult<()> {
        let repo = self.open_or_init()?;
        let disk = self.workspace.join(rel);
        let content = fs::read(&disk)
            .map_err(|e| VersioningError::Filesystem(format!("failed to read {rel}: {e}")))?;

        let oid = repo
            .write_blob(&content)
            .map_err(|e| VersioningError::Repository(format!("failed to write blob: {e}")))?
            .detach();
        let executable = is_executable(&disk);

        let mut staging = self.load_staging()?;
        let head_entry = match head {
            Some(head) => self.collect_commit_tree(&repo, head)?.get(rel).cloned(),
            None => None,
        };
        match head_entry {
            Some((head_oid, head_exec)) if head_oid == oid && head_exec == executable => {
                // Identical to the committed content: staging it is a no-op.
                staging.remove(rel);
            }
            _ => {
                staging.insert(
                    rel.to_string(),
                    StagedEntry::Blob {
                        oid: oid.to_string(),
                        executable,
                    },
                );
            }
        }
        self.save_staging(&staging)
    }

    /// Re-hash every file the repo knows about (head tree ∪ tracked set) and
    /// stage content drift, including deletions of vanished files.
    fn stage_changed_known_files(
        &self,
        repo: &gix::Repository,
        staging: &mut Staging,
        head_tree: &BTreeMap<String, (gix::ObjectId, bool)>,
        tracked: &TrackedPaths,
    ) -> VersioningResult<()> {
        let mut known: BTreeSet<String> = head_tree.keys().cloned().collect();
        known.extend(tracked.iter().cloned());

        for rel in known {
            if staging.contains_key(&rel) {
                continue;
            }
            let disk = self.workspace.join(&rel);
            match fs::read(&disk) {
                Ok(content) => {
                    let oid = repo
                        .write_blob(&content)
                        .map_err(|e| {
                            VersioningError::Repository(format!("failed to write blob: {e}"))
                        })?
                        .detach();
                    let executable = is_executable(&disk);
                    match head_tree.get(&rel) {
                        Some((head_oid, head_exec))
                            if *head_oid == oid && *head_exec == executable => {}
                        _ => {
                            staging.insert(rel, StagedEntry::Blob {
                                oid: oid.to_string(),
                                executable,
                            });
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if head_tree.contains_key(&rel) {
                        staging.insert(rel, StagedEntry::Deleted);
                    }
                }
                Err(e) => {
                    warn!("skipping unreadable file {} during scan: {}", rel, e);
                }
            }
        }
        Ok(())
    }

    fn blocking_checkpoint(
        &self,
        message: &str,
        session_ref: &str,
        head: Option<gix::ObjectId>,
    ) -> VersioningResult<(String, bool)> {
        let repo = self.open_or_init()?;
        let head_tree = match head {
            Some(head) => self.collect_commit_tree(&repo, head)?,
            None => BTreeMap::new(),
        };

        let mut staging = self.load_staging()?;
        let tracked = self.load_tracked()?;
        self.stage_changed_known_files(&repo, &mut staging, &head_tree, &tracked)?;

        if staging.is_empty()
            && let Some(head) = head
        {
            return Ok((head.to_string(), false));
        }

        // Next tree = head tree with staging applied on top.
        let mut next_tree = head_tree;
        let mut staged_blobs = Vec::new();
        let mut staged_deletions = Vec::new();
        for (path, entry) in &staging {
            match entry {
                StagedEntry::Blob { oid, executable } => {
                    next_tree.insert(path.clone(), (parse_oid(oid)?, *executable));
                    staged_blobs.push(path.clone());
                }
                StagedEntry::Deleted => {
                    next_tree.remove(path);
                    staged_deletions.push(path.clone());
                }
            }
        }

        let entries: Vec<(String, gix::ObjectId, bool)> = next_tree
            .into_iter()
            .map(|(path, (oid, exec))| (path, oid, exec))
            .collect();
        let tree_id = build_tree_from_entries(&repo, &entries)?;

        let parents: Vec<gix::ObjectId> = head.into_iter().collect();
        let commit_id = repo
            .commit(session_ref, message, tree_id, parents)
            .map_err(|e| VersioningError::Repository(format!("failed to create commit: {e}")))?
            .detach();

        let mut tracked = tracked;
        for path in &staged_blobs {
            tracked.insert(path.clone());
        }
        for path in &staged_deletions {
            tracked.remove(path);
        }
        self.save_tracked(&tracked)?;
        self.save_staging(&Staging::new())?;

        Ok((commit_id.to_string(), true))
    }

    fn blocking_restore(
        &self,
        target: gix::ObjectId,
        head: Option<gix::ObjectId>,
    ) -> VersioningResult<Vec<String>> {
        let repo = self.open_or_init()?;
        let target_tree = self.collect_commit_tree(&repo, target)?;
        let head_tree = match head {
            Some(head) => self.collect_commit_tree(&repo, head)?,
            None => BTreeMap::new(),
        };
        let mut tracked = self.load_tracked()?;

        let mut touched = Vec::new();

        for (rel, (oid, _exec)) in &target_tree {
            let object = repo
                .find_object(*oid)
                .map_err(|e| VersioningError::Repository(format!("failed to find blob: {e}")))?;
            let disk = self.workspace.join(rel);
            if let Some(parent) = disk.parent() {
                let _ = fs::create_dir_all(parent);
            }
            match fs::write(&disk, &object.data) {
                Ok(()) => touched.push(rel.clone()),
                Err(e) => {
                    // OS locks and permission failures skip the file; the
                    // rest of the restore proceeds.
                    warn!("restore could not write {}: {}", rel, e);
                }
            }
        }

        let mut pre_paths: BTreeSet<String> = head_tree.keys().cloned().collect();
        pre_paths.extend(tracked.iter().cloned());
        for rel in pre_paths {
            if target_tree.contains_key(&rel) || !tracked.contains(&rel) {
                continue;
            }
            let disk = self.workspace.join(&rel);
            match fs::remove_file(&disk) {
                Ok(()) => {
                    touched.push(rel.clone());
                    tracked.remove(&rel);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracked.remove(&rel);
                }
                Err(e) => {
                    warn!("restore could not delete {}: {}", rel, e);
                }
            }
        }

        self.save_tracked(&tracked)?;
        // Disk now mirrors the target; stale staged entries would resurrect
        // pre-restore content at the next checkpoint.
        self.save_staging(&Staging::new())?;
        Ok(touched)
    }

    fn blocking_list_checkpoints(
        &self,
        head: gix::ObjectId,
    ) -> VersioningResult<Vec<CheckpointInfo>> {
        let repo = self.open_or_init()?;
        let mut checkpoints = Vec::new();
        let mut current = Some(head);

        while let Some(oid) = current {
            match repo.find_commit(oid) {
                Ok(commit) => {
                    let timestamp = commit.time().map(|t| t.seconds).unwrap_or(0);
                    let message =
                        String::from_utf8_lossy(commit.message_raw_sloppy()).trim().to_string();
                    checkpoints.push(CheckpointInfo {
                        commit_id: oid.to_string(),
                        message,
                        timestamp,
                    });
                    current = commit.parent_ids().next().map(|id| id.detach());
                }
                Err(_) => break,
            }
        }

        checkpoints.reverse();
        Ok(checkpoints)
    }

    /// Number of commits reachable from `to` but not from `from` along the
    /// first-parent chain.
    fn blocking_count_range(
        &self,
        from: Option<gix::ObjectId>,
        to: gix::ObjectId,
    ) -> VersioningResult<usize> {
        let repo = self.open_or_init()?;
        let mut count = 0;
        let mut current = Some(to);
        while let Some(oid) = current {
            if Some(oid) == from {
                break;
            }
            count += 1;
            current = match repo.find_commit(oid) {
                Ok(commit) => commit.parent_ids().next().map(|id| id.detach()),
                Err(_) => None,
            };
        }
        Ok(count)
    }

    fn blocking_tree_diff(
        &self,
        a: Option<gix::ObjectId>,
        b: Option<gix::ObjectId>,
        include_diff: bool,
    ) -> VersioningResult<Vec<FileChange>> {
        let repo = self.open_or_init()?;
        let tree_a = match a {
            Some(a) => self.collect_commit_tree(&repo, a)?,
            None => BTreeMap::new(),
        };
        let tree_b = match b {
            Some(b) => self.collect_commit_tree(&repo, b)?,
            None => BTreeMap::new(),
        };

        let mut paths: BTreeSet<&String> = tree_a.keys().collect();
        paths.extend(tree_b.keys());

        let mut changes = Vec::new();
        for path in paths {
            let before = tree_a.get(path);
            let after = tree_b.get(path);
            match (before, after) {
                (None, Some((oid, _))) => {
                    let bytes = read_blob(&repo, *oid)?;
                    changes.push(self.describe_change(
                        path,
                        FileChangeStatus::Added,
                        None,
                        Some(&bytes),
                        include_diff,
                    ));
                }
                (Some((oid, _)), None) => {
                    let bytes = read_blob(&repo, *oid)?;
                    changes.push(self.describe_change(
                        path,
                        FileChangeStatus::Deleted,
                        Some(&bytes),
                        None,
                        include_diff,
                    ));
                }
                (Some((oid_a, _)), Some((oid_b, _))) if oid_a != oid_b => {
                    let before_bytes = read_blob(&repo, *oid_a)?;
                    let after_bytes = read_blob(&repo, *oid_b)?;
                    changes.push(self.describe_change(
                        path,
                        FileChangeStatus::Modified,
                        Some(&before_bytes),
                        Some(&after_bytes),
                        include_diff,
                    ));
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    fn blocking_staged_changes(
        &self,
        base: Option<gix::ObjectId>,
        include_diff: bool,
    ) -> VersioningResult<Vec<FileChange>> {
        let repo = self.open_or_init()?;
        let base_tree = match base {
            Some(base) => self.collect_commit_tree(&repo, base)?,
            None => BTreeMap::new(),
        };
        let staging = self.load_staging()?;

        let mut changes = Vec::new();
        for (path, entry) in &staging {
            let base_entry = base_tree.get(path);
            match entry {
                StagedEntry::Blob { oid, .. } => {
                    let staged_bytes = read_blob(&repo, parse_oid(oid)?)?;
                    match base_entry {
                        Some((base_oid, _)) => {
                            if base_oid.to_string() == *oid {
                                continue;
                            }
                            let base_bytes = read_blob(&repo, *base_oid)?;
                            changes.push(self.describe_change(
                                path,
                                FileChangeStatus::Modified,
                                Some(&base_bytes),
                                Some(&staged_bytes),
                                include_diff,
                            ));
                        }
                        None => {
                            changes.push(self.describe_change(
                                path,
                                FileChangeStatus::Added,
                                None,
                                Some(&staged_bytes),
                                include_diff,
                            ));
                        }
                    }
                }
                StagedEntry::Deleted => {
                    if let Some((base_oid, _)) = base_entry {
                        let base_bytes = read_blob(&repo, *base_oid)?;
                        changes.push(self.describe_change(
                            path,
                            FileChangeStatus::Deleted,
                            Some(&base_bytes),
                            None,
                            include_diff,
                        ));
                    }
                }
            }
        }
        Ok(changes)
    }

    fn describe_change(
        &self,
        path: &str,
        status: FileChangeStatus,
        before: Option<&[u8]>,
        after: Option<&[u8]>,
        include_diff: bool,
    ) -> FileChange {
        let binary = before.map(is_binary).unwrap_or(false)
            || after.map(is_binary).unwrap_or(false);
        if binary {
            return FileChange {
                path: path.to_string(),
                status,
                additions: 0,
                deletions: 0,
                diff: None,
            };
        }

        let before_text = before.map(|b| String::from_utf8_lossy(b).into_owned());
        let after_text = after.map(|b| String::from_utf8_lossy(b).into_owned());
        let (diff_text, stats) = unified_diff(
            before_text.as_deref().unwrap_or(""),
            after_text.as_deref().unwrap_or(""),
            path,
        );

        // Full diff bodies are only rendered for in-place modifications; for
        // added/deleted files the line counts carry the information.
        let diff = (include_diff && status == FileChangeStatus::Modified).then_some(diff_text);
        FileChange {
            path: path.to_string(),
            status,
            additions: stats.additions,
            deletions: stats.deletions,
            diff,
        }
    }

    /// Flatten a commit's tree into `path -> (blob oid, executable)`.
    fn collect_commit_tree(
        &self,
        repo: &gix::Repository,
        commit_id: gix::ObjectId,
    ) -> VersioningResult<BTreeMap<String, (gix::ObjectId, bool)>> {
        let commit = repo
            .find_commit(commit_id)
            .map_err(|e| VersioningError::NotFound(format!("commit {commit_id}: {e}")))?;
        let tree = commit
            .tree()
            .map_err(|e| VersioningError::Repository(format!("failed to get tree: {e}")))?;
        let mut out = BTreeMap::new();
        collect_tree_recursive(&tree, &PathBuf::new(), &mut out)?;
        Ok(out)
    }
}

/// Build a tree object from `(relative_path, blob_oid, executable)` entries,
/// recursing into subdirectories.
fn build_tree_from_entries(
    repo: &gix::Repository,
    entries: &[(String, gix::ObjectId, bool)],
) -> VersioningResult<gix::ObjectId> {
    let mut blobs: Vec<(String, gix::ObjectId, bool)> = Vec::new();
    let mut subdirs: BTreeMap<String, Vec<(String, gix::ObjectId, bool)>> = BTreeMap::new();

    for (path, oid, exec) in entries {
        if let Some(slash_pos) = path.find('/') {
            let dir_name = &path[..slash_pos];
            let rest = &path[slash_pos + 1..];
            subdirs
                .entry(dir_name.to_string())
                .or_default()
                .push((rest.to_string(), *oid, *exec));
        } else {
            blobs.push((path.clone(), *oid, *exec));
        }
    }

    let mut tree_entries: Vec<gix::objs::tree::Entry> = Vec::new();

    for (dir_name, sub_entries) in &subdirs {
        let sub_tree_id = build_tree_from_entries(repo, sub_entries)?;
        tree_entries.push(gix::objs::tree::Entry {
            mode: gix::objs::tree::EntryKind::Tree.into(),
            filename: dir_name.as_str().into(),
            oid: sub_tree_id,
        });
    }

    for (name, oid, exec) in &blobs {
        let mode = if *exec {
            gix::objs::tree::EntryKind::BlobExecutable.into()
        } else {
            gix::objs::tree::EntryKind::Blob.into()
        };
        tree_entries.push(gix::objs::tree::Entry {
            mode,
            filename: name.as_str().into(),
            oid: *oid,
        });
    }

    // Git requires a specific entry ordering inside trees.
    tree_entries.sort();

    let tree = gix::objs::Tree {
        entries: tree_entries,
    };
    let tree_id = repo
        .write_object(&tree)
        .map_err(|e| VersioningError::Repository(format!("failed to write tree: {e}")))?;
    Ok(tree_id.detach())
}

fn collect_tree_recursive(
    tree: &gix::Tree<'_>,
    prefix: &Path,
    out: &mut BTreeMap<String, (gix::ObjectId, bool)>,
) -> VersioningResult<()> {
    for entry_result in tree.iter() {
        let entry_ref = entry_result
            .map_err(|e| VersioningError::Repository(format!("failed to read tree entry: {e}")))?;
        let name = String::from_utf8_lossy(entry_ref.filename()).into_owned();
        let entry_path = prefix.join(&name);

        if entry_ref.mode().is_tree() {
            let sub_object = entry_ref.object().map_err(|e| {
                VersioningError::Repository(format!("failed to find subtree: {e}"))
            })?;
            let sub_tree = sub_object
                .try_into_tree()
                .map_err(|_| VersioningError::Repository("expected tree object".to_string()))?;
            collect_tree_recursive(&sub_tree, &entry_path, out)?;
        } else if entry_ref.mode().is_blob() {
            let object = entry_ref
                .object()
                .map_err(|e| VersioningError::Repository(format!("failed to find blob: {e}")))?;
            let executable = entry_ref.mode().is_executable();
            out.insert(
                entry_path.to_string_lossy().replace('\\', "/"),
                (object.id, executable),
            );
        }
    }
    Ok(())
}

fn read_blob(repo: &gix::Repository, oid: gix::ObjectId) -> VersioningResult<Vec<u8>> {
    let object = repo
        .find_object(oid)
        .map_err(|e| VersioningError::Repository(format!("failed to find blob {oid}: {e}")))?;
    Ok(object.data.clone())
}

fn parse_oid(hex: &str) -> VersioningResult<gix::ObjectId> {
    gix::ObjectId::from_hex(hex.as_bytes())
        .map_err(|_| VersioningError::InvalidCommitId(hex.to_string()))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        false
    }
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: &Path) -> VersioningResult<T> {
    match fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| VersioningError::Filesystem(format!("corrupt state file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(VersioningError::Filesystem(e.to_string())),
    }
}

fn save_json<T: serde::Serialize>(path: &Path, value: &T) -> VersioningResult<()> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| VersioningError::Filesystem(e.to_string()))?;
    fs::write(path, text).map_err(|e| VersioningError::Filesystem(e.to_string()))
}
