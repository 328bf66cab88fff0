//! Server status document.
//!
//! `status.json` tells IDE-side tooling whether a server owns this project,
//! on which port, and whether the previous instance died cleanly. Updates go
//! through a process-local mutex and an atomic temp-file rename.

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopped,
    Crashed,
    Error,
}

/// The persisted `status.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDocument {
    pub server_status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_progress: Option<f32>,
    pub updated_at: i64,
}

impl Default for StatusDocument {
    fn default() -> Self {
        Self {
            server_status: ServerStatus::Stopped,
            server_pid: None,
            port: None,
            server_error: None,
            scan_status: None,
            scan_progress: None,
            updated_at: 0,
        }
    }
}

/// Guarded accessor for the status document.
pub struct StatusManager {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatusManager {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> StatusDocument {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => StatusDocument::default(),
        }
    }

    fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut StatusDocument),
    {
        let _guard = self.lock.lock();
        let mut doc = self.load();
        mutate(&mut doc);
        doc.updated_at = OffsetDateTime::now_utc().unix_timestamp();

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = self.path.with_extension("json.tmp");
            fs::write(&tmp, serde_json::to_string_pretty(&doc).unwrap_or_default())?;
            fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            warn!("failed to write status file: {}", e);
        }
    }

    /// Inspect the previous run's record before claiming the project: a
    /// document still marked running for a process that no longer exists
    /// means the last server crashed.
    pub fn detect_crash(&self) -> Option<StatusDocument> {
        let doc = self.load();
        if doc.server_status != ServerStatus::Running {
            return None;
        }
        let stale = match doc.server_pid {
            Some(pid) if pid != std::process::id() => !process_alive(pid),
            _ => false,
        };
        if stale {
            warn!(
                "previous server (pid {:?}) left a running status behind; marking crashed",
                doc.server_pid
            );
            self.update(|d| {
                d.server_status = ServerStatus::Crashed;
                d.server_error = Some("previous server exited without cleanup".to_string());
            });
            return Some(self.load());
        }
        None
    }

    pub fn set_starting(&self) {
        self.update(|d| {
            d.server_status = ServerStatus::Starting;
            d.server_pid = Some(std::process::id());
            d.server_error = None;
        });
    }

    pub fn set_running(&self, port: u16) {
        self.update(|d| {
            d.server_status = ServerStatus::Running;
            d.server_pid = Some(std::process::id());
            d.port = Some(port);
            d.server_error = None;
        });
    }

    pub fn set_stopped(&self) {
        self.update(|d| {
            d.server_status = ServerStatus::Stopped;
            d.server_pid = None;
            d.port = None;
        });
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.update(|d| {
            d.server_status = ServerStatus::Error;
            d.server_error = Some(message.into());
        });
    }

    pub fn set_scan(&self, status: impl Into<String>, progress: Option<f32>) {
        self.update(|d| {
            d.scan_status = Some(status.into());
            d.scan_progress = progress;
        });
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, assume the recorded owner is gone.
    false
}
