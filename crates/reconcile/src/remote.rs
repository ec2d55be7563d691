//! Remote access interface.
//!
//! The core never decides how commands reach a managed host. A
//! [`RemoteHost`] opens sessions; a [`RemoteSession`] executes shell
//! commands, probes path metadata, and transfers files. Implementations may
//! be SSH, local exec, or an in-memory mock.
//!
//! Sessions are a limited resource: one per worker slot, not one per item.
//! [`SessionPool`] hands a leased session to a worker for all of one item's
//! remote calls and takes it back afterwards.

use crate::error::ItemError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// What kind of filesystem object a probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    File,
    Directory,
    Symlink,
    Other,
}

impl PathType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }
}

/// Metadata for one remote path, gathered in a single probe.
#[derive(Debug, Clone, Serialize)]
pub struct PathProbe {
    pub path: String,
    pub exists: bool,
    pub path_type: Option<PathType>,
    /// Four-digit octal permission string, e.g. `"0644"`.
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub size: Option<u64>,
    /// Content fingerprint for regular files.
    pub content_hash: Option<String>,
    pub symlink_target: Option<String>,
}

impl PathProbe {
    /// A probe result for a path that does not exist.
    pub fn missing(path: &str) -> Self {
        Self {
            path: path.to_string(),
            exists: false,
            path_type: None,
            mode: None,
            owner: None,
            group: None,
            size: None,
            content_hash: None,
            symlink_target: None,
        }
    }
}

/// Captured output of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub return_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// One open session on a managed host.
///
/// `exec` is the transport-level primitive; callers should go through
/// [`RemoteSession::run`] to get `may_fail` semantics.
pub trait RemoteSession: Send {
    /// Execute a shell command, returning its output regardless of exit code.
    /// Errors are transport failures only.
    fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Query metadata for a path in one round trip.
    fn probe(&mut self, path: &str) -> Result<PathProbe>;

    /// Upload a local file, applying mode and ownership in the same transfer.
    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        mode: Option<&str>,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<()>;

    /// Download a remote file to a local path.
    fn download(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Run a command on behalf of `item`.
    ///
    /// With `may_fail` false, a non-zero exit code becomes a fatal
    /// [`ItemError::RemoteExecution`] for that item. With `may_fail` true
    /// the caller inspects the return code itself (status probes).
    fn run(&mut self, item: &str, command: &str, may_fail: bool) -> Result<CommandOutput> {
        log::debug!("{item}: running `{command}`");
        let output = self.exec(command)?;
        if !may_fail && !output.success() {
            return Err(ItemError::RemoteExecution {
                item: item.to_string(),
                command: command.to_string(),
                code: output.return_code,
                stderr: output.stderr_str().trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }
}

/// Opens sessions to one managed host.
pub trait RemoteHost: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// Bounded reuse of sessions across workers.
///
/// Sessions are opened lazily, so a run that needs fewer sessions than
/// workers never pays for the difference.
pub struct SessionPool<'a> {
    host: &'a dyn RemoteHost,
    idle: Mutex<Vec<Box<dyn RemoteSession>>>,
}

impl<'a> SessionPool<'a> {
    pub fn new(host: &'a dyn RemoteHost) -> Self {
        Self {
            host,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Lease a session; it returns to the pool when the lease drops.
    pub fn lease(&self) -> Result<SessionLease<'_, 'a>> {
        let existing = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let session = match existing {
            Some(session) => session,
            None => self.host.connect().context("failed to open remote session")?,
        };
        Ok(SessionLease {
            pool: self,
            session: Some(session),
        })
    }
}

/// A session checked out of a [`SessionPool`].
pub struct SessionLease<'p, 'a> {
    pool: &'p SessionPool<'a>,
    session: Option<Box<dyn RemoteSession>>,
}

impl SessionLease<'_, '_> {
    pub fn get(&mut self) -> &mut dyn RemoteSession {
        self.session
            .as_mut()
            .expect("session present until drop")
            .as_mut()
    }
}

impl Drop for SessionLease<'_, '_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(session);
        }
    }
}
