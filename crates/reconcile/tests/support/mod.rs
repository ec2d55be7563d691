//! In-memory mock host for integration tests.
//!
//! Interprets the engine's command vocabulary (rm/mkdir/chmod/chown/ln,
//! systemctl, dpkg/apt-get) against a fake filesystem so that fixes really
//! converge and re-runs observe their effects.

#![allow(dead_code)]

use anyhow::Result;
use reconcile::render::hash_bytes;
use reconcile::{CommandOutput, PathProbe, PathType, RemoteHost, RemoteSession};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: PathType,
    pub mode: String,
    pub owner: String,
    pub group: String,
    pub content: Option<Vec<u8>>,
    pub target: Option<String>,
}

impl Entry {
    pub fn dir() -> Self {
        Self {
            kind: PathType::Directory,
            mode: "0755".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            content: None,
            target: None,
        }
    }

    pub fn file(content: &[u8]) -> Self {
        Self {
            kind: PathType::File,
            mode: "0644".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            content: Some(content.to_vec()),
            target: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    pub entries: BTreeMap<String, Entry>,
    pub services: BTreeMap<String, bool>,
    pub pkgs: BTreeMap<String, bool>,
    pub commands: Vec<String>,
    /// Substrings that make a command fail with exit code 1.
    pub fail_commands: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn entry(&self, path: &str) -> Option<Entry> {
        self.state().entries.get(path).cloned()
    }
}

impl RemoteHost for MockHost {
    fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

fn ok() -> CommandOutput {
    CommandOutput {
        return_code: 0,
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

fn fail(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        return_code: code,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Split a command line on whitespace, honoring single quotes.
fn tokenize(command: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in command.chars() {
        match c {
            '\'' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

impl MockSession {
    fn interpret(&self, command: &str, state: &mut MockState) -> CommandOutput {
        let tokens = tokenize(command);
        let args: Vec<&str> = tokens
            .iter()
            .map(String::as_str)
            .filter(|t| *t != "--")
            .collect();
        match args.as_slice() {
            ["rm", "-rf", path] => {
                let prefix = format!("{path}/");
                state
                    .entries
                    .retain(|entry, _| entry.as_str() != *path && !entry.starts_with(&prefix));
                ok()
            }
            ["mkdir", "-p", path] => {
                let mut partial = String::new();
                for segment in path.split('/').filter(|s| !s.is_empty()) {
                    partial.push('/');
                    partial.push_str(segment);
                    state.entries.entry(partial.clone()).or_insert_with(Entry::dir);
                }
                ok()
            }
            ["chmod", mode, path] => match state.entries.get_mut(*path) {
                Some(entry) => {
                    entry.mode = format!("{mode:0>4}");
                    ok()
                }
                None => fail(1, "no such file or directory"),
            },
            ["chown", rest @ ..] => {
                let spec: Vec<&str> = rest.iter().filter(|t| **t != "-h").copied().collect();
                let [ownership, path] = spec.as_slice() else {
                    return fail(2, "bad chown invocation");
                };
                let (owner, group) = match ownership.split_once(':') {
                    Some((owner, group)) => (owner, Some(group)),
                    None => (*ownership, None),
                };
                match state.entries.get_mut(*path) {
                    Some(entry) => {
                        if !owner.is_empty() {
                            entry.owner = owner.to_string();
                        }
                        if let Some(group) = group
                            && !group.is_empty()
                        {
                            entry.group = group.to_string();
                        }
                        ok()
                    }
                    None => fail(1, "no such file or directory"),
                }
            }
            ["ln", "-s", target, path] => {
                state.entries.insert(
                    (*path).to_string(),
                    Entry {
                        kind: PathType::Symlink,
                        mode: "0777".to_string(),
                        owner: "root".to_string(),
                        group: "root".to_string(),
                        content: None,
                        target: Some((*target).to_string()),
                    },
                );
                ok()
            }
            ["systemctl", "status", unit] => {
                if state.services.get(*unit).copied().unwrap_or(false) {
                    ok()
                } else {
                    fail(3, "inactive")
                }
            }
            ["systemctl", verb @ ("start" | "restart" | "stop"), unit] => {
                state.services.insert((*unit).to_string(), *verb != "stop");
                ok()
            }
            ["systemctl", "reload", _unit] => ok(),
            ["dpkg", "-s", pkg] => {
                if state.pkgs.get(*pkg).copied().unwrap_or(false) {
                    ok()
                } else {
                    fail(1, "not installed")
                }
            }
            [env, "apt-get", "-qy", verb @ ("install" | "remove"), pkg]
                if env.starts_with("DEBIAN_FRONTEND=") =>
            {
                state.pkgs.insert((*pkg).to_string(), *verb == "install");
                ok()
            }
            ["true"] => ok(),
            ["false"] => fail(1, ""),
            _ => ok(),
        }
    }
}

impl RemoteSession for MockSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if state
            .fail_commands
            .iter()
            .any(|needle| command.contains(needle.as_str()))
        {
            return Ok(fail(1, "mock failure"));
        }
        Ok(self.interpret(command, &mut state))
    }

    fn probe(&mut self, path: &str) -> Result<PathProbe> {
        let state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get(path) else {
            return Ok(PathProbe::missing(path));
        };
        Ok(PathProbe {
            path: path.to_string(),
            exists: true,
            path_type: Some(entry.kind),
            mode: Some(entry.mode.clone()),
            owner: Some(entry.owner.clone()),
            group: Some(entry.group.clone()),
            size: entry.content.as_ref().map(|c| c.len() as u64),
            content_hash: entry.content.as_ref().map(|c| hash_bytes(c)),
            symlink_target: entry.target.clone(),
        })
    }

    fn upload(
        &mut self,
        local: &Path,
        remote: &str,
        mode: Option<&str>,
        owner: Option<&str>,
        group: Option<&str>,
    ) -> Result<()> {
        let content = std::fs::read(local)?;
        let mut state = self.state.lock().unwrap();
        state.commands.push(format!("<upload {remote}>"));
        let mut entry = Entry::file(&content);
        if let Some(mode) = mode {
            entry.mode = format!("{mode:0>4}");
        }
        if let Some(owner) = owner {
            entry.owner = owner.to_string();
        }
        if let Some(group) = group {
            entry.group = group.to_string();
        }
        state.entries.insert(remote.to_string(), entry);
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let state = self.state.lock().unwrap();
        let content = state
            .entries
            .get(remote)
            .and_then(|entry| entry.content.clone())
            .unwrap_or_default();
        std::fs::write(local, content)?;
        Ok(())
    }
}
