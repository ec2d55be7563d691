//! Local transport.
//!
//! Runs the reconciliation against the machine converge itself runs on:
//! commands go through `sh -c`, probes use the local filesystem. This is
//! the reference implementation of the transport seam; remote transports
//! implement the same traits elsewhere.

use anyhow::{Context, Result};
use reconcile::{CommandOutput, PathProbe, PathType, RemoteHost, RemoteSession};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

/// Executes everything on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl RemoteHost for LocalHost {
    fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(LocalSession))
    }
}

struct LocalSession;

fn shell(command: &str) -> Result<CommandOutput> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("failed to spawn `{command}`"))?;
    Ok(CommandOutput {
        return_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Streamed blake3 fingerprint of a local file.
fn fingerprint(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Owner and group names via stat; `None` when unavailable.
fn ownership(path: &str) -> (Option<String>, Option<String>) {
    let command = format!("stat -c '%U:%G' -- {}", reconcile::paths::quote(path));
    match shell(&command) {
        Ok(output) if output.success() => {
            let text = output.stdout_str();
            match text.trim().split_once(':') {
                Some((owner, group)) => (Some(owner.to_string()), Some(group.to_string())),
                None => (None, None),
            }
        }
        _ => (None, None),
    }
}

impl RemoteSession for LocalSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        shell(command)
    }

    fn probe(&mut self, path: &str) -> Result<PathProbe> {
        let Ok(metadata) = fs::symlink_metadata(path) else {
            return Ok(PathProbe::missing(path));
        };
        let file_type = metadata.file_type();
        let path_type = if file_type.is_symlink() {
            PathType::Symlink
        } else if file_type.is_dir() {
            PathType::Directory
        } else if file_type.is_file() {
            PathType::File
        } else {
            PathType::Other
        };
        let (owner, group) = ownership(path);
        let content_hash = if path_type == PathType::File {
            Some(fingerprint(Path::new(path))?)
        } else {
            None
        };
        let symlink_target = if path_type == PathType::Symlink {
            fs::read_link(path)
                .ok()
                .map(|target| target.to_string_lossy().to_string())
        } else {
            None
        };
        Ok(PathProbe {
            path: path.to_string(),
            exists: true,
            path_type: Some(path_type),
            mode: Some(format!("{:04o}", metadata.permissions().mode() & 0o7777)),
            owner,
            group,
            size: Some(metadata.len()),
            content_hash,
            symlink_target,
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
        fs::copy(local, remote)
            .with_context(|| format!("failed to copy {} to {remote}", local.display()))?;
        if let Some(mode) = mode {
            let bits = u32::from_str_radix(mode, 8)
                .with_context(|| format!("invalid mode '{mode}'"))?;
            fs::set_permissions(remote, fs::Permissions::from_mode(bits))
                .with_context(|| format!("failed to chmod {remote}"))?;
        }
        if owner.is_some() || group.is_some() {
            let spec = format!("{}:{}", owner.unwrap_or_default(), group.unwrap_or_default());
            let spec = spec.trim_end_matches(':').to_string();
            let command = format!("chown {spec} -- {}", reconcile::paths::quote(remote));
            let output = shell(&command)?;
            if !output.success() {
                anyhow::bail!(
                    "failed to chown {remote}: {}",
                    output.stderr_str().trim()
                );
            }
        }
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        fs::copy(remote, local)
            .with_context(|| format!("failed to copy {remote} to {}", local.display()))?;
        Ok(())
    }
}
