//! File persistence
//!
//! Commits a rendered file set under the target root, or formats it as a
//! preview. Post-write actions (service symlinks, reload commands) run only
//! after every file is in place.

use crate::NetconfError;
use crate::config::rooted;
use crate::network::render::{PostAction, RenderOutput};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Mode for every generated file
pub const FILE_MODE: u32 = 0o644;

/// SELinux relabel helper, relative to the root
const RESTORECON: &str = "/usr/sbin/restorecon";

/// Preview text: `### Write <path>` then the literal content, per file
pub fn format_preview(files: &BTreeMap<PathBuf, String>) -> String {
    let mut preview = String::new();
    for (path, content) in files {
        if content.is_empty() {
            continue;
        }
        preview.push_str(&format!("### Write {}\n{}", path.display(), content));
    }
    preview
}

/// What happened to each file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub written: Vec<PathBuf>,
    /// Files left alone because their filesystem is read-only
    pub skipped: Vec<PathBuf>,
}

/// Writes rendered output under a root
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
    run_commands: bool,
}

impl FilePersistence {
    /// Persistence under `root`; commands only run against the live root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let run_commands = root == Path::new("/");
        Self { root, run_commands }
    }

    /// Write every file in path order, then run post-write actions
    pub async fn persist(&self, output: &RenderOutput) -> Result<PersistReport, NetconfError> {
        self.persist_with(output, async |path: &Path, content: &str| {
            write_with_mode(path, content).await
        })
        .await
    }

    async fn persist_with<W>(
        &self,
        output: &RenderOutput,
        write: W,
    ) -> Result<PersistReport, NetconfError>
    where
        W: AsyncFn(&Path, &str) -> std::io::Result<()>,
    {
        let mut report = PersistReport::default();
        let relabel = self.run_commands && rooted(&self.root, RESTORECON).exists();

        for (path, content) in &output.files {
            if content.is_empty() {
                continue;
            }
            if self.write_file(path, content, &write).await? {
                if relabel {
                    let target = rooted(&self.root, path).to_string_lossy().into_owned();
                    self.run(&[RESTORECON, target.as_str()]).await;
                }
                report.written.push(path.clone());
            } else {
                report.skipped.push(path.clone());
            }
        }

        for action in &output.actions {
            self.apply(action).await;
        }

        info!(
            "Wrote {} files ({} skipped)",
            report.written.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Returns false when the file was skipped
    async fn write_file<W>(
        &self,
        path: &Path,
        content: &str,
        write: &W,
    ) -> Result<bool, NetconfError>
    where
        W: AsyncFn(&Path, &str) -> std::io::Result<()>,
    {
        let target = rooted(&self.root, path);
        debug!("Writing {}", target.display());

        if let Some(parent) = target.parent() {
            match fs::create_dir_all(parent).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::ReadOnlyFilesystem => {
                    warn!("{} is on a read-only filesystem, skipping", path.display());
                    return Ok(false);
                }
                Err(e) => return Err(NetconfError::persist(path, e)),
            }
        }

        match write(&target, content).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::ReadOnlyFilesystem => {
                warn!("{} is on a read-only filesystem, skipping", path.display());
                Ok(false)
            }
            Err(e) if is_symlink(&target).await => {
                warn!(
                    "{} is a broken symlink ({}), replacing it",
                    path.display(),
                    e
                );
                fs::remove_file(&target)
                    .await
                    .map_err(|e| NetconfError::persist(path, e))?;
                write(&target, content)
                    .await
                    .map_err(|e| NetconfError::persist(path, e))?;
                Ok(true)
            }
            Err(e) => Err(NetconfError::persist(path, e)),
        }
    }

    async fn apply(&self, action: &PostAction) {
        match action {
            PostAction::Symlink { link, target } => {
                let link_path = rooted(&self.root, link);
                if fs::symlink_metadata(&link_path).await.is_ok() {
                    debug!("{} already exists", link.display());
                    return;
                }
                debug!("Linking {} -> {}", link.display(), target.display());
                if let Err(e) = fs::symlink(target, &link_path).await {
                    warn!("Failed to link {}: {}", link.display(), e);
                }
            }
            PostAction::Command(args) => {
                if !self.run_commands {
                    debug!("Not running {:?} outside the live root", args);
                    return;
                }
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run(&args).await;
            }
        }
    }

    /// Run a best-effort command; failures are logged
    async fn run(&self, args: &[&str]) {
        let Some((program, rest)) = args.split_first() else {
            return;
        };
        debug!("Running: {}", args.join(" "));

        match tokio::process::Command::new(program).args(rest).output().await {
            Ok(o) if o.status.success() => {}
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                warn!("{} failed: {}", args.join(" "), stderr.trim());
            }
            Err(e) => warn!("{} not available: {}", program, e),
        }
    }
}

async fn write_with_mode(path: &Path, content: &str) -> std::io::Result<()> {
    fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(FILE_MODE)).await?;
    }

    Ok(())
}

async fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .is_ok_and(|m| m.file_type().is_symlink())
}
