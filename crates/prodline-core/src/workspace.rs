//! Where variants land on disk.
//!
//! A project is a directory; its sibling directories are other projects.
//! Variants are written either into the project's shared `products/` folder
//! or as sibling projects of their own. The [`Workspace`] trait is the seam
//! for hosts that manage projects differently; [`FsWorkspace`] is the plain
//! file system version.

use crate::error::{ProdlineError, Result};
use crate::{io, paths};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

pub trait Workspace: Send + Sync {
    fn project_name(&self) -> &str;

    fn project_dir(&self) -> &Path;

    /// Delete and recreate `name` inside the project. Returns its path.
    fn create_or_clear_folder(&self, name: &str) -> Result<PathBuf>;

    fn create_folder(&self, path: &Path) -> Result<()>;

    /// Names of projects starting with `prefix`, sorted.
    fn list_projects(&self, prefix: &str) -> Result<Vec<String>>;

    fn delete_project(&self, name: &str) -> Result<()>;

    /// Location of a (possibly not yet existing) sibling project.
    fn project_path(&self, name: &str) -> PathBuf;

    /// One entry per configured classpath element; unresolvable ones are
    /// errors the caller reports and skips.
    fn resolve_classpath(&self) -> Vec<Result<PathBuf>>;

    /// Record a problem with one variant where the user will see it.
    fn raise_marker(&self, index: usize, message: &str);

    fn clear_markers(&self);

    /// Tell the host that `path` changed on disk.
    fn refresh(&self, path: &Path);
}

// ---------------------------------------------------------------------------
// FsWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FsWorkspace {
    dir: PathBuf,
    name: String,
    classpath: Vec<PathBuf>,
    markers: Mutex<()>,
}

impl FsWorkspace {
    /// The project name is the last component of `project_dir`.
    pub fn new(project_dir: &Path, classpath: Vec<PathBuf>) -> Result<Self> {
        let dir = std::path::absolute(project_dir)?;
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProdlineError::Workspace(format!("{} has no project name", dir.display()))
            })?
            .to_string();
        if dir.parent().is_none() {
            return Err(ProdlineError::Workspace(format!(
                "{} has no parent folder for sibling projects",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            name,
            classpath,
            markers: Mutex::new(()),
        })
    }

    fn workspace_root(&self) -> &Path {
        self.dir.parent().unwrap_or(&self.dir)
    }
}

impl Workspace for FsWorkspace {
    fn project_name(&self) -> &str {
        &self.name
    }

    fn project_dir(&self) -> &Path {
        &self.dir
    }

    fn create_or_clear_folder(&self, name: &str) -> Result<PathBuf> {
        paths::validate_name(name)?;
        let path = self.dir.join(name);
        io::recreate_dir(&path)?;
        Ok(path)
    }

    fn create_folder(&self, path: &Path) -> Result<()> {
        io::ensure_dir(path)
    }

    fn list_projects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.workspace_root())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) && name != self.name {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete_project(&self, name: &str) -> Result<()> {
        paths::validate_name(name)?;
        if name == self.name {
            return Err(ProdlineError::Workspace(
                "refusing to delete the current project".to_string(),
            ));
        }
        let path = self.project_path(name);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
            debug!(project = name, "deleted project");
        }
        Ok(())
    }

    fn project_path(&self, name: &str) -> PathBuf {
        self.workspace_root().join(name)
    }

    fn resolve_classpath(&self) -> Vec<Result<PathBuf>> {
        self.classpath
            .iter()
            .map(|entry| {
                let path = if entry.is_absolute() {
                    entry.clone()
                } else {
                    self.dir.join(entry)
                };
                if path.exists() {
                    Ok(path)
                } else {
                    Err(ProdlineError::Workspace(format!(
                        "classpath entry {} does not exist",
                        path.display()
                    )))
                }
            })
            .collect()
    }

    fn raise_marker(&self, index: usize, message: &str) {
        let _guard = self.markers.lock().unwrap_or_else(|e| e.into_inner());
        let line = format!(
            "{} variant {}: {}\n",
            Utc::now().to_rfc3339(),
            paths::variant_name(index),
            message.lines().next().unwrap_or_default()
        );
        if let Err(e) = io::append_text(&paths::markers_path(&self.dir), &line) {
            warn!(error = %e, "cannot write marker");
        }
    }

    fn clear_markers(&self) {
        let path = paths::markers_path(&self.dir);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "cannot clear markers");
            }
        }
    }

    fn refresh(&self, path: &Path) {
        let entries = std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0);
        debug!(path = %path.display(), entries, "output refreshed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
