//! Data root ownership: path resolution, recursive listing and rename.
//!
//! Every user supplied path goes through [`Storage::resolve`] before it
//! touches the filesystem. Resolution joins the input onto the data root and
//! collapses `.`/`..` segments lexically. Under [`PathPolicy::Lenient`] the
//! result may leave the data root, exactly like a plain join-then-normalize;
//! that mode exists for compatibility and is a known traversal hole.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::ErrorKind;
use tracing::warn;
use walkdir::WalkDir;

/// How strictly user paths are held to the data root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathPolicy {
    /// Reject anything that normalizes outside the data root or crosses a symlink.
    Confined,
    /// Join and normalize only. `..` may climb above the data root.
    Lenient,
}

/// The data root every request is resolved against. Immutable once opened.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    policy: PathPolicy,
}

/// Base names of a completed rename.
#[derive(Debug, PartialEq, Eq)]
pub struct Renamed {
    pub from: String,
    pub to: String,
}

impl Storage {
    /// `root` must already be absolute; see [`Storage::open`].
    pub fn new(root: PathBuf, policy: PathPolicy) -> Self {
        Self { root, policy }
    }

    /// Creates the data root if needed and pins it to its canonical form.
    pub async fn open(root: PathBuf, policy: PathPolicy) -> io::Result<Self> {
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self::new(root, policy))
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> PathPolicy {
        self.policy
    }

    /// Lexical resolution of `relative` against the data root.
    ///
    /// Both `/` and `\` separate segments and leading separators are
    /// ignored, so `"/etc/passwd"` still lands under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let mut resolved = self.root.clone();
        for segment in relative.split(['/', '\\']) {
            match segment {
                "" | "." => continue,
                ".." => {
                    resolved.pop();
                }
                name => {
                    // Drive prefixes and the like would replace the whole path on push.
                    if !matches!(
                        Path::new(name).components().next(),
                        Some(Component::Normal(_))
                    ) {
                        return Err(StorageError::PathEscape);
                    }
                    resolved.push(name);
                }
            }
        }

        if !resolved.starts_with(&self.root) {
            match self.policy {
                PathPolicy::Confined => return Err(StorageError::PathEscape),
                PathPolicy::Lenient => warn!(
                    relative,
                    resolved = %resolved.display(),
                    "path resolved outside data root"
                ),
            }
        }

        Ok(resolved)
    }

    /// [`Storage::resolve`] plus, when confined, a walk over the existing
    /// components that refuses symlinks.
    pub async fn resolve_checked(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(relative)?;
        self.check_resolved(&target).await?;
        Ok(target)
    }

    /// Re-runs the confined symlink walk on a path already built from a
    /// resolved one, e.g. a directory joined with a file name.
    pub async fn check_resolved(&self, target: &Path) -> Result<(), StorageError> {
        if self.policy == PathPolicy::Confined {
            self.ensure_no_symlink_components(target).await?;
        }
        Ok(())
    }

    async fn ensure_no_symlink_components(&self, target: &Path) -> Result<(), StorageError> {
        let relative = target
            .strip_prefix(&self.root)
            .map_err(|_| StorageError::PathEscape)?;
        let mut current = PathBuf::from(&self.root);
        let mut components = relative.components().peekable();

        while let Some(component) = components.next() {
            current.push(component.as_os_str());
            match fs::symlink_metadata(&current).await {
                Ok(metadata) => {
                    if metadata.file_type().is_symlink() {
                        return Err(StorageError::PathEscape);
                    }
                    // Anything below a regular file cannot exist; let the caller's I/O fail.
                    if components.peek().is_some() && !metadata.is_dir() {
                        return Ok(());
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(StorageError::Io(err)),
            }
        }

        Ok(())
    }

    /// Every regular file under the data root, relative and `/`-separated,
    /// in lexicographic order.
    pub async fn list_files(&self) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let mut files = tokio::task::spawn_blocking(move || {
            walk_files(&root)
                .iter()
                .filter_map(|path| relative_slash_path(&root, path))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| StorageError::Io(io::Error::other(err.to_string())))?;
        files.sort();
        Ok(files)
    }

    /// Moves `source` to `destination` with a single rename, creating the
    /// destination's parent directories. Never overwrites a file.
    pub async fn rename_file(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Renamed, StorageError> {
        let source_path = self.resolve_checked(source).await?;
        if !is_regular_file(&source_path).await {
            return Err(StorageError::NotFound);
        }

        let destination_path = self.resolve_checked(destination).await?;
        if is_regular_file(&destination_path).await {
            return Err(StorageError::AlreadyExists);
        }

        if let Some(parent) = destination_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&source_path, &destination_path).await?;

        Ok(Renamed {
            from: base_name(&source_path),
            to: base_name(&destination_path),
        })
    }
}

/// Regular files below `root`, symlinks not followed, in walk order.
/// Unreadable or vanished entries are skipped.
pub(crate) fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files
}

/// `path` relative to `root`, joined with `/` whatever the platform separator.
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>();
    Some(segments.join("/"))
}

pub(crate) async fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Expected outcomes are variants of their own; only `Io` is a real failure.
#[derive(Debug)]
pub enum StorageError {
    PathEscape,
    AlreadyExists,
    NotFound,
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::PathEscape => f.write_str("path escapes data root"),
            StorageError::AlreadyExists => f.write_str("already exists"),
            StorageError::NotFound => f.write_str("not found"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
