//! Download query parsing and resolution to zero, one or many files.

use globset::{GlobBuilder, GlobMatcher};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::storage::{Storage, StorageError, is_regular_file, relative_slash_path, walk_files};

pub const WILDCARD: char = '*';

/// A download request: one exact path, or a pattern over the whole tree.
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadQuery {
    Exact(String),
    Glob(String),
}

impl DownloadQuery {
    /// Any query containing `*` is a glob; everything else names one path.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(WILDCARD) {
            DownloadQuery::Glob(raw.to_string())
        } else {
            DownloadQuery::Exact(raw.to_string())
        }
    }
}

/// Files a [`DownloadQuery`] resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum Matches {
    None,
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl Matches {
    fn from_paths(mut paths: Vec<PathBuf>) -> Self {
        match paths.len() {
            0 => Matches::None,
            1 => Matches::One(paths.remove(0)),
            _ => Matches::Many(paths),
        }
    }
}

/// Resolves a query to the regular files it names.
///
/// Globs are matched against every file below the data root at any depth
/// and come back sorted by relative path. A glob that matches nothing is
/// reported as [`Matches::None`] without a second exact lookup.
pub async fn find_matches(storage: &Storage, query: &DownloadQuery) -> Result<Matches, StorageError> {
    match query {
        DownloadQuery::Exact(path) => {
            let target = storage.resolve_checked(path).await?;
            if is_regular_file(&target).await {
                Ok(Matches::One(target))
            } else {
                Ok(Matches::None)
            }
        }
        DownloadQuery::Glob(pattern) => {
            let matcher = match build_matcher(pattern) {
                Ok(matcher) => matcher,
                Err(err) => {
                    warn!(pattern, error = %err, "invalid glob pattern");
                    return Ok(Matches::None);
                }
            };
            let root = storage.root_path().to_path_buf();
            let paths = tokio::task::spawn_blocking(move || glob_files(&root, &matcher))
                .await
                .map_err(|err| StorageError::Io(io::Error::other(err.to_string())))?;
            debug!(pattern, count = paths.len(), "glob matched");
            Ok(Matches::from_paths(paths))
        }
    }
}

/// `pattern` may match at any depth, like a recursive glob; `*` stays within
/// one path segment.
fn build_matcher(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    let pattern = pattern.replace('\\', "/");
    let pattern = pattern.trim_start_matches('/');
    let glob = GlobBuilder::new(&format!("**/{pattern}"))
        .literal_separator(true)
        .build()?;
    Ok(glob.compile_matcher())
}

fn glob_files(root: &Path, matcher: &GlobMatcher) -> Vec<PathBuf> {
    let mut matched = walk_files(root)
        .into_iter()
        .filter_map(|path| {
            let relative = relative_slash_path(root, &path)?;
            matcher.is_match(&relative).then_some((relative, path))
        })
        .collect::<Vec<_>>();
    matched.sort_by(|a, b| a.0.cmp(&b.0));
    matched.into_iter().map(|(_, path)| path).collect()
}
