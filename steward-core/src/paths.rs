use std::path::{Component, Path, PathBuf};

pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum PathError {
    Traversal(PathBuf),
    OutsideRoot(PathBuf),
    NotFound(PathBuf),
    NotAFile(PathBuf),
    TooLarge(PathBuf, u64),
    Io(PathBuf, std::io::Error),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::Traversal(path) => {
                write!(f, "path `{}` contains a parent-directory segment", path.display())
            }
            PathError::OutsideRoot(path) => {
                write!(f, "path `{}` resolves outside the project root", path.display())
            }
            PathError::NotFound(path) => write!(f, "file `{}` does not exist", path.display()),
            PathError::NotAFile(path) => {
                write!(f, "path `{}` is not a regular file", path.display())
            }
            PathError::TooLarge(path, size) => write!(
                f,
                "file `{}` is {size} bytes; the limit is {MAX_FILE_BYTES}",
                path.display()
            ),
            PathError::Io(path, err) => {
                write!(f, "failed to inspect `{}`: {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Validate one candidate path against the project root. Returns the
/// canonical absolute path on success.
///
/// `..` segments are rejected before any resolution so a traversal attempt
/// fails even when the resolved target would land back inside the root.
pub fn validate(project_root: &Path, candidate: &Path) -> Result<PathBuf, PathError> {
    if candidate
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathError::Traversal(candidate.to_path_buf()));
    }

    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        project_root.join(candidate)
    };

    if !joined.exists() {
        return Err(PathError::NotFound(candidate.to_path_buf()));
    }

    let canonical_root = project_root
        .canonicalize()
        .map_err(|err| PathError::Io(project_root.to_path_buf(), err))?;
    let resolved = joined
        .canonicalize()
        .map_err(|err| PathError::Io(joined.clone(), err))?;

    if !resolved.starts_with(&canonical_root) {
        return Err(PathError::OutsideRoot(candidate.to_path_buf()));
    }

    let metadata =
        std::fs::metadata(&resolved).map_err(|err| PathError::Io(resolved.clone(), err))?;
    if !metadata.is_file() {
        return Err(PathError::NotAFile(resolved));
    }
    if metadata.len() > MAX_FILE_BYTES {
        return Err(PathError::TooLarge(resolved, metadata.len()));
    }

    Ok(resolved)
}

/// Batch form; short-circuits on the first failure.
pub fn validate_all(
    project_root: &Path,
    candidates: &[PathBuf],
) -> Result<Vec<PathBuf>, PathError> {
    let mut resolved = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        resolved.push(validate(project_root, candidate)?);
    }
    Ok(resolved)
}
