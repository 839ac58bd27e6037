use std::path::Path;

use git2::{DiffFormat, DiffOptions, Repository, Sort, StatusOptions};

#[derive(Debug)]
pub enum VcsError {
    Git(git2::Error),
    NoRepository(std::path::PathBuf),
    UnknownRef(String),
}

impl std::fmt::Display for VcsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VcsError::Git(err) => write!(f, "git error: {}", err.message()),
            VcsError::NoRepository(path) => {
                write!(f, "no git repository at {}", path.display())
            }
            VcsError::UnknownRef(reference) => {
                write!(f, "unknown git reference `{reference}`")
            }
        }
    }
}

impl std::error::Error for VcsError {}

impl From<git2::Error> for VcsError {
    fn from(value: git2::Error) -> Self {
        VcsError::Git(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: String,
    pub summary: String,
    pub author: String,
    pub time_secs: i64,
}

#[derive(Clone, Debug, Default)]
pub struct RepoInfo {
    pub branch: String,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub recent_commits: Vec<CommitInfo>,
}

pub struct GitReader {
    repo: Repository,
}

impl GitReader {
    pub fn open(project_root: &Path) -> Result<Self, VcsError> {
        let repo = Repository::discover(project_root)
            .map_err(|_| VcsError::NoRepository(project_root.to_path_buf()))?;
        Ok(Self { repo })
    }

    pub fn current_branch(&self) -> Result<String, VcsError> {
        let head = self.repo.head()?;
        Ok(head
            .shorthand()
            .map(str::to_string)
            .unwrap_or_else(|| "(detached)".to_string()))
    }

    /// Paths staged in the index, relative to the repo root.
    pub fn staged_files(&self) -> Result<Vec<String>, VcsError> {
        let mut options = StatusOptions::new();
        options.include_untracked(false);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| {
                entry.status().intersects(
                    git2::Status::INDEX_NEW
                        | git2::Status::INDEX_MODIFIED
                        | git2::Status::INDEX_DELETED
                        | git2::Status::INDEX_RENAMED
                        | git2::Status::INDEX_TYPECHANGE,
                )
            })
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    /// Worktree modifications not yet staged.
    pub fn modified_files(&self) -> Result<Vec<String>, VcsError> {
        let mut options = StatusOptions::new();
        options.include_untracked(true);
        let statuses = self.repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| {
                entry.status().intersects(
                    git2::Status::WT_NEW
                        | git2::Status::WT_MODIFIED
                        | git2::Status::WT_DELETED
                        | git2::Status::WT_RENAMED
                        | git2::Status::WT_TYPECHANGE,
                )
            })
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    pub fn recent_commits(&self, count: usize) -> Result<Vec<CommitInfo>, VcsError> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TIME)?;

        let mut commits = Vec::with_capacity(count);
        for oid in walk.take(count) {
            let commit = self.repo.find_commit(oid?)?;
            commits.push(CommitInfo {
                id: commit.id().to_string(),
                summary: commit.summary().unwrap_or("").to_string(),
                author: commit.author().name().unwrap_or("").to_string(),
                time_secs: commit.time().seconds(),
            });
        }
        Ok(commits)
    }

    /// Metadata plus unified diff for a commit reference (default HEAD).
    pub fn commit_details(&self, reference: &str) -> Result<(CommitInfo, String), VcsError> {
        let object = self
            .repo
            .revparse_single(reference)
            .map_err(|_| VcsError::UnknownRef(reference.to_string()))?;
        let commit = object
            .peel_to_commit()
            .map_err(|_| VcsError::UnknownRef(reference.to_string()))?;

        let info = CommitInfo {
            id: commit.id().to_string(),
            summary: commit.summary().unwrap_or("").to_string(),
            author: commit.author().name().unwrap_or("").to_string(),
            time_secs: commit.time().seconds(),
        };

        let tree = commit.tree()?;
        let parent_tree = commit.parent(0).ok().map(|parent| parent.tree()).transpose()?;
        let diff = self.repo.diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&tree),
            Some(&mut DiffOptions::new()),
        )?;

        Ok((info, render_diff(&diff)?))
    }

    /// Unified diff of the index against HEAD; empty string when nothing
    /// is staged.
    pub fn staged_diff(&self) -> Result<String, VcsError> {
        let head_tree = match self.repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            // Unborn branch: everything staged diffs against nothing.
            Err(_) => None,
        };
        let diff = self.repo.diff_tree_to_index(
            head_tree.as_ref(),
            None,
            Some(&mut DiffOptions::new()),
        )?;
        render_diff(&diff)
    }

    pub fn info(&self, commit_count: usize) -> Result<RepoInfo, VcsError> {
        Ok(RepoInfo {
            branch: self.current_branch()?,
            staged: self.staged_files()?,
            modified: self.modified_files()?,
            recent_commits: self.recent_commits(commit_count)?,
        })
    }
}

fn render_diff(diff: &git2::Diff<'_>) -> Result<String, VcsError> {
    let mut out = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        let prefix = match line.origin() {
            '+' | '-' | ' ' => Some(line.origin()),
            _ => None,
        };
        if let Some(prefix) = prefix {
            out.push(prefix);
        }
        out.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::path::PathBuf;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();

        std::fs::write(tmp.path().join("main.rs"), "fn main() {}\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.rs")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])
            .unwrap();

        let path = tmp.path().to_path_buf();
        (tmp, path)
    }

    #[test]
    fn reads_branch_and_history() {
        let (_tmp, root) = fixture();
        let reader = GitReader::open(&root).unwrap();

        let branch = reader.current_branch().unwrap();
        assert!(branch == "main" || branch == "master", "branch={branch}");

        let commits = reader.recent_commits(5).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].summary, "initial commit");
    }

    #[test]
    fn staged_diff_reflects_the_index() {
        let (_tmp, root) = fixture();
        let reader = GitReader::open(&root).unwrap();
        assert_eq!(reader.staged_diff().unwrap(), "");

        std::fs::write(root.join("main.rs"), "fn main() { run(); }\n").unwrap();
        let repo = Repository::open(&root).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.rs")).unwrap();
        index.write().unwrap();

        let reader = GitReader::open(&root).unwrap();
        let diff = reader.staged_diff().unwrap();
        assert!(diff.contains("+fn main() { run(); }"));
        assert_eq!(reader.staged_files().unwrap(), vec!["main.rs"]);
    }

    #[test]
    fn commit_details_include_the_patch() {
        let (_tmp, root) = fixture();
        let reader = GitReader::open(&root).unwrap();
        let (info, diff) = reader.commit_details("HEAD").unwrap();
        assert_eq!(info.summary, "initial commit");
        assert!(diff.contains("+fn main() {}"));

        assert!(matches!(
            reader.commit_details("not-a-ref"),
            Err(VcsError::UnknownRef(_))
        ));
    }

    #[test]
    fn modified_files_show_worktree_changes() {
        let (_tmp, root) = fixture();
        std::fs::write(root.join("main.rs"), "fn main() { changed(); }\n").unwrap();
        let reader = GitReader::open(&root).unwrap();
        assert_eq!(reader.modified_files().unwrap(), vec!["main.rs"]);
    }
}
