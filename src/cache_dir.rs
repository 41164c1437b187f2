use std::collections::HashSet;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use nix::fcntl::AtFlags;
use nix::unistd::{faccessat, AccessFlags};

use crate::error::CacheDirError;
use crate::scope_guard::Rollback;

/// How many times a creation walk restarts after a parent vanished under it.
const CREATE_RACE_RETRIES: usize = 3;

/// Result of probing a path for existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryPathState {
    Exists,
    /// `existing` is the deepest segment present; `missing` is the first absent one below it.
    Partial { existing: PathBuf, missing: PathBuf },
}

#[derive(Debug)]
pub struct PurgeFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

/// What a recursive purge managed to do.
#[derive(Debug, Default)]
pub struct PurgeOutcome {
    /// Entries removed under the root, not counting the root itself.
    pub removed: usize,
    /// Every entry that could not be removed, in traversal order.
    pub failures: Vec<PurgeFailure>,
    pub root_removed: bool,
}

impl PurgeOutcome {
    pub fn first_failure(&self) -> Option<&PurgeFailure> {
        self.failures.first()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Probe {
    Directory,
    Other,
    Missing,
}

fn probe_segment(path: &Path) -> Result<Probe, CacheDirError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(Probe::Directory),
        Ok(_) => Ok(Probe::Other),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Probe::Missing),
        Err(e) => Err(CacheDirError::from_io(path, e)),
    }
}

/// Creates every missing directory along `path` with permission `mode`.
///
/// Succeeds when `path` already is a directory. A segment that exists as a
/// non-directory fails with [`CacheDirError::NotADirectory`]. A segment
/// created by a concurrent caller between the probe and the `mkdir` counts as
/// success. On failure, directories created by this call are removed again
/// (best effort; a directory another caller has populated stays).
pub fn ensure_dir_tree(path: &Path, mode: u32) -> Result<(), CacheDirError> {
    let _span = tracing::debug_span!("cache_dir::ensure", path = ?path, mode = %format!("{:o}", mode)).entered();

    let mut attempt = 0;
    loop {
        match create_segments(path, mode) {
            // A parent disappeared after we saw it, most likely a concurrent purge
            Err(CacheDirError::Io { source, .. })
                if source.kind() == io::ErrorKind::NotFound && attempt < CREATE_RACE_RETRIES =>
            {
                attempt += 1;
                tracing::debug!("parent vanished during creation, retry {}", attempt);
            }
            result => return result,
        }
    }
}

fn create_segments(path: &Path, mode: u32) -> Result<(), CacheDirError> {
    let mut rollback = Rollback::new();
    let mut current = PathBuf::new();
    let mut builder = DirBuilder::new();
    builder.mode(mode);

    for component in path.components() {
        current.push(component);
        if !matches!(component, Component::Normal(_)) {
            continue;
        }

        match probe_segment(&current)? {
            Probe::Directory => continue,
            Probe::Other => return Err(CacheDirError::NotADirectory { path: current }),
            Probe::Missing => {}
        }

        match builder.create(&current) {
            Ok(()) => {
                tracing::trace!("created {:?}", current);
                let created = current.clone();
                rollback.push(move || {
                    if let Err(e) = fs::remove_dir(&created) {
                        tracing::debug!("rollback kept {:?}: {}", created, e);
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match probe_segment(&current)? {
                Probe::Directory => {}
                Probe::Other => return Err(CacheDirError::NotADirectory { path: current }),
                // Created and purged again by others between our mkdir and probe
                Probe::Missing => {
                    return Err(CacheDirError::Io {
                        path: current,
                        source: io::Error::from(io::ErrorKind::NotFound),
                    })
                }
            },
            Err(e) => return Err(CacheDirError::from_io(&current, e)),
        }
    }

    rollback.dismiss();
    Ok(())
}

fn root_sentinel(path: &Path) -> PathBuf {
    if path.has_root() {
        PathBuf::from("/")
    } else {
        PathBuf::from(".")
    }
}

fn segment_exists(path: &Path) -> bool {
    // An unreadable parent makes the probe fail; that counts as missing so
    // the walk reports the parent itself.
    path.try_exists().unwrap_or(false)
}

/// Walks upward from `path` and returns the deepest segment that exists.
///
/// Returns `/` (or `.` for a relative path) when no segment exists.
pub fn find_deepest_existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .filter(|ancestor| !ancestor.as_os_str().is_empty())
        .find(|ancestor| segment_exists(ancestor))
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root_sentinel(path))
}

/// Reports whether `path` exists in full, or where the existing prefix ends.
pub fn probe_path(path: &Path) -> DirectoryPathState {
    if segment_exists(path) {
        return DirectoryPathState::Exists;
    }

    let existing = find_deepest_existing_ancestor(path);
    let missing = path
        .ancestors()
        .take_while(|ancestor| *ancestor != existing.as_path() && !ancestor.as_os_str().is_empty())
        .last()
        .unwrap_or(path)
        .to_path_buf();

    DirectoryPathState::Partial { existing, missing }
}

/// True when `path` is a directory this process can both read and write.
///
/// Checked against the effective uid and gid, which are the ones later
/// cache writes run under.
pub fn check_dir_accessible(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => faccessat(
            None,
            path,
            AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK,
            AtFlags::AT_EACCESS,
        )
        .is_ok(),
        _ => false,
    }
}

enum Work {
    Visit(PathBuf),
    Remove(PathBuf),
}

struct Purge<'a> {
    root: &'a Path,
    outcome: PurgeOutcome,
    /// Directories that still hold something we failed to remove.
    retained: HashSet<PathBuf>,
}

impl<'a> Purge<'a> {
    fn record(&mut self, path: PathBuf, error: io::Error) {
        tracing::debug!("purge could not remove {:?}: {}", path, error);
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.starts_with(self.root) || !self.retained.insert(ancestor.to_path_buf()) {
                break;
            }
        }
        self.outcome.failures.push(PurgeFailure { path, error });
    }

    /// A directory whose listing failed: its contents are unknown, so it stays.
    fn unlisted(&mut self, dir: &Path, error: io::Error) {
        self.retained.insert(dir.to_path_buf());
        self.record(dir.to_path_buf(), error);
    }

    fn removed(&mut self, path: &Path) {
        if path == self.root {
            self.outcome.root_removed = true;
        } else {
            self.outcome.removed += 1;
        }
    }

    fn visit(&mut self, dir: &Path, work: &mut Vec<Work>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound && dir != self.root => return,
            Err(e) => {
                self.unlisted(dir, e);
                return;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.unlisted(dir, e);
                    continue;
                }
            };
            let path = entry.path();

            // file_type() does not follow symlinks, so a link is never descended into
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => {
                    work.push(Work::Remove(path.clone()));
                    work.push(Work::Visit(path));
                }
                Ok(_) => self.unlink(path),
                Err(e) => self.record(path, e),
            }
        }
    }

    fn unlink(&mut self, path: PathBuf) {
        match fs::remove_file(&path) {
            Ok(()) => self.removed(&path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.record(path, e),
        }
    }

    fn remove_dir(&mut self, dir: PathBuf) {
        if self.retained.contains(&dir) {
            return;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => self.removed(&dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.record(dir, e),
        }
    }
}

/// Recursively removes everything below `path`.
///
/// Symbolic links are unlinked, never followed. A failure on one entry is
/// recorded and the traversal carries on with its siblings; a directory that
/// still holds a failed entry is kept without being reported again. Unless
/// `preserve_root` is set, `path` itself is removed last, and only when every
/// descendant is gone.
pub fn purge_dir(path: &Path, preserve_root: bool) -> PurgeOutcome {
    let _span = tracing::debug_span!("cache_dir::purge", path = ?path, preserve_root).entered();

    let mut purge = Purge {
        root: path,
        outcome: PurgeOutcome::default(),
        retained: HashSet::new(),
    };

    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            let error = io::Error::from_raw_os_error(nix::errno::Errno::ENOTDIR as i32);
            purge.record(path.to_path_buf(), error);
            return purge.outcome;
        }
        Err(e) => {
            purge.record(path.to_path_buf(), e);
            return purge.outcome;
        }
    }

    let mut work = Vec::new();
    if !preserve_root {
        work.push(Work::Remove(path.to_path_buf()));
    }
    work.push(Work::Visit(path.to_path_buf()));

    while let Some(item) = work.pop() {
        match item {
            Work::Visit(dir) => purge.visit(&dir, &mut work),
            Work::Remove(dir) => purge.remove_dir(dir),
        }
    }

    tracing::debug!(
        removed = purge.outcome.removed,
        failures = purge.outcome.failures.len(),
        root_removed = purge.outcome.root_removed,
        "purge finished"
    );
    purge.outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_creates_nested_tree() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("a/b/c");

        ensure_dir_tree(&target, 0o755).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("bucket/objects");

        ensure_dir_tree(&target, 0o700).unwrap();
        ensure_dir_tree(&target, 0o700).unwrap();

        assert!(target.is_dir());
        let entries: Vec<_> = fs::read_dir(temp_dir.path().join("bucket")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_ensure_rejects_file_segment() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a dir").unwrap();

        let err = ensure_dir_tree(&blocker.join("child"), 0o755).unwrap_err();
        match err {
            CacheDirError::NotADirectory { path } => assert_eq!(path, blocker),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ensure_rolls_back_created_segments() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("base");
        fs::create_dir(&base).unwrap();

        // new1 and new2 get created, then the over-long name fails the walk
        let too_long = "x".repeat(300);
        let target = base.join("new1/new2").join(too_long);

        let err = ensure_dir_tree(&target, 0o755).unwrap_err();
        assert!(matches!(err, CacheDirError::Io { .. }), "unexpected error: {err}");
        assert!(base.is_dir());
        assert!(!base.join("new1").exists());
    }

    #[test]
    fn test_ensure_relative_components() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("x/./y/../z");

        ensure_dir_tree(&target, 0o755).unwrap();
        assert!(temp_dir.path().join("x/z").is_dir());
    }

    #[test]
    fn test_deepest_existing_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("existing");
        fs::create_dir(&existing).unwrap();

        let probe = existing.join("missing/more");
        assert_eq!(find_deepest_existing_ancestor(&probe), existing);
        assert_eq!(find_deepest_existing_ancestor(&existing), existing);
    }

    #[test]
    fn test_deepest_existing_ancestor_root_sentinel() {
        assert_eq!(
            find_deepest_existing_ancestor(Path::new("definitely-missing-segment/a/b")),
            PathBuf::from(".")
        );
        assert_eq!(
            find_deepest_existing_ancestor(Path::new("/definitely-missing-segment/a")),
            PathBuf::from("/")
        );
    }

    #[test]
    fn test_probe_path() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(probe_path(temp_dir.path()), DirectoryPathState::Exists);

        let probe = temp_dir.path().join("one/two/three");
        assert_eq!(
            probe_path(&probe),
            DirectoryPathState::Partial {
                existing: temp_dir.path().to_path_buf(),
                missing: temp_dir.path().join("one"),
            }
        );
    }

    #[test]
    fn test_check_dir_accessible() {
        let temp_dir = TempDir::new().unwrap();
        assert!(check_dir_accessible(temp_dir.path()));

        let file_path = temp_dir.path().join("file");
        fs::write(&file_path, "x").unwrap();
        assert!(!check_dir_accessible(&file_path));
        assert!(!check_dir_accessible(&temp_dir.path().join("missing")));
    }

    #[test]
    fn test_check_dir_accessible_uses_effective_ids() {
        let temp_dir = TempDir::new().unwrap();
        let sealed = temp_dir.path().join("sealed");
        fs::create_dir(&sealed).unwrap();
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).unwrap();

        // Only an effective uid of 0 gets past mode 000
        let expected = nix::unistd::geteuid().is_root();
        assert_eq!(check_dir_accessible(&sealed), expected);

        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o700)).unwrap();
        assert!(check_dir_accessible(&sealed));
    }

    #[test]
    fn test_check_dir_accessible_read_only() {
        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        // Root writes through the missing bit
        assert_eq!(check_dir_accessible(&locked), nix::unistd::geteuid().is_root());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();
        assert!(check_dir_accessible(&locked));
    }

    #[test]
    fn test_purge_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let outcome = purge_dir(&temp_dir.path().join("missing"), false);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.first_failure().unwrap().error.kind(), io::ErrorKind::NotFound);
        assert!(!outcome.root_removed);
    }

    #[test]
    fn test_purge_refuses_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("file");
        fs::write(&file_path, "x").unwrap();

        let outcome = purge_dir(&file_path, false);
        assert_eq!(outcome.failures.len(), 1);
        assert!(file_path.exists());
    }

    #[test]
    fn test_purge_removes_root_when_requested() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("cache");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/obj"), "data").unwrap();
        fs::write(root.join("top"), "data").unwrap();

        let outcome = purge_dir(&root, false);
        assert!(outcome.is_complete(), "{:?}", outcome.failures);
        assert_eq!(outcome.removed, 4);
        assert!(outcome.root_removed);
        assert!(!root.exists());
    }

    #[test]
    fn test_purge_empty_root_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let outcome = purge_dir(temp_dir.path(), true);
        assert!(outcome.is_complete());
        assert_eq!(outcome.removed, 0);
        assert!(!outcome.root_removed);
        assert!(temp_dir.path().is_dir());
    }
}
