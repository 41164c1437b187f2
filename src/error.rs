use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheDirError {
    #[error("permission denied at {}", path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },
    #[error("no space left on device at {}", path.display())]
    NoSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheDirError {
    /// Sorts a raw I/O failure at `path` into the taxonomy the callers act on.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        let path = path.to_path_buf();
        match source.raw_os_error().map(Errno::from_i32) {
            Some(Errno::EACCES) | Some(Errno::EPERM) | Some(Errno::EROFS) => {
                CacheDirError::PermissionDenied { path, source }
            }
            Some(Errno::ENOTDIR) => CacheDirError::NotADirectory { path },
            Some(Errno::ENOSPC) | Some(Errno::EDQUOT) => CacheDirError::NoSpace { path, source },
            _ if source.kind() == io::ErrorKind::PermissionDenied => {
                CacheDirError::PermissionDenied { path, source }
            }
            _ => CacheDirError::Io { path, source },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CacheDirError::PermissionDenied { path, .. }
            | CacheDirError::NotADirectory { path }
            | CacheDirError::NoSpace { path, .. }
            | CacheDirError::Io { path, .. } => path,
        }
    }

    pub fn errno(&self) -> i32 {
        match self {
            CacheDirError::PermissionDenied { source, .. } => {
                source.raw_os_error().unwrap_or(Errno::EACCES as i32)
            }
            CacheDirError::NotADirectory { .. } => Errno::ENOTDIR as i32,
            CacheDirError::NoSpace { source, .. } => source.raw_os_error().unwrap_or(Errno::ENOSPC as i32),
            CacheDirError::Io { source, .. } => source.raw_os_error().unwrap_or(Errno::EIO as i32),
        }
    }
}
