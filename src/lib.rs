//! Local metadata and cache-directory integrity primitives for an object-store
//! backed FUSE filesystem: nanosecond timestamps with an "omit" sentinel,
//! race-tolerant creation and best-effort purging of the on-disk cache tree,
//! identity lookups, and scope guards for undoing partial mutations.

pub mod cache_dir;
pub mod config;
pub mod error;
pub mod host;
pub mod identity;
pub mod metadata;
pub mod path_util;
pub mod permissions;
pub mod scope_guard;
pub mod timespec;


pub use cache_dir::{
    check_dir_accessible, ensure_dir_tree, find_deepest_existing_ancestor, probe_path, purge_dir,
    DirectoryPathState, PurgeFailure, PurgeOutcome,
};
pub use error::CacheDirError;
pub use identity::{IdentityResolver, IdentitySource, ResolvedIdentity};
pub use metadata::{PosixMetadataRecord, TimeSlot};
pub use scope_guard::{Rollback, ScopeGuard};
pub use timespec::{compare, is_stale, Timespec, Timestamp};
