use nix::errno::Errno;
use tracing::debug;

use crate::metadata::PosixMetadataRecord;

// Access mode constants compatible with POSIX
pub const F_OK: i32 = 0; // Test for existence
pub const X_OK: i32 = 1; // Test for execute permission
pub const W_OK: i32 = 2; // Test for write permission
pub const R_OK: i32 = 4; // Test for read permission

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessError(pub i32);

impl AccessError {
    pub fn to_errno(&self) -> i32 {
        self.0
    }
}

/// Decides POSIX access for `uid` to an object described by `record`.
///
/// The remote store carries no ACLs, so the mode bits are all there is:
/// - uid 0 may read and write anything, and execute when any x bit is set
/// - the owner gets the user bits
/// - a member of the owning group, as decided by `is_member(uid, gid)`, gets the group bits
/// - everyone else gets the other bits
///
/// `is_member` is normally [`crate::identity::IdentityResolver::is_member`].
pub fn check_access<M>(uid: u32, record: &PosixMetadataRecord, mask: i32, is_member: M) -> Result<(), AccessError>
where
    M: Fn(u32, u32) -> bool,
{
    debug!(
        "check_access: uid={}, file_uid={}, file_gid={}, mode={:o}, mask={}",
        uid, record.uid, record.gid, record.mode, mask
    );

    let denied = AccessError(Errno::EACCES as i32);

    if mask == F_OK {
        return Ok(());
    }

    if uid == 0 {
        if mask & X_OK != 0 && record.mode & 0o111 == 0 {
            debug!("Root denied execute: no execute bits set");
            return Err(denied);
        }
        return Ok(());
    }

    let perm_bits = if uid == record.uid {
        (record.mode >> 6) & 0o7
    } else if is_member(uid, record.gid) {
        (record.mode >> 3) & 0o7
    } else {
        record.mode & 0o7
    };

    debug!("Permission bits: {:o}", perm_bits);

    if mask & R_OK != 0 && perm_bits & 0o4 == 0 {
        return Err(denied);
    }
    if mask & W_OK != 0 && perm_bits & 0o2 == 0 {
        return Err(denied);
    }
    if mask & X_OK != 0 && perm_bits & 0o1 == 0 {
        return Err(denied);
    }

    Ok(())
}
