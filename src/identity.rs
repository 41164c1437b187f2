use std::collections::HashMap;

use nix::unistd::{Gid, Group, Uid, User};
use parking_lot::RwLock;

/// A passwd entry, reduced to what ownership decisions need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

/// A group entry with its supplementary member names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Where user and group records come from.
///
/// A lookup that fails for any reason reports `None`; an unknown id is a
/// normal condition for ids that only exist inside a container or on the
/// remote side.
pub trait IdentitySource: Send + Sync {
    fn user(&self, uid: u32) -> Option<UserEntry>;
    fn group(&self, gid: u32) -> Option<GroupEntry>;
}

/// The host's passwd and group databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostIdentity;

impl IdentitySource for HostIdentity {
    fn user(&self, uid: u32) -> Option<UserEntry> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Some(UserEntry {
                name: user.name,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::trace!("passwd lookup for uid {} failed: {}", uid, e);
                None
            }
        }
    }

    fn group(&self, gid: u32) -> Option<GroupEntry> {
        match Group::from_gid(Gid::from_raw(gid)) {
            Ok(Some(group)) => Some(GroupEntry {
                name: group.name,
                gid: group.gid.as_raw(),
                members: group.mem,
            }),
            Ok(None) => None,
            Err(e) => {
                tracing::trace!("group lookup for gid {} failed: {}", gid, e);
                None
            }
        }
    }
}

/// A uid paired with its display name, if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: u32,
    pub name: Option<String>,
}

fn member_of(source: &dyn IdentitySource, uid: u32, gid: u32) -> bool {
    let Some(user) = source.user(uid) else {
        return false;
    };
    if user.gid == gid {
        return true;
    }
    source
        .group(gid)
        .map(|group| group.members.iter().any(|member| *member == user.name))
        .unwrap_or(false)
}

/// Looks up the display name of `uid` in the host database.
pub fn resolve_username(uid: u32) -> Option<String> {
    HostIdentity.user(uid).map(|user| user.name)
}

/// True when `gid` is the primary group of `uid` or lists it as a member.
pub fn is_member(uid: u32, gid: u32) -> bool {
    member_of(&HostIdentity, uid, gid)
}

/// Memoizing front end over an [`IdentitySource`].
///
/// Owned by whichever component issues repeated lookups; the cache lives
/// exactly as long as the resolver. Results, including negative ones, are
/// kept until [`IdentityResolver::clear`].
pub struct IdentityResolver<S: IdentitySource = HostIdentity> {
    source: S,
    names: RwLock<HashMap<u32, Option<String>>>,
    memberships: RwLock<HashMap<(u32, u32), bool>>,
}

impl IdentityResolver<HostIdentity> {
    pub fn host() -> Self {
        Self::new(HostIdentity)
    }
}

impl Default for IdentityResolver<HostIdentity> {
    fn default() -> Self {
        Self::host()
    }
}

impl<S: IdentitySource> IdentityResolver<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            names: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve_username(&self, uid: u32) -> Option<String> {
        if let Some(name) = self.names.read().get(&uid) {
            return name.clone();
        }
        let name = self.source.user(uid).map(|user| user.name);
        self.names.write().insert(uid, name.clone());
        name
    }

    pub fn resolve(&self, uid: u32) -> ResolvedIdentity {
        ResolvedIdentity {
            uid,
            name: self.resolve_username(uid),
        }
    }

    pub fn is_member(&self, uid: u32, gid: u32) -> bool {
        if let Some(verdict) = self.memberships.read().get(&(uid, gid)) {
            return *verdict;
        }
        let verdict = member_of(&self.source, uid, gid);
        self.memberships.write().insert((uid, gid), verdict);
        verdict
    }

    /// Drops every memoized answer, e.g. after the host database changed.
    pub fn clear(&self) {
        self.names.write().clear();
        self.memberships.write().clear();
    }
}
