use std::cmp::Ordering;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use filetime::FileTime;
use fuser::{FileAttr, FileType};

use crate::timespec::{compare, Timespec, Timestamp};

// File type bits of st_mode
const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// The three POSIX timestamps carried by every file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeSlot {
    Access,
    Modify,
    Change,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 3] = [TimeSlot::Access, TimeSlot::Modify, TimeSlot::Change];

    pub fn name(&self) -> &'static str {
        match self {
            TimeSlot::Access => "atime",
            TimeSlot::Modify => "mtime",
            TimeSlot::Change => "ctime",
        }
    }
}

/// POSIX attribute state for one object, either read from the local cache or
/// synthesized from a remote snapshot.
///
/// A slot holding [`Timestamp::Omit`] is unset: the record has no opinion
/// about that time and attribute updates built from it leave the field alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixMetadataRecord {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub size: u64,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl PosixMetadataRecord {
    /// A record with ownership and mode set and every timestamp unset.
    pub fn new(uid: u32, gid: u32, mode: u32) -> Self {
        Self {
            uid,
            gid,
            mode,
            size: 0,
            atime: Timestamp::Omit,
            mtime: Timestamp::Omit,
            ctime: Timestamp::Omit,
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            uid: metadata.uid(),
            gid: metadata.gid(),
            mode: metadata.mode(),
            size: metadata.size(),
            atime: Timespec::normalized(metadata.atime(), metadata.atime_nsec()).into(),
            mtime: Timespec::normalized(metadata.mtime(), metadata.mtime_nsec()).into(),
            ctime: Timespec::normalized(metadata.ctime(), metadata.ctime_nsec()).into(),
        }
    }

    /// Reads the record of a cache entry without following a trailing symlink.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    fn slot_mut(&mut self, slot: TimeSlot) -> &mut Timestamp {
        match slot {
            TimeSlot::Access => &mut self.atime,
            TimeSlot::Modify => &mut self.mtime,
            TimeSlot::Change => &mut self.ctime,
        }
    }

    /// Returns the slot's value, `Omit` if the slot is unset.
    pub fn extract(&self, slot: TimeSlot) -> Timestamp {
        match slot {
            TimeSlot::Access => self.atime,
            TimeSlot::Modify => self.mtime,
            TimeSlot::Change => self.ctime,
        }
    }

    /// Writes `ts` into `slot`. `Omit` leaves the current value in place.
    pub fn apply(&mut self, slot: TimeSlot, ts: Timestamp) {
        if ts.is_omit() {
            return;
        }
        *self.slot_mut(slot) = ts;
    }

    /// Orders the cached slot against a candidate timestamp.
    pub fn compare_slot(&self, slot: TimeSlot, ts: &Timestamp) -> Option<Ordering> {
        compare(&self.extract(slot), ts)
    }

    /// True when `remote` is strictly newer than the cached slot.
    pub fn is_slot_stale(&self, slot: TimeSlot, remote: &Timestamp) -> bool {
        self.compare_slot(slot, remote) == Some(Ordering::Less)
    }

    /// Copies every timestamp from `remote` that is strictly newer than ours.
    ///
    /// An unset local slot is filled from a remote value. Returns whether any
    /// slot changed.
    pub fn merge_newer(&mut self, remote: &PosixMetadataRecord) -> bool {
        let mut changed = false;
        for slot in TimeSlot::ALL {
            let incoming = remote.extract(slot);
            let take = match self.extract(slot) {
                Timestamp::Omit => !incoming.is_omit(),
                _ => self.is_slot_stale(slot, &incoming),
            };
            if take {
                self.apply(slot, incoming);
                changed = true;
            }
        }
        changed
    }

    /// `"<sec>.<nsec>"` for logs. Not for comparisons.
    pub fn format_slot(&self, slot: TimeSlot) -> String {
        self.extract(slot).to_string()
    }

    pub fn file_type(&self) -> FileType {
        match self.mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            S_IFIFO => FileType::NamedPipe,
            S_IFCHR => FileType::CharDevice,
            S_IFBLK => FileType::BlockDevice,
            S_IFSOCK => FileType::Socket,
            _ => FileType::RegularFile,
        }
    }

    /// Builds a FUSE attribute reply. Unset or unrepresentable slots are
    /// reported as the epoch since the reply has no way to say "unknown".
    pub fn to_file_attr(&self, ino: u64) -> FileAttr {
        let system_time = |ts: Timestamp| {
            ts.value()
                .and_then(Timespec::to_system_time)
                .unwrap_or(UNIX_EPOCH)
        };
        let kind = self.file_type();

        FileAttr {
            ino,
            size: self.size,
            blocks: self.size.div_ceil(512),
            atime: system_time(self.atime),
            mtime: system_time(self.mtime),
            ctime: system_time(self.ctime),
            crtime: system_time(self.ctime),
            kind,
            perm: (self.mode & 0o7777) as u16,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            flags: 0,
            blksize: 512,
        }
    }

    /// Pushes the access and modification times onto a staged cache file.
    ///
    /// Unset slots are not touched on disk. The change time cannot be set
    /// from user space and is ignored.
    pub fn stamp_path(&self, path: &Path) -> io::Result<()> {
        let file_time = |ts: Timespec| FileTime::from_unix_time(ts.sec(), ts.nsec());

        match (self.atime.value(), self.mtime.value()) {
            (Some(atime), Some(mtime)) => filetime::set_file_times(path, file_time(atime), file_time(mtime)),
            (Some(atime), None) => filetime::set_file_atime(path, file_time(atime)),
            (None, Some(mtime)) => filetime::set_file_mtime(path, file_time(mtime)),
            (None, None) => Ok(()),
        }
    }
}
