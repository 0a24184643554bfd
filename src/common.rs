//! Types shared by every blkfs operation: errors, permissions, timestamps
//! and the attribute record returned by `stat`.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{BLOCK_SIZE, NAME_LEN};

pub type BlkfsResult<T> = Result<T, BlkfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, onlyerror::Error)]
pub enum BlkfsError {
    /// File block index at or beyond `N_DIRECT`, or a size past the largest file.
    #[error("file block out of range")]
    OutOfRange,
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("no space left on device")]
    NoSpace,
    /// No free directory entry and the directory can not grow.
    #[error("directory full")]
    OutOfMemory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("file name too long")]
    NameTooLong,
    /// The inode behind a handle was freed, possibly reused since.
    #[error("stale inode handle")]
    StaleHandle,
    #[error("bad block number {0}")]
    BadBlock(u32),
    #[error("filesystem image is corrupted")]
    Corrupted,
    #[error("device i/o error")]
    Io,
}

impl BlkfsError {
    /// Negative errno for a syscall layer sitting on top.
    pub fn errno(&self) -> i32 {
        let e = match self {
            BlkfsError::OutOfRange | BlkfsError::InvalidArgument => 22, // EINVAL
            BlkfsError::NotFound => 2,                                  // ENOENT
            BlkfsError::AlreadyExists => 17,                            // EEXIST
            BlkfsError::NoSpace => 28,                                  // ENOSPC
            BlkfsError::OutOfMemory => 12,                              // ENOMEM
            BlkfsError::NameTooLong => 36,                              // ENAMETOOLONG
            BlkfsError::StaleHandle => 116,                             // ESTALE
            BlkfsError::BadBlock(_) | BlkfsError::Io => 5,              // EIO
            BlkfsError::Corrupted => 117,                               // EUCLEAN
        };
        -e
    }
}

bitflags! {
    pub struct BlkfsPermission: u32 {
        const S_IFSOCK = 0o140000;
        const S_IFLNK = 0o120000;
        const S_IFREG = 0o100000;
        const S_IFBLK = 0o060000;
        const S_IFDIR = 0o040000;
        const S_IFCHR = 0o020000;
        const S_IFIFO = 0o010000;

        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;

        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IXGRP = 0o010;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;
        const S_IXOTH = 0o001;
    }
}

/// Mask selecting the file type bits of a mode.
pub const S_IFMT: u32 = 0o170000;

impl BlkfsPermission {
    pub fn file_type(&self) -> u32 {
        self.bits() & S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == BlkfsPermission::S_IFDIR.bits()
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == BlkfsPermission::S_IFREG.bits()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlkfsTimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

/// On-disk size of a timestamp.
pub const TIME_SPEC_SIZE: usize = 12;

impl BlkfsTimeSpec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn to_le_bytes(&self) -> [u8; TIME_SPEC_SIZE] {
        let mut buf = [0u8; TIME_SPEC_SIZE];
        buf[..8].copy_from_slice(&self.sec.to_le_bytes());
        buf[8..].copy_from_slice(&self.nsec.to_le_bytes());
        buf
    }
}

impl From<&[u8]> for BlkfsTimeSpec {
    fn from(value: &[u8]) -> Self {
        Self {
            sec: i64!(&value[..8]),
            nsec: u32!(&value[8..TIME_SPEC_SIZE]),
        }
    }
}

/// Unit of `BlkfsAttr::blocks`, as in `st_blocks`.
pub const STAT_BLOCK_UNIT: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlkfsAttr {
    /// Block number of the inode.
    pub ino: u32,
    pub mode: u32,
    pub size: u64,
    pub blksize: u32,
    /// Allocated storage in 512-byte units.
    pub blocks: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub atime: BlkfsTimeSpec,
    pub mtime: BlkfsTimeSpec,
    pub ctime: BlkfsTimeSpec,
}

impl BlkfsAttr {
    pub fn perm(&self) -> BlkfsPermission {
        BlkfsPermission::from_bits_truncate(self.mode)
    }

    /// Number of filesystem blocks backing the file.
    pub fn fs_blocks(&self) -> u64 {
        self.blocks * STAT_BLOCK_UNIT / BLOCK_SIZE as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlkfsFsStat {
    pub f_bsize: u32,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_namemax: u32,
}

impl BlkfsFsStat {
    pub(crate) fn new(total: u32, free: u32) -> Self {
        Self {
            f_bsize: BLOCK_SIZE as u32,
            f_blocks: total as u64,
            f_bfree: free as u64,
            f_namemax: NAME_LEN as u32,
        }
    }
}
