//! blkfs: the inode layer of a small block filesystem.
//!
//! Files are mapped onto `N_DIRECT` direct blocks of `BLOCK_SIZE` bytes.
//! Unwritten blocks are holes that read as zero. A single flat root
//! directory binds names to inodes, and an inode lives exactly as long as
//! some directory entry references it.
//!
//! ```text
//! block 0            null block, never allocated
//! block 1            superblock
//! block 2..2+n       free bitmap (bit set = free)
//! remaining blocks   inodes, directory blocks and file data
//! ```
//!
//! Every operation runs on a [`Blkfs`] context over a [`BlockStore`]; there
//! is no internal locking and callers serialize access themselves.
#![cfg_attr(not(test), no_std)]
extern crate alloc;

#[doc(hidden)]
#[macro_export]
macro_rules! u32 {
    ($x:expr) => {
        u32::from_le_bytes($x.try_into().unwrap())
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! i64 {
    ($x:expr) => {
        i64::from_le_bytes($x.try_into().unwrap())
    };
}

mod attr;
mod common;
mod device;
mod dir;
mod disk;
mod file;
mod fs_common;
mod inode;
mod link;
mod superblock;

#[cfg(test)]
mod blkfs_test;

pub use common::{
    BlkfsAttr, BlkfsError, BlkfsFsStat, BlkfsPermission, BlkfsResult, BlkfsTimeSpec, S_IFMT,
    STAT_BLOCK_UNIT,
};
pub use device::{BlockDevice, RamDevice};
pub use dir::{DirEntry, DIRENTS_PER_BLOCK, DIRENT_SIZE};
pub use disk::{BlockNo, BlockStore, MemDisk};
pub use fs_common::Blkfs;
pub use inode::{Inode, InodeHandle};
pub use superblock::{MkfsOptions, Superblock, BLKFS_MAGIC};

#[cfg(feature = "blk4k")]
pub const BLOCK_SIZE: usize = 4096;

#[cfg(all(feature = "blk1k", not(feature = "blk4k")))]
pub const BLOCK_SIZE: usize = 1024;

#[cfg(not(any(feature = "blk1k", feature = "blk4k")))]
pub const BLOCK_SIZE: usize = 512;

/// Direct block slots per inode.
pub const N_DIRECT: usize = 64;

/// Largest file the direct map can address.
pub const MAX_FILE_SIZE: u64 = (N_DIRECT * BLOCK_SIZE) as u64;

/// Bytes available for a name in a directory entry.
pub const NAME_LEN: usize = 60;

/// Block number 0 never backs data; a zero slot is a hole.
pub const NULL_BLOCK: BlockNo = 0;

pub const SUPER_BLOCK: BlockNo = 1;

pub const BITMAP_START: BlockNo = 2;

pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;
