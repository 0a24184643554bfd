//! Superblock layout and format options.

use serde::Deserialize;

use crate::{
    common::{BlkfsError, BlkfsResult},
    disk::BlockNo,
};

/// "BLKF"
pub const BLKFS_MAGIC: u32 = 0x424c_4b46;

/// Contents of block 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    pub nblocks: u32,
    /// Block holding the root directory inode.
    pub root: BlockNo,
}

impl Superblock {
    pub fn new(nblocks: u32, root: BlockNo) -> Self {
        Self {
            magic: BLKFS_MAGIC,
            nblocks,
            root,
        }
    }

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            magic: u32!(&buf[0..4]),
            nblocks: u32!(&buf[4..8]),
            root: u32!(&buf[8..12]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.nblocks.to_le_bytes());
        buf[8..12].copy_from_slice(&self.root.to_le_bytes());
    }

    /// Check the superblock against the store it was read from.
    pub fn validate(&self, nblocks: u32) -> BlkfsResult<()> {
        if self.magic != BLKFS_MAGIC || self.nblocks != nblocks {
            return Err(BlkfsError::Corrupted);
        }
        if self.root == 0 || self.root >= nblocks {
            return Err(BlkfsError::Corrupted);
        }
        Ok(())
    }
}

fn default_root_mode() -> u32 {
    0o755
}

/// Options for [`Blkfs::format`](crate::Blkfs::format).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MkfsOptions {
    /// Image size in blocks, used when the store is created from the options.
    pub nblocks: u32,
    /// Permission bits of the root directory.
    #[serde(default = "default_root_mode")]
    pub root_mode: u32,
    /// Owner given to the root and to every created file.
    pub uid: u32,
    pub gid: u32,
}

impl Default for MkfsOptions {
    fn default() -> Self {
        Self {
            nblocks: 1024,
            root_mode: default_root_mode(),
            uid: 0,
            gid: 0,
        }
    }
}

impl MkfsOptions {
    pub fn from_json(json: &str) -> BlkfsResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            log::warn!("blkfs: bad mkfs options: {}", e);
            BlkfsError::InvalidArgument
        })
    }
}
