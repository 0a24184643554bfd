//! Inode attributes: `stat` and the plain metadata setters.
//!
//! Mode, owner, group, device and timestamps are stored as given; no
//! permission checks happen at this layer.

use crate::{
    common::{BlkfsAttr, BlkfsResult, BlkfsTimeSpec, STAT_BLOCK_UNIT},
    disk::BlockStore,
    fs_common::Blkfs,
    inode::{Inode, InodeHandle},
    BLOCK_SIZE, S_IFMT,
};

impl<S: BlockStore> Blkfs<S> {
    pub fn stat(&self, handle: InodeHandle) -> BlkfsResult<BlkfsAttr> {
        let inode = self.read_inode(handle)?;
        let nblocks = inode.allocated_blocks() as u64;
        Ok(BlkfsAttr {
            ino: inode.ino,
            mode: inode.mode,
            size: inode.size as u64,
            blksize: BLOCK_SIZE as u32,
            blocks: nblocks * (BLOCK_SIZE as u64 / STAT_BLOCK_UNIT),
            nlink: inode.nlink,
            uid: inode.owner,
            gid: inode.group,
            rdev: inode.rdev,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }

    fn update_inode<F>(&mut self, handle: InodeHandle, f: F) -> BlkfsResult<()>
    where
        F: FnOnce(&mut Inode),
    {
        let mut inode = self.read_inode(handle)?;
        f(&mut inode);
        inode.ctime = self.now();
        self.write_inode(&inode)?;
        self.disk.flush_block(inode.ino)
    }

    /// Replace the permission bits; the file type bits are kept.
    pub fn set_mode(&mut self, handle: InodeHandle, mode: u32) -> BlkfsResult<()> {
        self.update_inode(handle, |inode| {
            inode.mode = (inode.mode & S_IFMT) | (mode & !S_IFMT);
        })
    }

    pub fn set_owner(&mut self, handle: InodeHandle, uid: u32, gid: u32) -> BlkfsResult<()> {
        self.update_inode(handle, |inode| {
            inode.owner = uid;
            inode.group = gid;
        })
    }

    pub fn set_times(
        &mut self,
        handle: InodeHandle,
        atime: BlkfsTimeSpec,
        mtime: BlkfsTimeSpec,
    ) -> BlkfsResult<()> {
        self.update_inode(handle, |inode| {
            inode.atime = atime;
            inode.mtime = mtime;
        })
    }

    pub fn set_rdev(&mut self, handle: InodeHandle, rdev: u32) -> BlkfsResult<()> {
        self.update_inode(handle, |inode| inode.rdev = rdev)
    }
}
