//! Positional read and write over the direct block map.

use core::cmp::min;

use crate::{
    common::{BlkfsError, BlkfsResult},
    disk::BlockStore,
    fs_common::Blkfs,
    inode::{Inode, InodeHandle},
    BLOCK_SIZE, NULL_BLOCK,
};

impl<S: BlockStore> Blkfs<S> {
    /// Read up to `buf.len()` bytes at `offset`, like `pread`.
    ///
    /// Returns 0 at or past end of file. Holes read as zero and allocate
    /// nothing.
    pub fn read(&self, handle: InodeHandle, buf: &mut [u8], offset: u64) -> BlkfsResult<usize> {
        let inode = self.read_inode(handle)?;
        self.inode_read(&inode, buf, offset)
    }

    pub(crate) fn inode_read(&self, inode: &Inode, buf: &mut [u8], offset: u64) -> BlkfsResult<usize> {
        let size = inode.size as u64;
        if offset >= size {
            return Ok(0);
        }
        let count = min(buf.len() as u64, size - offset) as usize;
        let offset = offset as usize;

        let mut pos = offset;
        while pos < offset + count {
            let bn = min(BLOCK_SIZE - pos % BLOCK_SIZE, offset + count - pos);
            let dst = &mut buf[pos - offset..pos - offset + bn];
            let bno = inode.block_slot(pos / BLOCK_SIZE)?;
            // hole
            if bno == NULL_BLOCK {
                dst.fill(0);
            } else {
                let blk = self.disk.block(bno)?;
                let start = pos % BLOCK_SIZE;
                dst.copy_from_slice(&blk[start..start + bn]);
            }
            pos += bn;
        }
        Ok(count)
    }

    /// Write `buf` at `offset`, like `pwrite`, growing the file first when
    /// the write ends past it.
    ///
    /// Blocks are allocated one at a time as they are reached. If allocation
    /// fails part way the bytes already copied stay written, the grown size
    /// stays, and the error is returned.
    pub fn write(&mut self, handle: InodeHandle, buf: &[u8], offset: u64) -> BlkfsResult<usize> {
        let mut inode = self.read_inode(handle)?;
        let written = self.inode_write(&mut inode, buf, offset);
        // blocks taken before a failure belong to the inode either way
        self.write_inode(&inode)?;
        written
    }

    pub(crate) fn inode_write(&mut self, inode: &mut Inode, buf: &[u8], offset: u64) -> BlkfsResult<usize> {
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(BlkfsError::OutOfRange)?;
        if end > inode.size as u64 {
            self.inode_set_size(inode, end)?;
        }
        let count = buf.len();
        let offset = offset as usize;

        let mut pos = offset;
        while pos < offset + count {
            let bn = min(BLOCK_SIZE - pos % BLOCK_SIZE, offset + count - pos);
            let blk = self.get_block(inode, pos / BLOCK_SIZE)?;
            let start = pos % BLOCK_SIZE;
            blk[start..start + bn].copy_from_slice(&buf[pos - offset..pos - offset + bn]);
            pos += bn;
        }

        let now = self.now();
        inode.mtime = now;
        inode.ctime = now;
        Ok(count)
    }
}
