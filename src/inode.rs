//! Inode records and the direct block map.
//!
//! An inode fills one physical block: a fixed metadata header followed by
//! `N_DIRECT` block numbers. A zero slot is a hole. Slot `i` covers file
//! bytes `[i * BLOCK_SIZE, (i + 1) * BLOCK_SIZE)`.

use log::debug;

use crate::{
    common::{BlkfsError, BlkfsPermission, BlkfsResult, BlkfsTimeSpec, TIME_SPEC_SIZE},
    disk::{BlockNo, BlockStore},
    fs_common::Blkfs,
    BLOCK_SIZE, MAX_FILE_SIZE, NULL_BLOCK, N_DIRECT,
};

const I_SIZE: usize = 0;
const I_NLINK: usize = 4;
const I_MODE: usize = 8;
const I_OWNER: usize = 12;
const I_GROUP: usize = 16;
const I_RDEV: usize = 20;
const I_ATIME: usize = 24;
const I_MTIME: usize = I_ATIME + TIME_SPEC_SIZE;
const I_CTIME: usize = I_MTIME + TIME_SPEC_SIZE;
const I_DIRECT: usize = 64;

pub const INODE_DISK_SIZE: usize = I_DIRECT + N_DIRECT * 4;

const _: () = assert!(I_CTIME + TIME_SPEC_SIZE <= I_DIRECT);
const _: () = assert!(INODE_DISK_SIZE <= BLOCK_SIZE);

/// Reference to a live inode.
///
/// Carries the generation of the inode's block at the time it was resolved,
/// so a handle outliving its inode is rejected as `StaleHandle` instead of
/// reaching whatever reused the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeHandle {
    bno: BlockNo,
    generation: u32,
}

impl InodeHandle {
    /// Block number holding the inode, also its inode number.
    pub fn ino(&self) -> BlockNo {
        self.bno
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Block this inode lives in. Not stored on disk.
    pub ino: BlockNo,
    pub size: u32,
    pub nlink: u32,
    pub mode: u32,
    pub owner: u32,
    pub group: u32,
    pub rdev: u32,
    pub atime: BlkfsTimeSpec,
    pub mtime: BlkfsTimeSpec,
    pub ctime: BlkfsTimeSpec,
    pub direct: [BlockNo; N_DIRECT],
}

impl Inode {
    pub fn empty(ino: BlockNo) -> Self {
        Self {
            ino,
            size: 0,
            nlink: 0,
            mode: 0,
            owner: 0,
            group: 0,
            rdev: 0,
            atime: BlkfsTimeSpec::default(),
            mtime: BlkfsTimeSpec::default(),
            ctime: BlkfsTimeSpec::default(),
            direct: [NULL_BLOCK; N_DIRECT],
        }
    }

    pub fn decode(ino: BlockNo, buf: &[u8]) -> Self {
        let mut direct = [NULL_BLOCK; N_DIRECT];
        for (i, slot) in direct.iter_mut().enumerate() {
            let off = I_DIRECT + i * 4;
            *slot = u32!(&buf[off..off + 4]);
        }
        Self {
            ino,
            size: u32!(&buf[I_SIZE..I_SIZE + 4]),
            nlink: u32!(&buf[I_NLINK..I_NLINK + 4]),
            mode: u32!(&buf[I_MODE..I_MODE + 4]),
            owner: u32!(&buf[I_OWNER..I_OWNER + 4]),
            group: u32!(&buf[I_GROUP..I_GROUP + 4]),
            rdev: u32!(&buf[I_RDEV..I_RDEV + 4]),
            atime: BlkfsTimeSpec::from(&buf[I_ATIME..I_MTIME]),
            mtime: BlkfsTimeSpec::from(&buf[I_MTIME..I_CTIME]),
            ctime: BlkfsTimeSpec::from(&buf[I_CTIME..I_CTIME + TIME_SPEC_SIZE]),
            direct,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[I_SIZE..I_SIZE + 4].copy_from_slice(&self.size.to_le_bytes());
        buf[I_NLINK..I_NLINK + 4].copy_from_slice(&self.nlink.to_le_bytes());
        buf[I_MODE..I_MODE + 4].copy_from_slice(&self.mode.to_le_bytes());
        buf[I_OWNER..I_OWNER + 4].copy_from_slice(&self.owner.to_le_bytes());
        buf[I_GROUP..I_GROUP + 4].copy_from_slice(&self.group.to_le_bytes());
        buf[I_RDEV..I_RDEV + 4].copy_from_slice(&self.rdev.to_le_bytes());
        buf[I_ATIME..I_MTIME].copy_from_slice(&self.atime.to_le_bytes());
        buf[I_MTIME..I_CTIME].copy_from_slice(&self.mtime.to_le_bytes());
        buf[I_CTIME..I_CTIME + TIME_SPEC_SIZE].copy_from_slice(&self.ctime.to_le_bytes());
        for (i, slot) in self.direct.iter().enumerate() {
            let off = I_DIRECT + i * 4;
            buf[off..off + 4].copy_from_slice(&slot.to_le_bytes());
        }
    }

    pub fn perm(&self) -> BlkfsPermission {
        BlkfsPermission::from_bits_truncate(self.mode)
    }

    /// File blocks covered by `size`, holes included.
    pub fn size_blocks(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }

    /// Direct slots currently backed by a block.
    pub fn allocated_blocks(&self) -> usize {
        self.direct.iter().filter(|&&b| b != NULL_BLOCK).count()
    }

    /// Find the slot for file block `filebno`. The slot may hold
    /// `NULL_BLOCK`; nothing is allocated.
    pub fn block_walk(&mut self, filebno: usize) -> BlkfsResult<&mut BlockNo> {
        if filebno >= N_DIRECT {
            return Err(BlkfsError::OutOfRange);
        }
        Ok(&mut self.direct[filebno])
    }

    /// Read-only form of [`Inode::block_walk`].
    pub fn block_slot(&self, filebno: usize) -> BlkfsResult<BlockNo> {
        self.direct
            .get(filebno)
            .copied()
            .ok_or(BlkfsError::OutOfRange)
    }
}

impl<S: BlockStore> Blkfs<S> {
    pub(crate) fn handle(&self, bno: BlockNo) -> InodeHandle {
        InodeHandle {
            bno,
            generation: self.disk.generation(bno),
        }
    }

    /// Decode the inode behind `handle`.
    pub fn read_inode(&self, handle: InodeHandle) -> BlkfsResult<Inode> {
        if self.disk.is_free(handle.bno) || self.disk.generation(handle.bno) != handle.generation {
            return Err(BlkfsError::StaleHandle);
        }
        self.load_inode(handle.bno)
    }

    pub(crate) fn load_inode(&self, bno: BlockNo) -> BlkfsResult<Inode> {
        Ok(Inode::decode(bno, self.disk.block(bno)?))
    }

    /// Encode `inode` into its block. The block becomes dirty; nothing is flushed.
    pub(crate) fn write_inode(&mut self, inode: &Inode) -> BlkfsResult<()> {
        inode.encode(self.disk.block_mut(inode.ino)?);
        Ok(())
    }

    /// Return the data of file block `filebno`, allocating a zeroed block if
    /// the slot is a hole. Only that one slot is filled.
    pub(crate) fn get_block(&mut self, inode: &mut Inode, filebno: usize) -> BlkfsResult<&mut [u8]> {
        let slot = inode.block_walk(filebno)?;
        if *slot == NULL_BLOCK {
            let bno = self.disk.alloc_block()?;
            self.disk.block_mut(bno)?.fill(0);
            *slot = bno;
        }
        let bno = *slot;
        self.disk.block_mut(bno)
    }

    /// Release file block `filebno`; a hole is left alone.
    fn free_file_block(&mut self, inode: &mut Inode, filebno: usize) -> BlkfsResult<()> {
        let slot = inode.block_walk(filebno)?;
        if *slot != NULL_BLOCK {
            self.disk.free_block(*slot)?;
            *slot = NULL_BLOCK;
        }
        Ok(())
    }

    /// Free every block past `newsize` and zero the tail of the last kept
    /// block. `inode.size` is left unchanged.
    fn truncate_blocks(&mut self, inode: &mut Inode, newsize: u32) -> BlkfsResult<()> {
        let keep = (newsize as usize).div_ceil(BLOCK_SIZE);
        for filebno in keep..N_DIRECT {
            self.free_file_block(inode, filebno)?;
        }
        let tail = newsize as usize % BLOCK_SIZE;
        if tail != 0 {
            let bno = inode.block_slot(newsize as usize / BLOCK_SIZE)?;
            if bno != NULL_BLOCK {
                self.disk.block_mut(bno)?[tail..].fill(0);
            }
        }
        Ok(())
    }

    /// Resize without allocating; growth leaves holes. The inode is stored
    /// and its block flushed.
    pub(crate) fn inode_set_size(&mut self, inode: &mut Inode, newsize: u64) -> BlkfsResult<()> {
        if newsize > MAX_FILE_SIZE {
            return Err(BlkfsError::OutOfRange);
        }
        let newsize = newsize as u32;
        if inode.size > newsize {
            if let Err(e) = self.truncate_blocks(inode, newsize) {
                // keep the slots freed so far out of the inode
                self.write_inode(inode)?;
                return Err(e);
            }
        }
        let now = self.now();
        inode.size = newsize;
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode(inode)?;
        self.disk.flush_block(inode.ino)
    }

    pub fn set_size(&mut self, handle: InodeHandle, newsize: u64) -> BlkfsResult<()> {
        let mut inode = self.read_inode(handle)?;
        self.inode_set_size(&mut inode, newsize)
    }

    /// Flush the data blocks within `size` and then the inode block itself.
    pub(crate) fn inode_flush(&mut self, inode: &Inode) -> BlkfsResult<()> {
        for filebno in 0..inode.size_blocks() {
            match inode.block_slot(filebno) {
                Ok(NULL_BLOCK) | Err(_) => continue,
                Ok(bno) => self.disk.flush_block(bno)?,
            }
        }
        self.disk.flush_block(inode.ino)
    }

    pub fn flush(&mut self, handle: InodeHandle) -> BlkfsResult<()> {
        let inode = self.read_inode(handle)?;
        self.inode_flush(&inode)
    }

    /// Release all storage of an inode whose last link is gone.
    ///
    /// Panics if the inode still has links: that means the directory and the
    /// link count disagree, and nothing can be freed safely.
    pub(crate) fn free_inode(&mut self, mut inode: Inode) -> BlkfsResult<()> {
        assert_eq!(inode.nlink, 0, "blkfs: freeing inode {} with live links", inode.ino);
        self.inode_set_size(&mut inode, 0)?;
        self.inode_flush(&inode)?;
        self.disk.free_block(inode.ino)?;
        debug!("blkfs: freed inode {}", inode.ino);
        Ok(())
    }
}
