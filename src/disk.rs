//! Block store: allocation, raw block access and write-back.

use alloc::{sync::Arc, vec, vec::Vec};
use log::{debug, warn};

use crate::{
    common::{BlkfsError, BlkfsResult},
    device::BlockDevice,
    BITMAP_START, BITS_PER_BLOCK, BLOCK_SIZE, NULL_BLOCK, SUPER_BLOCK,
};

/// Physical block number. 0 is the null block.
pub type BlockNo = u32;

/// Source of physical blocks for the inode layer.
///
/// Only allocated blocks may be accessed; touching a free block is
/// `BadBlock`. `generation` changes every time a block is freed, which lets
/// handles detect that the block they were resolved against has gone.
pub trait BlockStore {
    fn nblocks(&self) -> u32;
    fn alloc_block(&mut self) -> BlkfsResult<BlockNo>;
    fn free_block(&mut self, bno: BlockNo) -> BlkfsResult<()>;
    fn block(&self, bno: BlockNo) -> BlkfsResult<&[u8]>;
    /// Mutable view of a block; marks it dirty.
    fn block_mut(&mut self, bno: BlockNo) -> BlkfsResult<&mut [u8]>;
    /// Write the block back to stable storage if it is dirty.
    fn flush_block(&mut self, bno: BlockNo) -> BlkfsResult<()>;
    /// Write back every dirty allocated block.
    fn sync_all(&mut self) -> BlkfsResult<()>;
    fn is_free(&self, bno: BlockNo) -> bool;
    fn generation(&self, bno: BlockNo) -> u32;
    fn free_count(&self) -> u32;
}

/// Disk image held in memory, optionally written back to a [`BlockDevice`].
pub struct MemDisk {
    image: Vec<u8>,
    dirty: Vec<bool>,
    generation: Vec<u32>,
    nblocks: u32,
    nbitmap: u32,
    device: Option<Arc<dyn BlockDevice>>,
}

impl MemDisk {
    /// Fresh image with no backing device.
    pub fn new(nblocks: u32) -> BlkfsResult<Self> {
        let mut disk = Self::empty(nblocks, None)?;
        disk.init_bitmap()?;
        Ok(disk)
    }

    /// Fresh image sized to `device`; the bitmap is written through at once.
    pub fn create(device: Arc<dyn BlockDevice>) -> BlkfsResult<Self> {
        let nblocks = Self::device_blocks(device.as_ref())?;
        let mut disk = Self::empty(nblocks, Some(device))?;
        disk.init_bitmap()?;
        Ok(disk)
    }

    /// Load an image previously flushed to `device`.
    pub fn open(device: Arc<dyn BlockDevice>) -> BlkfsResult<Self> {
        let nblocks = Self::device_blocks(device.as_ref())?;
        let mut disk = Self::empty(nblocks, None)?;
        device.read_at(0, &mut disk.image)?;
        disk.device = Some(device);
        for bno in 0..disk.reserved() {
            if disk.is_free(bno) {
                warn!("blkfs: metadata block {} marked free in bitmap", bno);
                return Err(BlkfsError::Corrupted);
            }
        }
        Ok(disk)
    }

    fn device_blocks(device: &dyn BlockDevice) -> BlkfsResult<u32> {
        u32::try_from(device.size() / BLOCK_SIZE as u64).map_err(|_| BlkfsError::InvalidArgument)
    }

    fn empty(nblocks: u32, device: Option<Arc<dyn BlockDevice>>) -> BlkfsResult<Self> {
        let nbitmap = (nblocks as usize).div_ceil(BITS_PER_BLOCK) as u32;
        // Room for null block, superblock, bitmap and at least one more block.
        if nblocks <= BITMAP_START + nbitmap {
            return Err(BlkfsError::InvalidArgument);
        }
        Ok(Self {
            image: vec![0; nblocks as usize * BLOCK_SIZE],
            dirty: vec![false; nblocks as usize],
            generation: vec![0; nblocks as usize],
            nblocks,
            nbitmap,
            device,
        })
    }

    fn init_bitmap(&mut self) -> BlkfsResult<()> {
        for bno in self.reserved()..self.nblocks {
            let (idx, mask) = Self::bitmap_pos(bno);
            self.image[idx] |= mask;
        }
        for bno in BITMAP_START..self.reserved() {
            self.dirty[bno as usize] = true;
            self.flush_block(bno)?;
        }
        Ok(())
    }

    /// Blocks below this are never handed out.
    fn reserved(&self) -> BlockNo {
        BITMAP_START + self.nbitmap
    }

    fn bitmap_pos(bno: BlockNo) -> (usize, u8) {
        let bno = bno as usize;
        let block = BITMAP_START as usize + bno / BITS_PER_BLOCK;
        let idx = block * BLOCK_SIZE + (bno % BITS_PER_BLOCK) / 8;
        (idx, 1 << (bno % 8))
    }

    fn bitmap_block(bno: BlockNo) -> BlockNo {
        BITMAP_START + (bno as usize / BITS_PER_BLOCK) as BlockNo
    }

    fn set_free(&mut self, bno: BlockNo, free: bool) -> BlkfsResult<()> {
        let (idx, mask) = Self::bitmap_pos(bno);
        if free {
            self.image[idx] |= mask;
        } else {
            self.image[idx] &= !mask;
        }
        let bitmap = Self::bitmap_block(bno);
        self.dirty[bitmap as usize] = true;
        self.flush_block(bitmap)
    }

    fn check(&self, bno: BlockNo) -> BlkfsResult<usize> {
        if bno == NULL_BLOCK || bno >= self.nblocks || self.is_free(bno) {
            return Err(BlkfsError::BadBlock(bno));
        }
        Ok(bno as usize * BLOCK_SIZE)
    }

    pub fn is_dirty(&self, bno: BlockNo) -> bool {
        self.dirty.get(bno as usize).copied().unwrap_or(false)
    }

}

impl BlockStore for MemDisk {
    fn nblocks(&self) -> u32 {
        self.nblocks
    }

    fn alloc_block(&mut self) -> BlkfsResult<BlockNo> {
        let bno = match (self.reserved()..self.nblocks).find(|&bno| self.is_free(bno)) {
            Some(bno) => bno,
            None => {
                warn!("blkfs: all {} blocks in use", self.nblocks);
                return Err(BlkfsError::NoSpace);
            }
        };
        self.set_free(bno, false)?;
        debug!("blkfs: alloc block {}", bno);
        Ok(bno)
    }

    fn free_block(&mut self, bno: BlockNo) -> BlkfsResult<()> {
        if bno < self.reserved() || bno >= self.nblocks || self.is_free(bno) {
            return Err(BlkfsError::BadBlock(bno));
        }
        self.set_free(bno, true)?;
        self.dirty[bno as usize] = false;
        self.generation[bno as usize] = self.generation[bno as usize].wrapping_add(1);
        debug!("blkfs: free block {}", bno);
        Ok(())
    }

    fn block(&self, bno: BlockNo) -> BlkfsResult<&[u8]> {
        let start = self.check(bno)?;
        Ok(&self.image[start..start + BLOCK_SIZE])
    }

    fn block_mut(&mut self, bno: BlockNo) -> BlkfsResult<&mut [u8]> {
        let start = self.check(bno)?;
        self.dirty[bno as usize] = true;
        Ok(&mut self.image[start..start + BLOCK_SIZE])
    }

    fn flush_block(&mut self, bno: BlockNo) -> BlkfsResult<()> {
        let start = self.check(bno)?;
        if !self.dirty[bno as usize] {
            return Ok(());
        }
        if let Some(device) = &self.device {
            if let Err(e) = device.write_at(start as u64, &self.image[start..start + BLOCK_SIZE]) {
                warn!("blkfs: write back of block {} failed: {}", bno, e);
                return Err(e);
            }
        }
        self.dirty[bno as usize] = false;
        Ok(())
    }

    fn sync_all(&mut self) -> BlkfsResult<()> {
        for bno in SUPER_BLOCK..self.nblocks {
            if self.dirty[bno as usize] && !self.is_free(bno) {
                self.flush_block(bno)?;
            }
        }
        Ok(())
    }

    fn is_free(&self, bno: BlockNo) -> bool {
        if bno >= self.nblocks {
            return false;
        }
        let (idx, mask) = Self::bitmap_pos(bno);
        self.image[idx] & mask != 0
    }

    fn generation(&self, bno: BlockNo) -> u32 {
        self.generation.get(bno as usize).copied().unwrap_or(0)
    }

    fn free_count(&self) -> u32 {
        (self.reserved()..self.nblocks)
            .filter(|&bno| self.is_free(bno))
            .count() as u32
    }
}
