//! Persistent medium behind a [`MemDisk`](crate::MemDisk).

use alloc::{vec, vec::Vec};
use spin::Mutex;

use crate::common::{BlkfsError, BlkfsResult};

/// Byte-addressed device that flushed blocks are written to.
pub trait BlockDevice: Send + Sync {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> BlkfsResult<usize>;
    fn write_at(&self, pos: u64, buf: &[u8]) -> BlkfsResult<usize>;
    fn size(&self) -> u64;
}

/// Fixed-size device held in memory.
pub struct RamDevice {
    data: Mutex<Vec<u8>>,
}

impl RamDevice {
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
        }
    }
}

impl BlockDevice for RamDevice {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> BlkfsResult<usize> {
        let data = self.data.lock();
        let start = pos as usize;
        let end = start.checked_add(buf.len()).ok_or(BlkfsError::Io)?;
        if end > data.len() {
            return Err(BlkfsError::Io);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(buf.len())
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> BlkfsResult<usize> {
        let mut data = self.data.lock();
        let start = pos as usize;
        let end = start.checked_add(buf.len()).ok_or(BlkfsError::Io)?;
        if end > data.len() {
            return Err(BlkfsError::Io);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
}
