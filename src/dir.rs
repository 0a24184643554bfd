//! The root directory: fixed-size entries packed into the directory's
//! data blocks, and the path walk that resolves names against them.

use alloc::{string::String, vec, vec::Vec};

use crate::{
    common::{BlkfsError, BlkfsResult},
    disk::{BlockNo, BlockStore},
    fs_common::Blkfs,
    inode::{Inode, InodeHandle},
    BLOCK_SIZE, NAME_LEN, NULL_BLOCK, N_DIRECT,
};

/// Bytes per directory entry: name field plus inode number.
pub const DIRENT_SIZE: usize = 64;

pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_SIZE;

const _: () = assert!(NAME_LEN + 4 <= DIRENT_SIZE);

/// One name binding. An entry with `inum == 0` is free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; NAME_LEN],
    pub inum: BlockNo,
}

impl DirEntry {
    pub fn new(name: &str, inum: BlockNo) -> BlkfsResult<Self> {
        if name.len() > NAME_LEN {
            return Err(BlkfsError::NameTooLong);
        }
        let mut buf = [0u8; NAME_LEN];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { name: buf, inum })
    }

    pub fn decode(buf: &[u8]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&buf[..NAME_LEN]);
        Self {
            name,
            inum: u32!(&buf[NAME_LEN..NAME_LEN + 4]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..NAME_LEN].copy_from_slice(&self.name);
        buf[NAME_LEN..NAME_LEN + 4].copy_from_slice(&self.inum.to_le_bytes());
        buf[NAME_LEN + 4..DIRENT_SIZE].fill(0);
    }

    pub fn is_free(&self) -> bool {
        self.inum == NULL_BLOCK
    }

    /// Name bytes without the NUL padding.
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }
}

/// Location of a directory entry on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirentSlot {
    pub block: BlockNo,
    pub index: usize,
}

impl DirentSlot {
    fn range(&self) -> core::ops::Range<usize> {
        self.index * DIRENT_SIZE..(self.index + 1) * DIRENT_SIZE
    }
}

/// Result of resolving a path.
pub(crate) struct PathLookup {
    /// Directory holding the last component.
    pub dir: InodeHandle,
    /// Inode the path names, if it exists.
    pub ino: Option<BlockNo>,
    /// Entry binding the name; `None` for the root itself.
    pub slot: Option<DirentSlot>,
    pub name: String,
}

/// Split an absolute path into its single component. `None` means the root.
fn parse_path(path: &str) -> BlkfsResult<Option<&str>> {
    let rest = path.strip_prefix('/').ok_or(BlkfsError::InvalidArgument)?;
    if rest.is_empty() {
        return Ok(None);
    }
    // flat namespace
    if rest.contains('/') || rest.contains('\0') {
        return Err(BlkfsError::InvalidArgument);
    }
    if rest.len() > NAME_LEN {
        return Err(BlkfsError::NameTooLong);
    }
    Ok(Some(rest))
}

impl<S: BlockStore> Blkfs<S> {
    /// Resolve `path` against the root directory.
    pub(crate) fn walk_path(&self, path: &str) -> BlkfsResult<PathLookup> {
        let dir = self.root();
        let name = match parse_path(path)? {
            Some(name) => name,
            None => {
                return Ok(PathLookup {
                    dir,
                    ino: Some(dir.ino()),
                    slot: None,
                    name: String::new(),
                })
            }
        };
        let root = self.read_inode(dir)?;
        let found = self.find_entry(&root, name.as_bytes())?;
        Ok(PathLookup {
            dir,
            ino: found.as_ref().map(|(_, entry)| entry.inum),
            slot: found.map(|(slot, _)| slot),
            name: String::from(name),
        })
    }

    fn find_entry(&self, dir: &Inode, name: &[u8]) -> BlkfsResult<Option<(DirentSlot, DirEntry)>> {
        for filebno in 0..dir.size_blocks() {
            let bno = dir.block_slot(filebno)?;
            if bno == NULL_BLOCK {
                continue;
            }
            let blk = self.disk.block(bno)?;
            for index in 0..DIRENTS_PER_BLOCK {
                let slot = DirentSlot { block: bno, index };
                let entry = DirEntry::decode(&blk[slot.range()]);
                if !entry.is_free() && entry.name_bytes() == name {
                    return Ok(Some((slot, entry)));
                }
            }
        }
        Ok(None)
    }

    /// Find a free entry in `dir`, growing it by one zeroed block when all
    /// existing entries are taken. The directory inode is stored.
    pub(crate) fn alloc_dirent(&mut self, dir: &mut Inode) -> BlkfsResult<DirentSlot> {
        let nblocks = dir.size_blocks();
        for filebno in 0..nblocks {
            let bno = dir.block_slot(filebno)?;
            if bno == NULL_BLOCK {
                continue;
            }
            let blk = self.disk.block(bno)?;
            for index in 0..DIRENTS_PER_BLOCK {
                let slot = DirentSlot { block: bno, index };
                if DirEntry::decode(&blk[slot.range()]).is_free() {
                    return Ok(slot);
                }
            }
        }

        if nblocks >= N_DIRECT {
            return Err(BlkfsError::OutOfMemory);
        }
        let zero = vec![0u8; BLOCK_SIZE];
        let grown = self.inode_write(dir, &zero, (nblocks * BLOCK_SIZE) as u64);
        self.write_inode(dir)?;
        grown?;
        Ok(DirentSlot {
            block: dir.block_slot(nblocks)?,
            index: 0,
        })
    }

    pub(crate) fn set_dirent(&mut self, slot: DirentSlot, name: &str, inum: BlockNo) -> BlkfsResult<()> {
        let entry = DirEntry::new(name, inum)?;
        let blk = self.disk.block_mut(slot.block)?;
        entry.encode(&mut blk[slot.range()]);
        Ok(())
    }

    pub(crate) fn clear_dirent(&mut self, slot: DirentSlot) -> BlkfsResult<()> {
        let blk = self.disk.block_mut(slot.block)?;
        blk[slot.range()].fill(0);
        Ok(())
    }

    /// Every live entry of the root directory, in on-disk order.
    pub fn readdir(&self) -> BlkfsResult<Vec<(String, InodeHandle)>> {
        let root = self.read_inode(self.root())?;
        let mut entries = Vec::new();
        for filebno in 0..root.size_blocks() {
            let bno = root.block_slot(filebno)?;
            if bno == NULL_BLOCK {
                continue;
            }
            let blk = self.disk.block(bno)?;
            for index in 0..DIRENTS_PER_BLOCK {
                let entry = DirEntry::decode(&blk[index * DIRENT_SIZE..(index + 1) * DIRENT_SIZE]);
                if entry.is_free() {
                    continue;
                }
                let name = core::str::from_utf8(entry.name_bytes()).map_err(|_| BlkfsError::Corrupted)?;
                entries.push((String::from(name), self.handle(entry.inum)));
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disk::MemDisk, superblock::MkfsOptions};

    fn new_fs() -> Blkfs<MemDisk> {
        let opts = MkfsOptions {
            nblocks: 256,
            ..Default::default()
        };
        Blkfs::mkfs(&opts).expect("mkfs failed")
    }

    #[test]
    fn path_parsing() {
        assert_eq!(parse_path("/"), Ok(None));
        assert_eq!(parse_path("/a"), Ok(Some("a")));
        assert_eq!(parse_path(""), Err(BlkfsError::InvalidArgument));
        assert_eq!(parse_path("a"), Err(BlkfsError::InvalidArgument));
        assert_eq!(parse_path("/a/b"), Err(BlkfsError::InvalidArgument));
        let long = alloc::format!("/{}", "n".repeat(NAME_LEN + 1));
        assert_eq!(parse_path(&long), Err(BlkfsError::NameTooLong));
        let max = alloc::format!("/{}", "n".repeat(NAME_LEN));
        assert!(parse_path(&max).is_ok());
    }

    #[test]
    fn entry_layout() {
        let mut buf = [0xffu8; DIRENT_SIZE];
        DirEntry::new("name", 42).expect("entry").encode(&mut buf);
        let entry = DirEntry::decode(&buf);
        assert_eq!(entry.name_bytes(), b"name");
        assert_eq!(entry.inum, 42);
        assert!(!entry.is_free());
        assert!(DirEntry::decode(&[0u8; DIRENT_SIZE]).is_free());
    }

    #[test]
    fn entry_name_limit() {
        let max = "n".repeat(NAME_LEN);
        let entry = DirEntry::new(&max, 7).expect("entry");
        assert_eq!(entry.name_bytes(), max.as_bytes());

        let long = "n".repeat(NAME_LEN + 1);
        assert_eq!(DirEntry::new(&long, 7), Err(BlkfsError::NameTooLong));
    }

    #[test]
    fn directory_grows_a_block_at_a_time() {
        let mut fs = new_fs();
        for i in 0..DIRENTS_PER_BLOCK {
            fs.create(&alloc::format!("/f{}", i)).expect("create");
        }
        let root = fs.read_inode(fs.root()).expect("root");
        assert_eq!(root.size as usize, BLOCK_SIZE);
        assert_eq!(root.allocated_blocks(), 1);

        fs.create("/one-more").expect("create");
        let root = fs.read_inode(fs.root()).expect("root");
        assert_eq!(root.size as usize, 2 * BLOCK_SIZE);
        assert_eq!(root.allocated_blocks(), 2);
    }

    #[test]
    fn freed_entry_is_reused() {
        let mut fs = new_fs();
        fs.create("/a").expect("create");
        fs.create("/b").expect("create");
        fs.unlink("/a").expect("unlink");
        fs.create("/c").expect("create");

        let names: Vec<String> = fs.readdir().expect("readdir").into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["c", "b"]);
    }

    #[test]
    fn walk_path_reports_missing_name() {
        let fs = new_fs();
        let lookup = fs.walk_path("/missing").expect("walk");
        assert_eq!(lookup.ino, None);
        assert_eq!(lookup.name, "missing");
        assert_eq!(lookup.dir, fs.root());

        let root = fs.walk_path("/").expect("walk");
        assert_eq!(root.ino, Some(fs.root().ino()));
        assert!(root.slot.is_none());
    }
}
