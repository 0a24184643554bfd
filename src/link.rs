//! Name bindings and link counts: create, open, link and unlink.

use log::debug;

use crate::{
    common::{BlkfsError, BlkfsPermission, BlkfsResult},
    disk::BlockStore,
    fs_common::Blkfs,
    inode::{Inode, InodeHandle},
};

impl<S: BlockStore> Blkfs<S> {
    /// Create an empty regular file at `path` with one link.
    pub fn create(&mut self, path: &str) -> BlkfsResult<InodeHandle> {
        let lookup = self.walk_path(path)?;
        if lookup.ino.is_some() {
            return Err(BlkfsError::AlreadyExists);
        }
        let mut dir = self.read_inode(lookup.dir)?;
        let slot = self.alloc_dirent(&mut dir)?;

        let bno = self.disk.alloc_block()?;
        self.disk.block_mut(bno)?.fill(0);
        let now = self.now();
        let mut inode = Inode::empty(bno);
        inode.nlink = 1;
        inode.mode = (BlkfsPermission::S_IFREG | BlkfsPermission::from_bits_truncate(0o644)).bits();
        inode.owner = self.uid;
        inode.group = self.gid;
        inode.atime = now;
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode(&inode)?;
        // the inode reaches the device before the entry naming it
        self.disk.flush_block(bno)?;

        self.set_dirent(slot, &lookup.name, bno)?;
        self.inode_flush(&dir)?;
        debug!("blkfs: created {} as inode {}", path, bno);
        Ok(self.handle(bno))
    }

    pub fn open(&self, path: &str) -> BlkfsResult<InodeHandle> {
        let lookup = self.walk_path(path)?;
        lookup
            .ino
            .map(|bno| self.handle(bno))
            .ok_or(BlkfsError::NotFound)
    }

    /// Bind `dstpath` to the inode at `srcpath` and bump its link count.
    pub fn link(&mut self, srcpath: &str, dstpath: &str) -> BlkfsResult<()> {
        if srcpath.is_empty() || dstpath.is_empty() {
            return Err(BlkfsError::InvalidArgument);
        }
        let dst = self.walk_path(dstpath)?;
        if dst.ino.is_some() {
            return Err(BlkfsError::AlreadyExists);
        }
        let src = self.walk_path(srcpath)?;
        let ino = src.ino.ok_or(BlkfsError::NotFound)?;
        // the root directory is not a link target
        if src.slot.is_none() {
            return Err(BlkfsError::InvalidArgument);
        }

        let mut dir = self.read_inode(dst.dir)?;
        let slot = self.alloc_dirent(&mut dir)?;

        let mut inode = self.load_inode(ino)?;
        inode.nlink += 1;
        inode.ctime = self.now();
        self.write_inode(&inode)?;
        self.set_dirent(slot, &dst.name, ino)?;

        self.disk.flush_block(ino)?;
        self.inode_flush(&dir)?;
        debug!("blkfs: link {} -> inode {}, nlink {}", dstpath, ino, inode.nlink);
        Ok(())
    }

    /// Remove the entry at `path`; the inode and its blocks are freed with
    /// its last link.
    pub fn unlink(&mut self, path: &str) -> BlkfsResult<()> {
        if path.is_empty() {
            return Err(BlkfsError::InvalidArgument);
        }
        let lookup = self.walk_path(path)?;
        let (ino, slot) = match (lookup.ino, lookup.slot) {
            (Some(ino), Some(slot)) => (ino, slot),
            // the root has no entry to remove
            (Some(_), None) => return Err(BlkfsError::InvalidArgument),
            (None, _) => return Err(BlkfsError::NotFound),
        };

        let mut inode = self.load_inode(ino)?;
        inode.nlink = inode.nlink.checked_sub(1).ok_or(BlkfsError::Corrupted)?;
        inode.ctime = self.now();
        self.clear_dirent(slot)?;

        if inode.nlink == 0 {
            self.free_inode(inode)?;
        } else {
            self.write_inode(&inode)?;
            self.disk.flush_block(ino)?;
            debug!("blkfs: unlink {}, inode {} nlink {}", path, ino, inode.nlink);
        }

        let dir = self.read_inode(lookup.dir)?;
        self.inode_flush(&dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{disk::MemDisk, superblock::MkfsOptions};

    fn new_fs() -> Blkfs<MemDisk> {
        let opts = MkfsOptions {
            nblocks: 256,
            uid: 1000,
            gid: 100,
            ..Default::default()
        };
        Blkfs::mkfs(&opts).expect("mkfs failed")
    }

    #[test]
    fn create_sets_up_regular_file() {
        let mut fs = new_fs();
        let h = fs.create("/a").expect("create");
        let inode = fs.read_inode(h).expect("inode");
        assert_eq!(inode.nlink, 1);
        assert_eq!(inode.size, 0);
        assert!(inode.perm().is_file());
        assert_eq!(inode.owner, 1000);
        assert_eq!(inode.group, 100);
        assert_eq!(fs.open("/a"), Ok(h));
    }

    #[test]
    fn create_existing_fails() {
        let mut fs = new_fs();
        fs.create("/a").expect("create");
        assert_eq!(fs.create("/a"), Err(BlkfsError::AlreadyExists));
        assert_eq!(fs.create("/"), Err(BlkfsError::AlreadyExists));
        assert_eq!(fs.create(""), Err(BlkfsError::InvalidArgument));
    }

    #[test]
    fn open_missing() {
        let fs = new_fs();
        assert_eq!(fs.open("/nope"), Err(BlkfsError::NotFound));
        assert_eq!(fs.open("/"), Ok(fs.root()));
    }

    #[test]
    fn link_errors() {
        let mut fs = new_fs();
        fs.create("/a").expect("create");
        fs.create("/b").expect("create");
        assert_eq!(fs.link("", "/c"), Err(BlkfsError::InvalidArgument));
        assert_eq!(fs.link("/a", ""), Err(BlkfsError::InvalidArgument));
        assert_eq!(fs.link("/missing", "/c"), Err(BlkfsError::NotFound));
        assert_eq!(fs.link("/a", "/b"), Err(BlkfsError::AlreadyExists));
        assert_eq!(fs.link("/", "/c"), Err(BlkfsError::InvalidArgument));
        // collision wins over a missing source
        assert_eq!(fs.link("/missing", "/a"), Err(BlkfsError::AlreadyExists));
    }

    #[test]
    fn link_and_unlink_count() {
        let mut fs = new_fs();
        let h = fs.create("/a").expect("create");
        fs.link("/a", "/b").expect("link");
        assert_eq!(fs.read_inode(h).expect("inode").nlink, 2);
        assert_eq!(fs.open("/b"), Ok(h));

        fs.unlink("/a").expect("unlink");
        assert_eq!(fs.read_inode(h).expect("inode").nlink, 1);
        assert_eq!(fs.open("/a"), Err(BlkfsError::NotFound));

        fs.unlink("/b").expect("unlink");
        assert_eq!(fs.read_inode(h).err(), Some(BlkfsError::StaleHandle));
        assert!(fs.disk.is_free(h.ino()));
    }

    #[test]
    fn unlink_errors() {
        let mut fs = new_fs();
        assert_eq!(fs.unlink(""), Err(BlkfsError::InvalidArgument));
        assert_eq!(fs.unlink("/"), Err(BlkfsError::InvalidArgument));
        assert_eq!(fs.unlink("/nonexistent"), Err(BlkfsError::NotFound));
    }

    #[test]
    #[should_panic(expected = "live links")]
    fn freeing_linked_inode_panics() {
        let mut fs = new_fs();
        let h = fs.create("/a").expect("create");
        let inode = fs.read_inode(h).expect("inode");
        let _ = fs.free_inode(inode);
    }
}
