//! The filesystem context: format, mount, statfs and sync.
//!
//! [`Blkfs`] owns the block store and remembers the root directory. Every
//! inode operation is a method on it, spread across the `inode`, `file`,
//! `dir`, `link` and `attr` modules.

use log::info;

use crate::{
    common::{BlkfsError, BlkfsFsStat, BlkfsPermission, BlkfsResult, BlkfsTimeSpec},
    disk::{BlockNo, BlockStore, MemDisk},
    inode::{Inode, InodeHandle},
    superblock::{MkfsOptions, Superblock},
    SUPER_BLOCK,
};

pub struct Blkfs<S: BlockStore> {
    pub(crate) disk: S,
    root: BlockNo,
    /// Owner of newly created files.
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    clock: fn() -> BlkfsTimeSpec,
}

impl Blkfs<MemDisk> {
    /// Format a fresh in-memory image of `opts.nblocks` blocks.
    pub fn mkfs(opts: &MkfsOptions) -> BlkfsResult<Self> {
        Self::format(MemDisk::new(opts.nblocks)?, opts)
    }
}

impl<S: BlockStore> Blkfs<S> {
    /// Write a superblock and an empty root directory to `disk`.
    pub fn format(mut disk: S, opts: &MkfsOptions) -> BlkfsResult<Self> {
        let root = disk.alloc_block()?;
        disk.block_mut(root)?.fill(0);

        let mut inode = Inode::empty(root);
        inode.nlink = 1;
        inode.mode = (BlkfsPermission::S_IFDIR | BlkfsPermission::from_bits_truncate(opts.root_mode & 0o7777)).bits();
        inode.owner = opts.uid;
        inode.group = opts.gid;
        inode.encode(disk.block_mut(root)?);

        let sb = Superblock::new(disk.nblocks(), root);
        sb.encode(disk.block_mut(SUPER_BLOCK)?);
        disk.flush_block(root)?;
        disk.flush_block(SUPER_BLOCK)?;
        info!("blkfs: formatted {} blocks, root inode {}", sb.nblocks, root);

        Ok(Self {
            disk,
            root,
            uid: opts.uid,
            gid: opts.gid,
            clock: BlkfsTimeSpec::default,
        })
    }

    /// Attach to a formatted store.
    pub fn mount(disk: S) -> BlkfsResult<Self> {
        let sb = Superblock::decode(disk.block(SUPER_BLOCK)?);
        sb.validate(disk.nblocks())?;
        let root = disk
            .block(sb.root)
            .map(|buf| Inode::decode(sb.root, buf))
            .map_err(|_| BlkfsError::Corrupted)?;
        if !root.perm().is_dir() || root.nlink == 0 {
            return Err(BlkfsError::Corrupted);
        }
        info!("blkfs: mounted {} blocks, root inode {}", sb.nblocks, sb.root);
        Ok(Self {
            disk,
            root: sb.root,
            uid: root.owner,
            gid: root.group,
            clock: BlkfsTimeSpec::default,
        })
    }

    pub fn root(&self) -> InodeHandle {
        self.handle(self.root)
    }

    /// Time source for inode timestamps; the zero time by default.
    pub fn set_clock(&mut self, clock: fn() -> BlkfsTimeSpec) {
        self.clock = clock;
    }

    pub(crate) fn now(&self) -> BlkfsTimeSpec {
        (self.clock)()
    }

    pub fn statfs(&self) -> BlkfsFsStat {
        BlkfsFsStat::new(self.disk.nblocks(), self.disk.free_count())
    }

    /// Flush the root directory, the superblock and then every other
    /// dirty block in the store.
    pub fn sync(&mut self) -> BlkfsResult<()> {
        let root = self.read_inode(self.root())?;
        self.inode_flush(&root)?;
        self.disk.flush_block(SUPER_BLOCK)?;
        self.disk.sync_all()
    }

    pub fn disk(&self) -> &S {
        &self.disk
    }
}
