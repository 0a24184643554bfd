#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use alloc::{format, sync::Arc, vec, vec::Vec};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use crate::{
        Blkfs, BlkfsError, BlockStore, InodeHandle, MemDisk, MkfsOptions, RamDevice, BLOCK_SIZE,
        DIRENTS_PER_BLOCK, MAX_FILE_SIZE, NULL_BLOCK, N_DIRECT,
    };

    fn new_fs(nblocks: u32) -> Blkfs<MemDisk> {
        let opts = MkfsOptions {
            nblocks,
            ..Default::default()
        };
        Blkfs::mkfs(&opts).expect("mkfs failed")
    }

    fn read_all(fs: &Blkfs<MemDisk>, h: InodeHandle) -> Vec<u8> {
        let size = fs.stat(h).expect("stat").size as usize;
        let mut buf = vec![0u8; size];
        assert_eq!(fs.read(h, &mut buf, 0), Ok(size));
        buf
    }

    /// Every live inode fits the direct map, owns allocated blocks only, and
    /// no block is owned twice.
    fn check_invariants(fs: &Blkfs<MemDisk>) {
        let mut inodes = vec![fs.root()];
        inodes.extend(fs.readdir().expect("readdir").into_iter().map(|(_, h)| h));

        let mut seen_inodes = HashSet::new();
        let mut owned = HashSet::new();
        for h in inodes {
            if !seen_inodes.insert(h.ino()) {
                // hard link to an inode already checked
                continue;
            }
            let inode = fs.read_inode(h).expect("inode");
            assert!(inode.nlink > 0);
            assert!(inode.size_blocks() <= N_DIRECT);
            assert!(owned.insert(inode.ino));
            for &bno in inode.direct.iter().filter(|&&b| b != NULL_BLOCK) {
                assert!(!fs.disk().is_free(bno), "inode {} owns free block {}", inode.ino, bno);
                assert!(owned.insert(bno), "block {} owned twice", bno);
            }
        }
    }

    #[test]
    fn test_hello_round_trip() {
        let mut fs = new_fs(128);
        let h = fs.create("/a").expect("create");
        assert_eq!(fs.write(h, b"hello", 0), Ok(5));

        let mut buf = [0u8; 5];
        assert_eq!(fs.read(h, &mut buf, 0), Ok(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.stat(h).expect("stat").size, 5);
        check_invariants(&fs);
    }

    #[test]
    fn test_sparse_write_touches_one_block() {
        let mut fs = new_fs(128);
        let h = fs.create("/a").expect("create");
        assert_eq!(fs.write(h, b"X", 5000), Ok(1));

        let attr = fs.stat(h).expect("stat");
        assert_eq!(attr.size, 5001);
        assert_eq!(attr.fs_blocks(), 1);
        let inode = fs.read_inode(h).expect("inode");
        assert_ne!(inode.direct[5000 / BLOCK_SIZE], NULL_BLOCK);
        assert_eq!(inode.allocated_blocks(), 1);

        let data = read_all(&fs, h);
        assert!(data[..5000].iter().all(|&b| b == 0));
        assert_eq!(data[5000], b'X');
        check_invariants(&fs);
    }

    #[test]
    fn test_sparse_read_allocates_nothing() {
        let mut fs = new_fs(128);
        let h = fs.create("/a").expect("create");
        fs.set_size(h, 4 * BLOCK_SIZE as u64).expect("grow");
        let free = fs.statfs().f_bfree;

        let mut buf = vec![0xffu8; 4 * BLOCK_SIZE];
        assert_eq!(fs.read(h, &mut buf, 0), Ok(buf.len()));
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(fs.stat(h).expect("stat").blocks, 0);
        assert_eq!(fs.statfs().f_bfree, free);
    }

    #[test]
    fn test_shrink_then_grow_reads_zero() {
        let mut fs = new_fs(128);
        let h = fs.create("/a").expect("create");
        let data = vec![0x5au8; 3 * BLOCK_SIZE];
        fs.write(h, &data, 0).expect("write");

        let x = BLOCK_SIZE + 100;
        let y = 3 * BLOCK_SIZE;
        fs.set_size(h, x as u64).expect("shrink");
        fs.set_size(h, y as u64).expect("grow");

        let back = read_all(&fs, h);
        assert_eq!(back.len(), y);
        assert!(back[..x].iter().all(|&b| b == 0x5a));
        assert!(back[x..].iter().all(|&b| b == 0));
        assert_eq!(fs.stat(h).expect("stat").fs_blocks(), 2);
        check_invariants(&fs);
    }

    #[test]
    fn test_unlink_reclaims_everything() {
        let mut fs = new_fs(128);
        let before = fs.statfs().f_bfree;
        let h = fs.create("/a").expect("create");
        let after_create = fs.statfs().f_bfree;
        fs.write(h, &vec![9u8; 5 * BLOCK_SIZE], 0).expect("write");
        let blocks = fs.read_inode(h).expect("inode").direct;

        fs.unlink("/a").expect("unlink");
        for &bno in blocks.iter().filter(|&&b| b != NULL_BLOCK) {
            assert!(fs.disk().is_free(bno));
        }
        assert!(fs.disk().is_free(h.ino()));
        // the directory block stays with the root
        assert_eq!(fs.statfs().f_bfree, after_create + 1);
        assert!(fs.statfs().f_bfree < before);

        let h2 = fs.create("/a").expect("recreate");
        assert_eq!(fs.stat(h2).expect("stat").size, 0);
        fs.set_size(h2, 5 * BLOCK_SIZE as u64).expect("grow");
        assert!(read_all(&fs, h2).iter().all(|&b| b == 0));
        check_invariants(&fs);
    }

    #[test]
    fn test_link_keeps_data_alive() {
        let mut fs = new_fs(128);
        let h = fs.create("/a").expect("create");
        fs.write(h, b"shared bytes", 0).expect("write");
        fs.link("/a", "/b").expect("link");
        assert_eq!(fs.stat(h).expect("stat").nlink, 2);
        check_invariants(&fs);

        fs.unlink("/a").expect("unlink");
        let b = fs.open("/b").expect("open");
        assert_eq!(b, h);
        let mut buf = [0u8; 12];
        assert_eq!(fs.read(b, &mut buf, 0), Ok(12));
        assert_eq!(&buf, b"shared bytes");
        assert_eq!(fs.stat(b).expect("stat").nlink, 1);
        check_invariants(&fs);
    }

    #[test]
    fn test_unlink_nonexistent() {
        let mut fs = new_fs(128);
        assert_eq!(fs.unlink("/nonexistent"), Err(BlkfsError::NotFound));
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut fs = new_fs(128);
        let old = fs.create("/a").expect("create");
        fs.unlink("/a").expect("unlink");
        let new = fs.create("/b").expect("create");
        // first-fit hands the freed inode block straight back
        assert_eq!(new.ino(), old.ino());
        assert_ne!(new, old);

        let mut buf = [0u8; 1];
        assert_eq!(fs.read(old, &mut buf, 0), Err(BlkfsError::StaleHandle));
        assert_eq!(fs.write(old, b"x", 0), Err(BlkfsError::StaleHandle));
        assert_eq!(fs.write(new, b"x", 0), Ok(1));
    }

    #[test]
    fn test_full_directory() {
        let entries = N_DIRECT * DIRENTS_PER_BLOCK;
        let mut fs = new_fs((entries + N_DIRECT + 16) as u32);
        for i in 0..entries {
            fs.create(&format!("/{}", i)).expect("create");
        }
        assert_eq!(fs.create("/extra"), Err(BlkfsError::OutOfMemory));
        assert_eq!(fs.link("/0", "/extra"), Err(BlkfsError::OutOfMemory));
        assert_eq!(fs.stat(fs.open("/0").expect("open")).expect("stat").nlink, 1);

        fs.unlink("/7").expect("unlink");
        fs.link("/0", "/extra").expect("link into freed entry");
        assert_eq!(fs.readdir().expect("readdir").len(), entries);
    }

    #[test]
    fn test_out_of_space() {
        let mut fs = new_fs(8);
        let mut created = 0;
        let err = loop {
            match fs.create(&format!("/f{}", created)) {
                Ok(_) => created += 1,
                Err(e) => break e,
            }
        };
        assert_eq!(err, BlkfsError::NoSpace);
        assert!(created > 0);
        assert_eq!(fs.statfs().f_bfree, 0);
        check_invariants(&fs);
    }

    #[test]
    fn test_statfs() {
        let fs = new_fs(128);
        let st = fs.statfs();
        assert_eq!(st.f_blocks, 128);
        assert_eq!(st.f_bsize as usize, BLOCK_SIZE);
        // null block, superblock, one bitmap block, root inode
        assert_eq!(st.f_bfree, 128 - 4);
    }

    #[test]
    fn test_flush_survives_remount() {
        let dev = Arc::new(RamDevice::new(128 * BLOCK_SIZE));
        let disk = MemDisk::create(dev.clone()).expect("create disk");
        let mut fs = Blkfs::format(disk, &MkfsOptions::default()).expect("format");
        let h = fs.create("/persist").expect("create");
        fs.write(h, b"durable", 2 * BLOCK_SIZE as u64).expect("write");
        fs.flush(h).expect("flush");
        fs.sync().expect("sync");
        drop(fs);

        let fs = Blkfs::mount(MemDisk::open(dev).expect("open disk")).expect("mount");
        let h = fs.open("/persist").expect("open");
        let attr = fs.stat(h).expect("stat");
        assert_eq!(attr.size, 2 * BLOCK_SIZE as u64 + 7);
        assert_eq!(attr.fs_blocks(), 1);
        let mut buf = [0u8; 7];
        assert_eq!(fs.read(h, &mut buf, 2 * BLOCK_SIZE as u64), Ok(7));
        assert_eq!(&buf, b"durable");
    }

    #[test]
    fn test_created_file_survives_remount() {
        let dev = Arc::new(RamDevice::new(128 * BLOCK_SIZE));
        let disk = MemDisk::create(dev.clone()).expect("create disk");
        let mut fs = Blkfs::format(disk, &MkfsOptions::default()).expect("format");
        fs.create("/a").expect("create");
        drop(fs);

        let mut fs = Blkfs::mount(MemDisk::open(dev.clone()).expect("open disk")).expect("mount");
        let attr = fs.stat(fs.open("/a").expect("open")).expect("stat");
        assert_eq!(attr.nlink, 1);
        assert!(attr.perm().is_file());
        fs.sync().expect("sync");
        drop(fs);

        let mut fs = Blkfs::mount(MemDisk::open(dev).expect("open disk")).expect("mount");
        assert_eq!(fs.stat(fs.open("/a").expect("open")).expect("stat").nlink, 1);
        assert_eq!(fs.unlink("/a"), Ok(()));
        assert_eq!(fs.open("/a"), Err(BlkfsError::NotFound));
        check_invariants(&fs);
    }

    #[test]
    fn test_sync_writes_unflushed_data() {
        let dev = Arc::new(RamDevice::new(128 * BLOCK_SIZE));
        let disk = MemDisk::create(dev.clone()).expect("create disk");
        let mut fs = Blkfs::format(disk, &MkfsOptions::default()).expect("format");
        let h = fs.create("/a").expect("create");
        fs.write(h, b"no explicit flush", 0).expect("write");
        fs.sync().expect("sync");
        drop(fs);

        let fs = Blkfs::mount(MemDisk::open(dev).expect("open disk")).expect("mount");
        let h = fs.open("/a").expect("open");
        let mut buf = [0u8; 17];
        assert_eq!(fs.read(h, &mut buf, 0), Ok(17));
        assert_eq!(&buf, b"no explicit flush");
    }

    #[test]
    fn test_mount_blank_device_fails() {
        let dev = Arc::new(RamDevice::new(64 * BLOCK_SIZE));
        let disk = MemDisk::open(dev).expect("open disk");
        assert_eq!(Blkfs::mount(disk).err(), Some(BlkfsError::Corrupted));
    }

    #[test]
    fn test_random_ops_match_model() {
        let mut rng = StdRng::seed_from_u64(0x626c_6b66);
        let mut fs = new_fs(256);
        let h = fs.create("/model").expect("create");
        let mut model: Vec<u8> = Vec::new();

        for _ in 0..300 {
            if rng.gen_bool(0.75) {
                let len = rng.gen_range(1..=2 * BLOCK_SIZE);
                let offset = rng.gen_range(0..=MAX_FILE_SIZE as usize - len);
                let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                assert_eq!(fs.write(h, &data, offset as u64), Ok(len));
                if model.len() < offset + len {
                    model.resize(offset + len, 0);
                }
                model[offset..offset + len].copy_from_slice(&data);
            } else {
                let size = rng.gen_range(0..=MAX_FILE_SIZE as usize);
                fs.set_size(h, size as u64).expect("set_size");
                model.resize(size, 0);
            }

            assert_eq!(fs.stat(h).expect("stat").size as usize, model.len());
            let inode = fs.read_inode(h).expect("inode");
            for (i, &bno) in inode.direct.iter().enumerate() {
                if i * BLOCK_SIZE >= model.len() {
                    assert_eq!(bno, NULL_BLOCK, "block {} kept past end of file", i);
                }
            }
        }
        assert_eq!(read_all(&fs, h), model);
        check_invariants(&fs);
    }
}
