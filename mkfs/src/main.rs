// Build an initial file system image for the kernel.
//
// The image holds a root directory (inode 1) with `.` and `..`, three
// empty subdirectories bin/home/tmp, any --files appended under the
// root, and any --bins appended under /bin. Everything is owned by
// root (uid 0, gid 0) with a full 7/7/7 mask so early boot can read
// and exec before switching identities. Block and inode numbers are
// handed out sequentially; the bitmap is written last.

use clap::Parser;
use std::fs::File;
use std::io::{Result, Write};
use std::path::Path;

mod fsdef;

use fsdef::*;

const ROOT_UID: u32 = 0;
const ROOT_GID: u32 = 0;
const FULL_MASK: (u8, u8, u8) = (7, 7, 7);

#[derive(Parser, Debug)]
struct Args {
    /// Name of the output img file
    #[arg(short, long)]
    output_name: String,

    /// Files appended under the root directory
    #[arg(short, long)]
    files: Vec<String>,

    /// Executables appended under /bin (a leading _ is stripped)
    #[arg(short, long)]
    bins: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut img = FsImage::new();

    let rootino = img.build_skeleton();
    assert_eq!(rootino, ROOTINO);

    for file_name in &args.files {
        let data = std::fs::read(file_name)?;
        img.add_file(rootino, &short_name(file_name), &data);
    }

    let binino = img.lookup(rootino, "bin").expect("no /bin").inum as u32;
    for file_name in &args.bins {
        let data = std::fs::read(file_name)?;
        img.add_file(binino, &short_name(file_name), &data);
    }

    img.finish();

    let mut out = File::create(&args.output_name)?;
    out.write_all(&img.bytes())?;

    println!(
        "nmeta {} (boot, super, log blocks {} inode blocks {}, bitmap blocks {}) blocks {} total {}",
        NMETA, NLOG, NINODEBLOCKS, NBITMAP, NBLOCKS, FSSIZE
    );
    println!("balloc: first {} blocks have been allocated", img.freeblock);

    Ok(())
}

/// basename, with the `_cat`-style prefix used to keep host builds
/// from shadowing system binaries stripped off.
fn short_name(path: &str) -> String {
    let base = Path::new(path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    match base.strip_prefix('_') {
        Some(s) => s.to_string(),
        None => base,
    }
}

struct FsImage {
    sectors: Vec<[u8; BSIZE]>,
    freeinode: u32,
    freeblock: u32,
}

impl FsImage {
    fn new() -> FsImage {
        FsImage {
            sectors: vec![[0u8; BSIZE]; FSSIZE as usize],
            freeinode: 1,
            // the first free block that we can allocate
            freeblock: NMETA,
        }
    }

    /// Superblock, root directory and the standard subdirectories.
    /// Returns the root inode number.
    fn build_skeleton(&mut self) -> u32 {
        let mut sb_sect = [0u8; BSIZE];
        sb_sect[..32].copy_from_slice(&SB.encode());
        self.wsect(1, &sb_sect);

        let rootino = self.ialloc(T_DIR);
        self.append_dirent(rootino, rootino, ".");
        self.append_dirent(rootino, rootino, "..");

        for name in ["bin", "home", "tmp"] {
            let ino = self.ialloc(T_DIR);
            self.append_dirent(ino, ino, ".");
            self.append_dirent(ino, rootino, "..");
            self.append_dirent(rootino, ino, name);

            // one link from the parent entry, one from "."
            let mut din = self.rinode(ino);
            din.nlink = 2;
            self.winode(ino, &din);

            // and ".." adds one to the parent
            let mut root = self.rinode(rootino);
            root.nlink += 1;
            self.winode(rootino, &root);
        }

        rootino
    }

    /// Append a regular file to the directory dirino.
    fn add_file(&mut self, dirino: u32, name: &str, data: &[u8]) {
        let inum = self.ialloc(T_FILE);
        self.append_dirent(dirino, inum, name);
        self.iappend(inum, data);
    }

    /// Round the root directory size up to a block and write the
    /// bitmap; the image is complete afterwards.
    fn finish(&mut self) {
        let mut root = self.rinode(ROOTINO);
        let rounded = (root.size as usize).div_ceil(BSIZE) * BSIZE;
        root.size = rounded as u32;
        self.winode(ROOTINO, &root);

        self.balloc();
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FSSIZE as usize * BSIZE);
        for s in &self.sectors {
            out.extend_from_slice(s);
        }
        out
    }

    fn wsect(&mut self, sec: u32, buf: &[u8; BSIZE]) {
        self.sectors[sec as usize] = *buf;
    }

    fn rsect(&self, sec: u32) -> [u8; BSIZE] {
        self.sectors[sec as usize]
    }

    fn winode(&mut self, inum: u32, din: &DInode) {
        let bn = iblock(inum);
        let mut buf = self.rsect(bn);
        let off = DINODE_SIZE * (inum % IPB) as usize;
        buf[off..off + DINODE_SIZE].copy_from_slice(&din.encode());
        self.wsect(bn, &buf);
    }

    fn rinode(&self, inum: u32) -> DInode {
        let bn = iblock(inum);
        let buf = self.rsect(bn);
        let off = DINODE_SIZE * (inum % IPB) as usize;
        DInode::decode(&buf[off..off + DINODE_SIZE])
    }

    fn ialloc(&mut self, file_type: i16) -> u32 {
        let inum = self.freeinode;
        self.freeinode += 1;

        let din = DInode {
            file_type,
            nlink: 1,
            uid: ROOT_UID,
            gid: ROOT_GID,
            mask_user: FULL_MASK.0,
            mask_group: FULL_MASK.1,
            mask_other: FULL_MASK.2,
            ..DInode::default()
        };
        self.winode(inum, &din);
        inum
    }

    fn append_dirent(&mut self, dirino: u32, target: u32, name: &str) {
        let t = self.rinode(target);
        let de = Dirent::new(
            target as u16,
            t.uid,
            t.gid,
            (t.mask_user, t.mask_group, t.mask_other),
            name,
        );
        self.iappend(dirino, &de.encode());
    }

    /// Append data to inode inum, allocating data blocks through the
    /// direct slots and the single indirect block.
    fn iappend(&mut self, inum: u32, data: &[u8]) {
        let mut din = self.rinode(inum);
        let mut off = din.size as usize;
        let mut remaining = data;

        while !remaining.is_empty() {
            let fbn = off / BSIZE;
            assert!(fbn < MAXFILE);

            let block = if fbn < NDIRECT {
                if din.addrs[fbn] == 0 {
                    din.addrs[fbn] = self.freeblock;
                    self.freeblock += 1;
                }
                din.addrs[fbn]
            } else {
                if din.addrs[NDIRECT] == 0 {
                    din.addrs[NDIRECT] = self.freeblock;
                    self.freeblock += 1;
                }
                let ind = din.addrs[NDIRECT];
                let mut ibuf = self.rsect(ind);
                let slot = fbn - NDIRECT;
                let mut addr = u32::from_le_bytes(ibuf[slot * 4..slot * 4 + 4].try_into().unwrap());
                if addr == 0 {
                    addr = self.freeblock;
                    self.freeblock += 1;
                    ibuf[slot * 4..slot * 4 + 4].copy_from_slice(&addr.to_le_bytes());
                    self.wsect(ind, &ibuf);
                }
                addr
            };

            let boff = off % BSIZE;
            let n = remaining.len().min(BSIZE - boff);
            let mut buf = self.rsect(block);
            buf[boff..boff + n].copy_from_slice(&remaining[..n]);
            self.wsect(block, &buf);

            off += n;
            remaining = &remaining[n..];
        }

        din.size = off as u32;
        self.winode(inum, &din);
    }

    /// Mark every block below freeblock used in the free bitmap.
    fn balloc(&mut self) {
        let used = self.freeblock;
        assert!(used < BPB);
        let mut buf = [0u8; BSIZE];
        for b in 0..used as usize {
            buf[b / 8] |= 1 << (b % 8);
        }
        self.wsect(SB.bmapstart, &buf);
    }

    /// Find name in directory dirino.
    fn lookup(&self, dirino: u32, name: &str) -> Option<Dirent> {
        let want = Dirent::new(0, 0, 0, (0, 0, 0), name).name;
        for de in self.dir_entries(dirino) {
            if de.inum != 0 && de.name == want {
                return Some(de);
            }
        }
        None
    }

    fn dir_entries(&self, dirino: u32) -> Vec<Dirent> {
        let din = self.rinode(dirino);
        let data = self.read_file(dirino);
        let mut out = Vec::new();
        let count = din.size as usize / DIRENT_SIZE;
        for i in 0..count {
            let off = i * DIRENT_SIZE;
            if off + DIRENT_SIZE <= data.len() {
                out.push(Dirent::decode(&data[off..off + DIRENT_SIZE]));
            }
        }
        out
    }

    /// Read an inode's whole contents back out of the image.
    fn read_file(&self, inum: u32) -> Vec<u8> {
        let din = self.rinode(inum);
        let mut out = Vec::new();
        let mut remaining = din.size as usize;
        let mut fbn = 0;
        while remaining > 0 {
            let block = if fbn < NDIRECT {
                din.addrs[fbn]
            } else {
                let ibuf = self.rsect(din.addrs[NDIRECT]);
                let slot = fbn - NDIRECT;
                u32::from_le_bytes(ibuf[slot * 4..slot * 4 + 4].try_into().unwrap())
            };
            let n = remaining.min(BSIZE);
            if block == 0 {
                out.extend(std::iter::repeat(0u8).take(n));
            } else {
                out.extend_from_slice(&self.rsect(block)[..n]);
            }
            remaining -= n;
            fbn += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_arithmetic() {
        // [ boot | sb | log | inodes | bitmap | data ]
        assert_eq!(SB.logstart, 2);
        assert_eq!(SB.inodestart, 2 + LOGSIZE);
        assert_eq!(SB.bmapstart, 2 + LOGSIZE + NINODEBLOCKS);
        assert_eq!(NMETA + NBLOCKS, FSSIZE);
        // every inode slot must fit inside its block
        assert!(DINODE_SIZE * IPB as usize <= BSIZE);
        // dirents pack the block exactly
        assert_eq!(BSIZE % DIRENT_SIZE, 0);
    }

    #[test]
    fn superblock_round_trip() {
        let enc = SB.encode();
        assert_eq!(u32::from_le_bytes(enc[0..4].try_into().unwrap()), FSMAGIC);
        assert_eq!(SuperBlock::decode(&enc), SB);
    }

    #[test]
    fn dinode_field_offsets() {
        let din = DInode {
            file_type: T_FILE,
            major: 3,
            minor: 4,
            nlink: 2,
            size: 0x11223344,
            uid: 1000,
            gid: 2000,
            mask_user: 7,
            mask_group: 5,
            mask_other: 0,
            addrs: [9; NDIRECT + 1],
        };
        let enc = din.encode();
        assert_eq!(i16::from_le_bytes(enc[0..2].try_into().unwrap()), T_FILE);
        assert_eq!(u32::from_le_bytes(enc[8..12].try_into().unwrap()), 0x11223344);
        assert_eq!(u32::from_le_bytes(enc[12..16].try_into().unwrap()), 1000);
        assert_eq!(u32::from_le_bytes(enc[16..20].try_into().unwrap()), 2000);
        assert_eq!(enc[20..23], [7, 5, 0]);
        // addrs start after the padded mask bytes
        assert_eq!(u32::from_le_bytes(enc[24..28].try_into().unwrap()), 9);

        let back = DInode::decode(&enc);
        assert_eq!(back.uid, 1000);
        assert_eq!(back.addrs, [9; NDIRECT + 1]);
    }

    #[test]
    fn dirent_encoding() {
        let de = Dirent::new(7, 1000, 1000, (7, 5, 0), "README.md");
        let enc = de.encode();
        assert_eq!(u16::from_le_bytes(enc[0..2].try_into().unwrap()), 7);
        assert_eq!(&enc[15..24], b"README.md");
        assert_eq!(Dirent::decode(&enc), de);
    }

    #[test]
    fn dirent_name_truncates_without_nul() {
        let de = Dirent::new(1, 0, 0, (7, 7, 7), "a-very-long-file-name");
        // exactly DIRSIZ bytes survive, no terminator required
        assert_eq!(&de.name[..], b"a-very-long-fi");
    }

    #[test]
    fn skeleton_has_root_and_standard_dirs() {
        let mut img = FsImage::new();
        let root = img.build_skeleton();
        img.finish();

        assert_eq!(root, ROOTINO);
        let din = img.rinode(ROOTINO);
        assert_eq!(din.file_type, T_DIR);
        // "." and ".." plus one link per subdirectory's ".."
        assert_eq!(din.nlink, 4);
        assert_eq!(din.size as usize % BSIZE, 0);

        for name in [".", "..", "bin", "home", "tmp"] {
            assert!(img.lookup(root, name).is_some(), "missing {}", name);
        }

        let bin = img.lookup(root, "bin").unwrap();
        let bin_inode = img.rinode(bin.inum as u32);
        assert_eq!(bin_inode.file_type, T_DIR);
        assert_eq!(bin_inode.nlink, 2);
        assert_eq!(bin.uid, ROOT_UID);
        assert_eq!((bin.mask_user, bin.mask_group, bin.mask_other), FULL_MASK);
    }

    #[test]
    fn appended_file_round_trips() {
        let mut img = FsImage::new();
        let root = img.build_skeleton();
        img.add_file(root, "README.md", b"hello");
        img.finish();

        let de = img.lookup(root, "README.md").unwrap();
        let din = img.rinode(de.inum as u32);
        assert_eq!(din.file_type, T_FILE);
        assert_eq!(din.size, 5);
        assert_eq!(img.read_file(de.inum as u32), b"hello");
    }

    #[test]
    fn binaries_land_in_bin() {
        let mut img = FsImage::new();
        let root = img.build_skeleton();
        let bin = img.lookup(root, "bin").unwrap().inum as u32;
        img.add_file(bin, &short_name("user/_cat"), &[0x7f, b'E', b'L', b'F']);
        img.finish();

        assert!(img.lookup(root, "cat").is_none());
        let de = img.lookup(bin, "cat").unwrap();
        assert_eq!(img.read_file(de.inum as u32), [0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn large_file_spills_into_indirect_block() {
        let mut img = FsImage::new();
        let root = img.build_skeleton();
        let data: Vec<u8> = (0..(NDIRECT + 3) * BSIZE).map(|i| (i % 251) as u8).collect();
        img.add_file(root, "big", &data);
        img.finish();

        let de = img.lookup(root, "big").unwrap();
        let din = img.rinode(de.inum as u32);
        assert!(din.addrs[..NDIRECT].iter().all(|&a| a != 0));
        assert_ne!(din.addrs[NDIRECT], 0);
        assert_eq!(img.read_file(de.inum as u32), data);
    }

    #[test]
    fn bitmap_covers_all_allocated_blocks() {
        let mut img = FsImage::new();
        let root = img.build_skeleton();
        img.add_file(root, "f", &vec![1u8; 3 * BSIZE]);
        img.finish();

        let bitmap = img.rsect(SB.bmapstart);
        for b in 0..img.freeblock as usize {
            assert_ne!(bitmap[b / 8] & (1 << (b % 8)), 0, "block {} not marked", b);
        }
        // the next block is still free
        let next = img.freeblock as usize;
        assert_eq!(bitmap[next / 8] & (1 << (next % 8)), 0);
    }

    #[test]
    fn short_name_strips_dirs_and_underscore() {
        assert_eq!(short_name("user/_ls"), "ls");
        assert_eq!(short_name("build/init"), "init");
        assert_eq!(short_name("sh"), "sh");
    }
}
