// Inodes.
//
// An inode describes a single unnamed file. The inode disk structure
// holds metadata: the file's type, owner, permission masks, its size,
// the number of links referring to it, and the list of blocks holding
// the file's content.
//
// The inodes are laid out sequentially on disk at block
// sb.inodestart. Each inode has a number, indicating its position on
// the disk.
//
// The kernel keeps a table of in-use inodes in memory to provide a
// place for synchronizing access to inodes used by multiple
// processes. The in-memory inodes include book-keeping information
// that is not stored on disk: ip.ref_cnt and ip.valid.
//
// An inode and its in-memory representation go through a sequence of
// states before they can be used by the rest of the file system code.
//
// * Allocation: an inode is allocated if its type (on disk) is
//   non-zero. ialloc() allocates, and iput() frees if the reference
//   and link counts have fallen to zero.
//
// * Referencing in table: an entry in the inode table is free if
//   ip.ref_cnt is zero. Otherwise ip.ref_cnt tracks the number of
//   in-memory pointers to the entry (open files and current
//   directories). iget() finds or creates a table entry and
//   increments its ref; iput() decrements it.
//
// * Valid: the information (type, size, &c) in an inode table entry
//   is only correct when ip.valid is true. ilock() reads the inode
//   from the disk and sets ip.valid, while iput() clears ip.valid if
//   ip.ref_cnt has fallen to zero.
//
// * Locked: file system code may only examine and modify the
//   information in an inode and its content if it has first locked
//   the inode.
//
// Thus a typical sequence is:
//   let ip = iget(dev, inum)
//   ip.ilock()
//   ... examine and modify ip.xxx ...
//   ip.iunlock()
//   iput(ip)
//
// ilock() is separate from iget() so that system calls can get a
// long-term reference to an inode (as for an open file) and only lock
// it for short periods (e.g., in read()). The separation also helps
// avoid deadlock and races during pathname lookup. iget() increments
// ip.ref_cnt so that the inode stays in the table and pointers to it
// remain valid.
//
// The itable spin-lock protects the allocation of itable entries.
// Since ip.ref_cnt indicates whether an entry is free, and ip.dev and
// ip.inum indicate which i-node an entry holds, one must hold the
// table lock while using any of those fields.
//
// An ip.lock sleep-lock protects all ip fields other than ref_cnt,
// dev, and inum. One must hold ip.lock in order to read or write that
// inode's ip.valid, ip.size, ip.file_type, &c.

use core::cmp::min;
use core::mem;
use core::ptr::addr_of;
use core::ptr::addr_of_mut;

use crate::bio::{bread, brelse};
use crate::file::INode;
use crate::fs::{
    bblock, iblock, DInode, Dirent, SuperBlock, BPB, BSIZE, DIRSIZ, FSMAGIC, MAXFILE, NDIRECT,
    NINDIRECT, ROOTINO,
};
use crate::log::{init as log_init, lwrite};
use crate::param::{NINODE, ROOTDEV};
use crate::proc::{curr_proc, either_copyin, either_copyout};
use crate::spinlock::Spinlock;
use crate::stat::{FileType, Stat};
use crate::string::memset;

struct ITable {
    lock: Spinlock,
    inode: [INode; NINODE],
}

static mut ITABLE: ITable = ITable {
    lock: Spinlock::new("itable"),
    inode: [const { INode::new() }; NINODE],
};

fn itable() -> &'static mut ITable {
    unsafe { &mut *addr_of_mut!(ITABLE) }
}

static mut SB: SuperBlock = SuperBlock {
    magic: 0,
    size: 0,
    nblocks: 0,
    ninodes: 0,
    nlog: 0,
    logstart: 0,
    inodestart: 0,
    bmapstart: 0,
};

pub fn superblock() -> &'static SuperBlock {
    unsafe { &*addr_of!(SB) }
}

fn read_sb(dev: u32) {
    let bp = bread(dev, 1);
    let raw = unsafe { &*(bp.data.as_ptr() as *const SuperBlock) };
    let sb = unsafe { &mut *addr_of_mut!(SB) };
    sb.magic = raw.magic;
    sb.size = raw.size;
    sb.nblocks = raw.nblocks;
    sb.ninodes = raw.ninodes;
    sb.nlog = raw.nlog;
    sb.logstart = raw.logstart;
    sb.inodestart = raw.inodestart;
    sb.bmapstart = raw.bmapstart;
    brelse(bp);
}

/// Init fs: read the superblock and recover the log. Must run in
/// process context because the disk path sleeps.
pub fn init(dev: u32) {
    read_sb(dev);
    if superblock().magic != FSMAGIC {
        panic!("fs::init: invalid file system");
    }
    log_init(dev, superblock());
}

// a mutable view of the dinode slot for inum inside its block buffer
fn dinode_slot(data: *mut u8, inum: u32) -> *mut DInode {
    let off = mem::size_of::<DInode>() * (inum % crate::fs::IPB) as usize;
    unsafe { data.add(off) as *mut DInode }
}

// Blocks.

/// Zero a block.
fn bzero(dev: u32, bno: u32) {
    let bp = bread(dev, bno);
    memset(bp.data.as_mut_ptr(), 0, BSIZE);
    lwrite(bp);
    brelse(bp);
}

/// Allocate a zeroed disk block; returns 0 if out of disk space.
fn balloc(dev: u32) -> u32 {
    let size = superblock().size;
    let mut b = 0;
    while b < size {
        let bp = bread(dev, bblock(b, superblock()));
        let mut bi = 0;
        while bi < BPB && b + bi < size {
            let m = 1u8 << (bi % 8);
            if bp.data[bi as usize / 8] & m == 0 {
                bp.data[bi as usize / 8] |= m; // Mark block in use.
                lwrite(bp);
                brelse(bp);
                bzero(dev, b + bi);
                return b + bi;
            }
            bi += 1;
        }
        brelse(bp);
        b += BPB;
    }
    log::warn!("balloc: out of blocks");
    0
}

/// Free a disk block.
fn bfree(dev: u32, b: u32) {
    let bp = bread(dev, bblock(b, superblock()));
    let bi = b % BPB;
    let m = 1u8 << (bi % 8);
    if bp.data[bi as usize / 8] & m == 0 {
        panic!("fs::bfree: freeing free block");
    }
    bp.data[bi as usize / 8] &= !m;
    lwrite(bp);
    brelse(bp);
}

// Inodes.

/// Allocate an inode on device dev, marking it allocated by giving it
/// the given type. Returns an unlocked but allocated and referenced
/// inode, or None if there is no free inode.
pub fn ialloc(dev: u32, file_type: FileType) -> Option<&'static mut INode> {
    for inum in 1..superblock().ninodes {
        let bp = bread(dev, iblock(inum, superblock()));
        let dip = unsafe { &mut *dinode_slot(bp.data.as_mut_ptr(), inum) };
        if dip.file_type == 0 {
            // a free inode; claim it with a zeroing write.
            memset(dip as *mut DInode as *mut u8, 0, mem::size_of::<DInode>());
            dip.file_type = file_type as i16;
            lwrite(bp);
            brelse(bp);
            return Some(iget(dev, inum));
        }
        brelse(bp);
    }
    log::warn!("fs::ialloc: no inodes");
    None
}

/// Find the inode with number inum on device dev and return its
/// in-memory copy. Does not lock the inode and does not read it from
/// disk.
fn iget(dev: u32, inum: u32) -> &'static mut INode {
    let it = itable();
    it.lock.acquire();

    // Is the inode already in the table?
    let mut empty: Option<usize> = None;
    for (i, ip) in it.inode.iter_mut().enumerate() {
        if ip.ref_cnt > 0 && ip.dev == dev && ip.inum == inum {
            ip.ref_cnt += 1;
            it.lock.release();
            return &mut itable().inode[i];
        }
        if empty.is_none() && ip.ref_cnt == 0 {
            // Remember the first empty slot.
            empty = Some(i);
        }
    }

    // Recycle an inode entry.
    let i = match empty {
        Some(i) => i,
        None => panic!("iget: no inodes"),
    };
    let ip = &mut it.inode[i];
    ip.dev = dev;
    ip.inum = inum;
    ip.ref_cnt = 1;
    ip.valid = false;
    it.lock.release();

    &mut itable().inode[i]
}

/// Increment the reference count for ip.
/// Returns ip to enable the idup(ip) idiom.
pub fn idup(ip: *mut INode) -> *mut INode {
    let it = itable();
    it.lock.acquire();
    unsafe { (*ip).ref_cnt += 1 };
    it.lock.release();
    ip
}

/// Drop a reference to an in-memory inode. If that was the last
/// reference, the inode table entry can be recycled; if that was the
/// last reference and the inode has no links to it, free the inode
/// (and its content) on disk. All calls to iput() must be inside a
/// transaction in case it has to free the inode.
pub fn iput(ip: *mut INode) {
    let it = itable();
    it.lock.acquire();

    let ip = unsafe { &mut *ip };
    if ip.ref_cnt == 1 && ip.valid && ip.nlink == 0 {
        // inode has no links and no other references: truncate and
        // free.

        // ref_cnt == 1 means no other process can have ip locked, so
        // this acquire won't block (or deadlock).
        ip.lock.acquire();
        it.lock.release();

        ip.itrunc();
        ip.file_type = FileType::None;
        ip.iupdate();
        ip.valid = false;

        ip.lock.release();
        it.lock.acquire();
    }

    ip.ref_cnt -= 1;
    it.lock.release();
}

impl INode {
    /// Lock the given inode, reading it from disk if necessary.
    pub fn ilock(&mut self) {
        if self.ref_cnt < 1 {
            panic!("ilock");
        }

        self.lock.acquire();

        if !self.valid {
            let bp = bread(self.dev, iblock(self.inum, superblock()));
            let dip = unsafe { &*dinode_slot(bp.data.as_mut_ptr(), self.inum) };
            self.file_type = FileType::from_disk(dip.file_type);
            self.major = dip.major;
            self.minor = dip.minor;
            self.nlink = dip.nlink;
            self.size = dip.size;
            self.uid = dip.uid;
            self.gid = dip.gid;
            self.mask_user = dip.mask_user;
            self.mask_group = dip.mask_group;
            self.mask_other = dip.mask_other;
            self.addrs.copy_from_slice(&dip.addrs);
            brelse(bp);
            self.valid = true;

            if self.file_type == FileType::None {
                panic!("ilock: no type");
            }
        }
    }

    /// Unlock the given inode.
    pub fn iunlock(&mut self) {
        if !self.lock.holding() || self.ref_cnt < 1 {
            panic!("iunlock");
        }
        self.lock.release();
    }

    /// Common idiom: unlock, then put.
    pub fn iunlockput(&mut self) {
        self.iunlock();
        iput(self);
    }

    /// Copy a modified in-memory inode to disk. Must be called after
    /// every change to an ip field that lives on disk. Caller must
    /// hold ip.lock.
    pub fn iupdate(&mut self) {
        let bp = bread(self.dev, iblock(self.inum, superblock()));
        let dip = unsafe { &mut *dinode_slot(bp.data.as_mut_ptr(), self.inum) };
        dip.file_type = self.file_type as i16;
        dip.major = self.major;
        dip.minor = self.minor;
        dip.nlink = self.nlink;
        dip.size = self.size;
        dip.uid = self.uid;
        dip.gid = self.gid;
        dip.mask_user = self.mask_user;
        dip.mask_group = self.mask_group;
        dip.mask_other = self.mask_other;
        dip.addrs.copy_from_slice(&self.addrs);
        lwrite(bp);
        brelse(bp);
    }

    /// Truncate inode (discard contents). Caller must hold ip.lock.
    pub fn itrunc(&mut self) {
        for i in 0..NDIRECT {
            if self.addrs[i] != 0 {
                bfree(self.dev, self.addrs[i]);
                self.addrs[i] = 0;
            }
        }

        if self.addrs[NDIRECT] != 0 {
            let bp = bread(self.dev, self.addrs[NDIRECT]);
            let a = bp.data.as_ptr() as *const u32;
            for i in 0..NINDIRECT {
                let addr = unsafe { *a.add(i) };
                if addr != 0 {
                    bfree(self.dev, addr);
                }
            }
            brelse(bp);
            bfree(self.dev, self.addrs[NDIRECT]);
            self.addrs[NDIRECT] = 0;
        }

        self.size = 0;
        self.iupdate();
    }

    // Inode content.
    //
    // The content (data) associated with each inode is stored in
    // blocks on the disk. The first NDIRECT block numbers are listed
    // in ip.addrs[]; the next NINDIRECT are listed in the block
    // ip.addrs[NDIRECT].

    /// Return the disk block address of the nth block in inode ip; if
    /// there is no such block, bmap allocates one. Returns 0 if out
    /// of disk space.
    fn bmap(&mut self, bn: u32) -> u32 {
        let mut bn = bn as usize;

        if bn < NDIRECT {
            let mut addr = self.addrs[bn];
            if addr == 0 {
                addr = balloc(self.dev);
                if addr == 0 {
                    return 0;
                }
                self.addrs[bn] = addr;
            }
            return addr;
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            // Load the indirect block, allocating if necessary.
            let mut addr = self.addrs[NDIRECT];
            if addr == 0 {
                addr = balloc(self.dev);
                if addr == 0 {
                    return 0;
                }
                self.addrs[NDIRECT] = addr;
            }
            let bp = bread(self.dev, addr);
            let a = bp.data.as_mut_ptr() as *mut u32;
            addr = unsafe { *a.add(bn) };
            if addr == 0 {
                addr = balloc(self.dev);
                if addr != 0 {
                    unsafe { *a.add(bn) = addr };
                    lwrite(bp);
                }
            }
            brelse(bp);
            return addr;
        }

        panic!("bmap: out of range");
    }

    /// Copy stat information from the inode. Caller must hold ip.lock.
    pub fn stati(&self, st: &mut Stat) {
        st.dev = self.dev;
        st.ino = self.inum;
        st.file_type = self.file_type as i16;
        st.nlink = self.nlink;
        st.size = self.size as u64;
        st.uid = self.uid;
        st.gid = self.gid;
    }

    /// Read data from inode. Caller must hold ip.lock. If user_dst,
    /// then dst is a user virtual address; otherwise a kernel
    /// address.
    pub fn readi(&mut self, user_dst: bool, dst: usize, off: u32, n: usize) -> usize {
        let mut n = n as u32;
        if off > self.size || off.checked_add(n).is_none() {
            return 0;
        }
        if off + n > self.size {
            n = self.size - off;
        }

        let mut tot: u32 = 0;
        let mut off = off;
        let mut dst = dst;
        while tot < n {
            let addr = self.bmap(off / BSIZE as u32);
            if addr == 0 {
                break;
            }

            let bp = bread(self.dev, addr);
            let m = min(n - tot, (BSIZE - off as usize % BSIZE) as u32);
            let src = unsafe { bp.data.as_ptr().add(off as usize % BSIZE) };
            if !either_copyout(user_dst, dst, src, m as usize) {
                brelse(bp);
                tot = 0;
                break;
            }
            brelse(bp);

            tot += m;
            off += m;
            dst += m as usize;
        }

        tot as usize
    }

    /// Write data to inode. Caller must hold ip.lock. If user_src,
    /// then src is a user virtual address; otherwise a kernel
    /// address. Returns the number of bytes successfully written; a
    /// short count means an error of some kind.
    pub fn writei(&mut self, user_src: bool, src: usize, off: u32, n: usize) -> isize {
        let n = n as u32;
        if off > self.size || off.checked_add(n).is_none() {
            return -1;
        }
        if off + n > (MAXFILE * BSIZE) as u32 {
            return -1;
        }

        let mut tot: u32 = 0;
        let mut off = off;
        let mut src = src;
        while tot < n {
            let addr = self.bmap(off / BSIZE as u32);
            if addr == 0 {
                break;
            }

            let bp = bread(self.dev, addr);
            let m = min(n - tot, (BSIZE - off as usize % BSIZE) as u32);
            let dst = unsafe { bp.data.as_mut_ptr().add(off as usize % BSIZE) };
            if !either_copyin(dst, user_src, src, m as usize) {
                brelse(bp);
                break;
            }
            lwrite(bp);
            brelse(bp);

            tot += m;
            off += m;
            src += m as usize;
        }

        if off > self.size {
            self.size = off;
        }

        // write the i-node back to disk even if the size didn't
        // change, because the loop above might have called bmap() and
        // added a new block to ip.addrs[].
        self.iupdate();

        tot as isize
    }
}

// Directories.

/// Pad a path component out to a full on-disk directory name.
fn dir_name(name: &[u8]) -> [u8; DIRSIZ] {
    let mut buf = [0u8; DIRSIZ];
    let n = min(name.len(), DIRSIZ);
    buf[..n].copy_from_slice(&name[..n]);
    buf
}

/// Look for a directory entry in a directory. If found, optionally
/// report the byte offset of the entry.
pub fn dir_lookup(
    dp: &mut INode,
    name: &[u8],
    mut poff: Option<&mut u32>,
) -> Option<&'static mut INode> {
    if dp.file_type != FileType::Dir {
        panic!("dir_lookup not DIR");
    }

    let want = dir_name(name);
    let sz = mem::size_of::<Dirent>();
    let mut de = Dirent {
        inum: 0,
        uid: 0,
        gid: 0,
        mask_user: 0,
        mask_group: 0,
        mask_other: 0,
        name: [0; DIRSIZ],
    };

    let mut off = 0;
    while off < dp.size {
        if dp.readi(false, addr_of_mut!(de) as usize, off, sz) != sz {
            panic!("dir_lookup read");
        }
        if de.inum != 0 && want == de.name {
            // entry matches path element
            if let Some(poff) = poff.as_deref_mut() {
                *poff = off;
            }
            return Some(iget(dp.dev, de.inum as u32));
        }
        off += sz as u32;
    }

    None
}

/// Owner and permission masks stamped into a directory entry,
/// captured from the target inode before the write.
#[derive(Copy, Clone)]
pub struct DirIdent {
    pub uid: u32,
    pub gid: u32,
    pub mask_user: u8,
    pub mask_group: u8,
    pub mask_other: u8,
}

impl DirIdent {
    pub fn of(ip: &INode) -> DirIdent {
        DirIdent {
            uid: ip.uid,
            gid: ip.gid,
            mask_user: ip.mask_user,
            mask_group: ip.mask_group,
            mask_other: ip.mask_other,
        }
    }
}

/// Write a new directory entry (name -> inum) into the directory dp,
/// stamping the target's owner and masks into the record. Fails on a
/// duplicate name or when the directory cannot grow.
pub fn dir_link(dp: &mut INode, name: &[u8], inum: u32, id: DirIdent) -> bool {
    // Check that name is not present.
    if let Some(found) = dir_lookup(dp, name, None) {
        iput(found);
        return false;
    }

    // Look for an empty dirent.
    let sz = mem::size_of::<Dirent>();
    let mut de = Dirent {
        inum: 0,
        uid: 0,
        gid: 0,
        mask_user: 0,
        mask_group: 0,
        mask_other: 0,
        name: [0; DIRSIZ],
    };
    let mut off = 0;
    while off < dp.size {
        if dp.readi(false, addr_of_mut!(de) as usize, off, sz) != sz {
            panic!("dir_link read");
        }
        if de.inum == 0 {
            break;
        }
        off += sz as u32;
    }

    de.inum = inum as u16;
    de.uid = id.uid;
    de.gid = id.gid;
    de.mask_user = id.mask_user;
    de.mask_group = id.mask_group;
    de.mask_other = id.mask_other;
    de.name = dir_name(name);

    if dp.writei(false, addr_of!(de) as usize, off, sz) != sz as isize {
        return false;
    }

    true
}

/// Is the directory dp empty except for "." and ".."?
pub fn dir_empty(dp: &mut INode) -> bool {
    let sz = mem::size_of::<Dirent>();
    let mut de = Dirent {
        inum: 0,
        uid: 0,
        gid: 0,
        mask_user: 0,
        mask_group: 0,
        mask_other: 0,
        name: [0; DIRSIZ],
    };
    let mut off = (2 * sz) as u32;
    while off < dp.size {
        if dp.readi(false, addr_of_mut!(de) as usize, off, sz) != sz {
            panic!("dir_empty read");
        }
        if de.inum != 0 {
            return false;
        }
        off += sz as u32;
    }
    true
}

// Paths.

/// Copy the next path element from path into name, returning the
/// remainder. The returned path has no leading slashes, so the caller
/// can check rest.is_empty() to see if the name is the last one. A
/// NUL byte ends the path. If there is no name to remove, returns
/// None.
///
/// Examples:
///   skipelem("a/bb/c", name) = "bb/c", setting name = "a"
///   skipelem("///a//bb", name) = "bb", setting name = "a"
///   skipelem("a", name) = "", setting name = "a"
///   skipelem("") = skipelem("////") = None
fn skipelem<'p>(path: &'p [u8], name: &mut [u8; DIRSIZ]) -> Option<&'p [u8]> {
    let mut i = 0;
    while i < path.len() && path[i] == b'/' {
        i += 1;
    }
    if i == path.len() || path[i] == 0 {
        return None;
    }

    let start = i;
    while i < path.len() && path[i] != b'/' && path[i] != 0 {
        i += 1;
    }
    *name = dir_name(&path[start..i]);

    while i < path.len() && path[i] == b'/' {
        i += 1;
    }
    Some(&path[i..])
}

// path ends at its NUL terminator or at the slice end
fn path_end(path: &[u8]) -> &[u8] {
    let n = path.iter().position(|&c| c == 0).unwrap_or(path.len());
    &path[..n]
}

/// Look up and return the inode for a path name. If parent is true,
/// return the inode for the parent and copy the final path element
/// into name, which must have room for DIRSIZ bytes. Must be called
/// inside a transaction since it calls iput().
fn namex(path: &[u8], parent: bool, name: &mut [u8; DIRSIZ]) -> Option<&'static mut INode> {
    let path = path_end(path);

    let mut ip: &'static mut INode = if !path.is_empty() && path[0] == b'/' {
        iget(ROOTDEV, ROOTINO)
    } else {
        unsafe { &mut *idup(curr_proc().cwd) }
    };

    let mut rest = path;
    loop {
        let next_rest = match skipelem(rest, name) {
            Some(r) => r,
            None => break,
        };

        ip.ilock();
        if ip.file_type != FileType::Dir {
            ip.iunlockput();
            return None;
        }

        if parent && (next_rest.is_empty() || next_rest[0] == 0) {
            // Stop one level early.
            ip.iunlock();
            return Some(ip);
        }

        match dir_lookup(ip, name, None) {
            Some(next) => {
                ip.iunlockput();
                ip = next;
            }
            None => {
                ip.iunlockput();
                return None;
            }
        }

        rest = next_rest;
    }

    if parent {
        iput(ip);
        return None;
    }
    Some(ip)
}

pub fn namei(path: &[u8]) -> Option<&'static mut INode> {
    let mut name = [0u8; DIRSIZ];
    namex(path, false, &mut name)
}

pub fn nameiparent(path: &[u8], name: &mut [u8; DIRSIZ]) -> Option<&'static mut INode> {
    namex(path, true, name)
}
