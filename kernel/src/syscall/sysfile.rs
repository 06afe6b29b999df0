// File-system-related system calls, including exec's argument
// marshalling and the permission gate.

use arrayvec::ArrayVec;
use core::ptr::addr_of;
use core::ptr::null_mut;

use crate::exec::exec;
use crate::file::fcntl::{O_CREATE, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
use crate::file::file;
use crate::file::{FDType, File, INode};
use crate::fs::fs::{dir_empty, dir_link, dir_lookup, ialloc, iput, namei, nameiparent, DirIdent};
use crate::fs::{Dirent, DIRSIZ};
use crate::kalloc::{kalloc, kfree};
use crate::log::{begin_op, end_op};
use crate::param::{MAXARGV, MAXPATH, NDEV, NOFILE};
use crate::pipe;
use crate::proc::curr_proc;
use crate::riscv::PGSIZE;
use crate::stat::FileType;
use crate::syscall::{arg_i32, arg_str, arg_u64, fetch_addr, fetch_str};
use crate::vm::copyout;

const ERR: u64 = u64::MAX;

pub const MASK_EXEC: u8 = 1 << 0;
pub const MASK_WRITE: u8 = 1 << 1;
pub const MASK_READ: u8 = 1 << 2;

/// Does the current process's identity grant every bit of mask on ip?
/// The owner is checked against the user mask, the group against the
/// group mask, everyone else against the other mask.
pub fn check_permission(ip: &INode, mask: u8) -> bool {
    let p = curr_proc();
    let selected = if ip.uid == p.cred.uid {
        ip.mask_user
    } else if ip.gid == p.cred.gid {
        ip.mask_group
    } else {
        ip.mask_other
    };
    selected & mask == mask
}

/// Allocate a file descriptor for the given file; takes over the
/// caller's reference on success.
fn alloc_fd(f: *mut File) -> Option<usize> {
    let p = curr_proc();
    for fd in 0..NOFILE {
        if p.ofile[fd].is_null() {
            p.ofile[fd] = f;
            return Some(fd);
        }
    }
    None
}

/// Fetch the index'th argument as a file descriptor and return both
/// the descriptor and the file.
fn arg_fd(index: usize) -> Option<(usize, *mut File)> {
    let fd = arg_u64(index) as usize;
    if fd >= NOFILE {
        return None;
    }
    let f = curr_proc().ofile[fd];
    if f.is_null() {
        return None;
    }
    Some((fd, f))
}

/// Create a new inode at path, owned by the caller with a full 7/7/7
/// mask. Returns a locked inode; opening an existing regular file
/// with T_FILE is not an error.
fn create(path: &[u8], file_type: FileType, major: i16, minor: i16) -> Option<&'static mut INode> {
    let mut name = [0u8; DIRSIZ];
    let dp = nameiparent(path, &mut name)?;

    dp.ilock();

    if let Some(ip) = dir_lookup(dp, &name, None) {
        dp.iunlockput();
        ip.ilock();
        if file_type == FileType::File
            && (ip.file_type == FileType::File || ip.file_type == FileType::Device)
        {
            return Some(ip);
        }
        ip.iunlockput();
        return None;
    }

    let ip = match ialloc(dp.dev, file_type) {
        Some(ip) => ip,
        None => {
            dp.iunlockput();
            return None;
        }
    };

    ip.ilock();
    let p = curr_proc();
    ip.major = major;
    ip.minor = minor;
    ip.nlink = 1;
    ip.uid = p.cred.uid;
    ip.gid = p.cred.gid;
    ip.mask_user = 7;
    ip.mask_group = 7;
    ip.mask_other = 7;
    ip.iupdate();

    if file_type == FileType::Dir {
        // Create . and .. entries; no ip.nlink++ for ".": that would
        // be a cycle the refcounts can't see.
        let self_id = DirIdent::of(ip);
        let parent_id = DirIdent::of(dp);
        let (self_inum, parent_inum) = (ip.inum, dp.inum);
        if !dir_link(ip, b".", self_inum, self_id) || !dir_link(ip, b"..", parent_inum, parent_id) {
            // de-allocate ip.
            ip.nlink = 0;
            ip.iupdate();
            ip.iunlockput();
            dp.iunlockput();
            return None;
        }
    }

    let child_id = DirIdent::of(ip);
    let child_inum = ip.inum;
    if !dir_link(dp, &name, child_inum, child_id) {
        ip.nlink = 0;
        ip.iupdate();
        ip.iunlockput();
        dp.iunlockput();
        return None;
    }

    if file_type == FileType::Dir {
        // now that success is guaranteed:
        dp.nlink += 1; // for ".."
        dp.iupdate();
    }

    dp.iunlockput();

    Some(ip)
}

pub fn sys_open() -> u64 {
    let mut path = [0u8; MAXPATH];
    let mode = arg_i32(1);
    if !arg_str(0, &mut path) {
        return ERR;
    }

    begin_op();

    let ip: &'static mut INode;
    if mode & O_CREATE != 0 {
        ip = match create(&path, FileType::File, 0, 0) {
            Some(ip) => ip,
            None => {
                end_op();
                return ERR;
            }
        };
    } else {
        ip = match namei(&path) {
            Some(ip) => ip,
            None => {
                end_op();
                return ERR;
            }
        };
        ip.ilock();
        if ip.file_type == FileType::Dir && mode != O_RDONLY {
            ip.iunlockput();
            end_op();
            return ERR;
        }
    }

    let allowed = if mode == O_RDONLY {
        check_permission(ip, MASK_READ)
    } else if mode == O_WRONLY || mode == O_TRUNC {
        check_permission(ip, MASK_WRITE)
    } else if mode == O_RDWR {
        check_permission(ip, MASK_READ | MASK_WRITE)
    } else {
        true
    };
    if !allowed {
        ip.iunlockput();
        end_op();
        return ERR;
    }

    if ip.file_type == FileType::Device && (ip.major < 0 || ip.major as usize >= NDEV) {
        ip.iunlockput();
        end_op();
        return ERR;
    }

    let f = file::alloc();
    if f.is_null() {
        ip.iunlockput();
        end_op();
        return ERR;
    }
    let fd = match alloc_fd(f) {
        Some(fd) => fd,
        None => {
            file::close(f);
            ip.iunlockput();
            end_op();
            return ERR;
        }
    };

    let fr = unsafe { &mut *f };
    if ip.file_type == FileType::Device {
        fr.file_type = FDType::Device;
        fr.major = ip.major;
    } else {
        fr.file_type = FDType::Inode;
        fr.off = 0;
    }
    fr.ip = ip as *mut INode;
    fr.readable = mode & O_WRONLY == 0;
    fr.writable = mode & O_WRONLY != 0 || mode & O_RDWR != 0;

    if mode & O_TRUNC != 0 && ip.file_type == FileType::File {
        ip.itrunc();
    }

    ip.iunlock();
    end_op();

    fd as u64
}

pub fn sys_read() -> u64 {
    let addr = arg_u64(1) as usize;
    let n = arg_i32(2);
    let (_, f) = match arg_fd(0) {
        Some(x) => x,
        None => return ERR,
    };
    if n < 0 {
        return ERR;
    }
    file::read(f, addr, n as usize) as u64
}

pub fn sys_write() -> u64 {
    let addr = arg_u64(1) as usize;
    let n = arg_i32(2);
    let (_, f) = match arg_fd(0) {
        Some(x) => x,
        None => return ERR,
    };
    if n < 0 {
        return ERR;
    }
    file::write(f, addr, n as usize) as u64
}

pub fn sys_close() -> u64 {
    let (fd, f) = match arg_fd(0) {
        Some(x) => x,
        None => return ERR,
    };
    curr_proc().ofile[fd] = null_mut();
    file::close(f);
    0
}

pub fn sys_fstat() -> u64 {
    let st_addr = arg_u64(1) as usize;
    let (_, f) = match arg_fd(0) {
        Some(x) => x,
        None => return ERR,
    };
    if file::stat(f, st_addr) < 0 {
        return ERR;
    }
    0
}

pub fn sys_dup() -> u64 {
    let (_, f) = match arg_fd(0) {
        Some(x) => x,
        None => return ERR,
    };
    let fd = match alloc_fd(f) {
        Some(fd) => fd,
        None => return ERR,
    };
    file::dup(f);
    fd as u64
}

pub fn sys_pipe() -> u64 {
    let fdarray = arg_u64(0) as usize;
    let p = curr_proc();

    let (rf, wf) = match pipe::alloc() {
        Some(pair) => pair,
        None => return ERR,
    };

    let fd0 = match alloc_fd(rf) {
        Some(fd) => fd,
        None => {
            file::close(rf);
            file::close(wf);
            return ERR;
        }
    };
    let fd1 = match alloc_fd(wf) {
        Some(fd) => fd,
        None => {
            p.ofile[fd0] = null_mut();
            file::close(rf);
            file::close(wf);
            return ERR;
        }
    };

    let fd0_val = fd0 as i32;
    let fd1_val = fd1 as i32;
    if !copyout(
        p.pagetable,
        fdarray,
        addr_of!(fd0_val) as *const u8,
        core::mem::size_of::<i32>(),
    ) || !copyout(
        p.pagetable,
        fdarray + core::mem::size_of::<i32>(),
        addr_of!(fd1_val) as *const u8,
        core::mem::size_of::<i32>(),
    ) {
        p.ofile[fd0] = null_mut();
        p.ofile[fd1] = null_mut();
        file::close(rf);
        file::close(wf);
        return ERR;
    }
    0
}

pub fn sys_exec() -> u64 {
    let mut path = [0u8; MAXPATH];
    let uargv = arg_u64(1) as usize;
    if !arg_str(0, &mut path) {
        return ERR;
    }

    // One kernel page per argument string, freed on every exit path.
    let mut argv: ArrayVec<*mut u8, MAXARGV> = ArrayVec::new();
    let mut bad = false;
    let mut i = 0;
    loop {
        let mut uarg: u64 = 0;
        if !fetch_addr(uargv + core::mem::size_of::<u64>() * i, &mut uarg) {
            bad = true;
            break;
        }
        if uarg == 0 {
            break;
        }
        if argv.is_full() {
            bad = true;
            break;
        }

        let page = match kalloc() {
            Some(p) => p,
            None => {
                bad = true;
                break;
            }
        };
        argv.push(page);

        let buf = unsafe { core::slice::from_raw_parts_mut(page, PGSIZE) };
        if !fetch_str(uarg as usize, buf) {
            bad = true;
            break;
        }
        i += 1;
    }

    let ret = if bad { -1 } else { exec(&path, &argv) };

    for page in argv {
        kfree(page);
    }

    if ret < 0 {
        ERR
    } else {
        ret as u64
    }
}

pub fn sys_chdir() -> u64 {
    let mut path = [0u8; MAXPATH];
    let p = curr_proc();

    begin_op();
    if !arg_str(0, &mut path) {
        end_op();
        return ERR;
    }
    let ip = match namei(&path) {
        Some(ip) => ip,
        None => {
            end_op();
            return ERR;
        }
    };
    ip.ilock();
    if ip.file_type != FileType::Dir {
        ip.iunlockput();
        end_op();
        return ERR;
    }
    ip.iunlock();
    iput(p.cwd);
    end_op();
    p.cwd = ip;
    0
}

pub fn sys_mknod() -> u64 {
    let mut path = [0u8; MAXPATH];

    begin_op();
    let major = arg_i32(1) as i16;
    let minor = arg_i32(2) as i16;
    if !arg_str(0, &mut path) {
        end_op();
        return ERR;
    }
    let ip = match create(&path, FileType::Device, major, minor) {
        Some(ip) => ip,
        None => {
            end_op();
            return ERR;
        }
    };
    ip.iunlockput();
    end_op();
    0
}

pub fn sys_mkdir() -> u64 {
    let mut path = [0u8; MAXPATH];

    begin_op();
    if !arg_str(0, &mut path) {
        end_op();
        return ERR;
    }
    let ip = match create(&path, FileType::Dir, 0, 0) {
        Some(ip) => ip,
        None => {
            end_op();
            return ERR;
        }
    };
    ip.iunlockput();
    end_op();
    0
}

/// Create the path new as a link to the same inode as old.
pub fn sys_link() -> u64 {
    let mut old = [0u8; MAXPATH];
    let mut new = [0u8; MAXPATH];
    if !arg_str(0, &mut old) || !arg_str(1, &mut new) {
        return ERR;
    }

    begin_op();
    let ip = match namei(&old) {
        Some(ip) => ip,
        None => {
            end_op();
            return ERR;
        }
    };

    ip.ilock();
    if ip.file_type == FileType::Dir {
        ip.iunlockput();
        end_op();
        return ERR;
    }

    ip.nlink += 1;
    ip.iupdate();
    ip.iunlock();

    let mut name = [0u8; DIRSIZ];
    let id = DirIdent::of(ip);
    let (dev, inum) = (ip.dev, ip.inum);
    let linked = match nameiparent(&new, &mut name) {
        Some(dp) => {
            dp.ilock();
            let ok = dp.dev == dev && dir_link(dp, &name, inum, id);
            dp.iunlockput();
            ok
        }
        None => false,
    };

    if !linked {
        ip.ilock();
        ip.nlink -= 1;
        ip.iupdate();
        ip.iunlockput();
        end_op();
        return ERR;
    }

    iput(ip);
    end_op();
    0
}

pub fn sys_unlink() -> u64 {
    let mut path = [0u8; MAXPATH];
    if !arg_str(0, &mut path) {
        return ERR;
    }

    begin_op();
    let mut name = [0u8; DIRSIZ];
    let dp = match nameiparent(&path, &mut name) {
        Some(dp) => dp,
        None => {
            end_op();
            return ERR;
        }
    };

    dp.ilock();

    // Cannot unlink "." or "..".
    let bad = {
        let mut dot = [0u8; DIRSIZ];
        dot[0] = b'.';
        let mut dotdot = [0u8; DIRSIZ];
        dotdot[0] = b'.';
        dotdot[1] = b'.';
        name == dot || name == dotdot
    };

    let mut off: u32 = 0;
    let ip = if bad {
        None
    } else {
        dir_lookup(dp, &name, Some(&mut off))
    };

    let ip = match ip {
        Some(ip) => ip,
        None => {
            dp.iunlockput();
            end_op();
            return ERR;
        }
    };

    ip.ilock();
    if ip.nlink < 1 {
        panic!("unlink: nlink < 1");
    }
    if ip.file_type == FileType::Dir && !dir_empty(ip) {
        ip.iunlockput();
        dp.iunlockput();
        end_op();
        return ERR;
    }

    let de = Dirent {
        inum: 0,
        uid: 0,
        gid: 0,
        mask_user: 0,
        mask_group: 0,
        mask_other: 0,
        name: [0; DIRSIZ],
    };
    let sz = core::mem::size_of::<Dirent>();
    if dp.writei(false, addr_of!(de) as usize, off, sz) != sz as isize {
        panic!("unlink: writei");
    }
    if ip.file_type == FileType::Dir {
        dp.nlink -= 1;
        dp.iupdate();
    }
    dp.iunlockput();

    ip.nlink -= 1;
    ip.iupdate();
    ip.iunlockput();

    end_op();
    0
}
