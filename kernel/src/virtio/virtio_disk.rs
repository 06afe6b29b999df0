// Driver for qemu's virtio disk device, using the legacy-free mmio
// interface.
//
// qemu ... -drive file=fs.img,if=none,format=raw,id=x0
//          -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0

use core::ptr::addr_of_mut;
use core::ptr::null_mut;

use crate::buf::Buf;
use crate::fs::BSIZE;
use crate::kalloc::kalloc;
use crate::memlayout::VIRTIO0;
use crate::proc::{sleep, wakeup};
use crate::riscv::{sync_synchronize, PGSIZE};
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::virtio::*;

fn read_reg(r: usize) -> u32 {
    unsafe { ((VIRTIO0 + r) as *const u32).read_volatile() }
}

fn write_reg(r: usize, val: u32) {
    unsafe { ((VIRTIO0 + r) as *mut u32).write_volatile(val) }
}

// track info about an in-flight operation, for use when the
// completion interrupt arrives. indexed by the first descriptor index
// of the chain.
struct Info {
    b: *mut Buf,
    status: u8,
}

struct Disk {
    // a set (not a ring) of DMA descriptors, with which the driver
    // tells the device where to read and write individual disk
    // operations. there are NUM descriptors. most commands consist of
    // a "chain" (a linked list) of a couple of these descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers that the
    // driver would like the device to process. it only includes the
    // head descriptor of each chain. the ring has NUM elements.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that the
    // device has finished processing (just the head of each chain).
    // there are NUM used ring entries.
    used: *mut VirtqUsed,

    // our own book-keeping.
    free: [bool; NUM], // is a descriptor free?
    used_idx: u16,     // we've looked this far in used[2..NUM].

    info: [Info; NUM],

    // disk command headers. one-for-one with descriptors, for
    // convenience.
    ops: [VirtioBlkReq; NUM],

    vdisk_lock: Spinlock,
}

static mut DISK: Disk = Disk {
    desc: null_mut(),
    avail: null_mut(),
    used: null_mut(),
    free: [false; NUM],
    used_idx: 0,
    info: [const {
        Info {
            b: null_mut(),
            status: 0,
        }
    }; NUM],
    ops: [VirtioBlkReq {
        req_type: 0,
        reserved: 0,
        sector: 0,
    }; NUM],
    vdisk_lock: Spinlock::new("virtio_disk"),
};

fn disk() -> &'static mut Disk {
    unsafe { &mut *addr_of_mut!(DISK) }
}

pub fn init() {
    if read_reg(VIRTIO_MMIO_MAGIC_VALUE) != 0x74726976
        || read_reg(VIRTIO_MMIO_VERSION) != 2
        || read_reg(VIRTIO_MMIO_DEVICE_ID) != 2
        || read_reg(VIRTIO_MMIO_VENDOR_ID) != 0x554d4551
    {
        panic!("could not find virtio disk");
    }

    let d = disk();
    let mut status: u32 = 0;

    // reset device
    write_reg(VIRTIO_MMIO_STATUS, status);

    // set ACKNOWLEDGE status bit
    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    write_reg(VIRTIO_MMIO_STATUS, status);

    // set DRIVER status bit
    status |= VIRTIO_CONFIG_S_DRIVER;
    write_reg(VIRTIO_MMIO_STATUS, status);

    // negotiate features
    let mut features = read_reg(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    write_reg(VIRTIO_MMIO_DRIVER_FEATURES, features);

    // tell device that feature negotiation is complete.
    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    write_reg(VIRTIO_MMIO_STATUS, status);

    // re-read status to ensure FEATURES_OK is set.
    status = read_reg(VIRTIO_MMIO_STATUS);
    if status & VIRTIO_CONFIG_S_FEATURES_OK == 0 {
        panic!("virtio disk FEATURES_OK unset");
    }

    // initialize queue 0.
    write_reg(VIRTIO_MMIO_QUEUE_SEL, 0);

    // ensure queue 0 is not in use.
    if read_reg(VIRTIO_MMIO_QUEUE_READY) != 0 {
        panic!("virtio disk should not be ready");
    }

    // check maximum queue size.
    let max = read_reg(VIRTIO_MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio disk has no queue 0");
    }
    if (max as usize) < NUM {
        panic!("virtio disk max queue too short");
    }

    // allocate and zero queue memory.
    d.desc = kalloc().expect("virtio disk kalloc") as *mut VirtqDesc;
    d.avail = kalloc().expect("virtio disk kalloc") as *mut VirtqAvail;
    d.used = kalloc().expect("virtio disk kalloc") as *mut VirtqUsed;
    memset(d.desc as *mut u8, 0, PGSIZE);
    memset(d.avail as *mut u8, 0, PGSIZE);
    memset(d.used as *mut u8, 0, PGSIZE);

    // set queue size.
    write_reg(VIRTIO_MMIO_QUEUE_NUM, NUM as u32);

    // write physical addresses.
    write_reg(VIRTIO_MMIO_QUEUE_DESC_LOW, d.desc as usize as u32);
    write_reg(VIRTIO_MMIO_QUEUE_DESC_HIGH, (d.desc as usize >> 32) as u32);
    write_reg(VIRTIO_MMIO_DRIVER_DESC_LOW, d.avail as usize as u32);
    write_reg(VIRTIO_MMIO_DRIVER_DESC_HIGH, (d.avail as usize >> 32) as u32);
    write_reg(VIRTIO_MMIO_DEVICE_DESC_LOW, d.used as usize as u32);
    write_reg(VIRTIO_MMIO_DEVICE_DESC_HIGH, (d.used as usize >> 32) as u32);

    // queue is ready.
    write_reg(VIRTIO_MMIO_QUEUE_READY, 0x1);

    // all NUM descriptors start out unused.
    for i in 0..NUM {
        d.free[i] = true;
    }

    // tell device we're completely ready.
    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    write_reg(VIRTIO_MMIO_STATUS, status);

    // plic.rs and trap.rs arrange for interrupts from VIRTIO0_IRQ.
}

/// find a free descriptor, mark it non-free, return its index.
fn alloc_desc() -> Option<usize> {
    let d = disk();
    for i in 0..NUM {
        if d.free[i] {
            d.free[i] = false;
            return Some(i);
        }
    }
    None
}

/// mark a descriptor as free.
fn free_desc(i: usize) {
    let d = disk();
    if i >= NUM {
        panic!("free_desc: out of range");
    }
    if d.free[i] {
        panic!("free_desc: already free");
    }
    unsafe {
        (*d.desc.add(i)).addr = 0;
        (*d.desc.add(i)).len = 0;
        (*d.desc.add(i)).flags = 0;
        (*d.desc.add(i)).next = 0;
    }
    d.free[i] = true;
    wakeup(d.free.as_ptr() as usize);
}

/// free a chain of descriptors.
fn free_chain(mut i: usize) {
    loop {
        let (flags, next) = unsafe { ((*disk().desc.add(i)).flags, (*disk().desc.add(i)).next) };
        free_desc(i);
        if flags & VRING_DESC_F_NEXT != 0 {
            i = next as usize;
        } else {
            break;
        }
    }
}

/// allocate three descriptors (they need not be contiguous). disk
/// transfers always use three descriptors.
fn alloc3_desc(idx: &mut [usize; 3]) -> bool {
    for i in 0..3 {
        match alloc_desc() {
            Some(d) => idx[i] = d,
            None => {
                for j in 0..i {
                    free_desc(idx[j]);
                }
                return false;
            }
        }
    }
    true
}

pub fn disk_rw(b: &mut Buf, write: bool) {
    let sector = b.blockno as u64 * (BSIZE / 512) as u64;

    let d = disk();
    d.vdisk_lock.acquire();

    // the spec's Section 5.2 says that legacy block operations use
    // three descriptors: one for type/reserved/sector, one for the
    // data, one for a 1-byte status result.

    // allocate the three descriptors.
    let mut idx = [0usize; 3];
    loop {
        if alloc3_desc(&mut idx) {
            break;
        }
        let chan = d.free.as_ptr() as usize;
        sleep(chan, &mut d.vdisk_lock);
    }

    // format the three descriptors.
    let buf0 = &mut d.ops[idx[0]];
    buf0.req_type = if write {
        VIRTIO_BLK_T_OUT // write the disk
    } else {
        VIRTIO_BLK_T_IN // read the disk
    };
    buf0.reserved = 0;
    buf0.sector = sector;

    unsafe {
        let desc0 = &mut *d.desc.add(idx[0]);
        desc0.addr = buf0 as *const VirtioBlkReq as u64;
        desc0.len = core::mem::size_of::<VirtioBlkReq>() as u32;
        desc0.flags = VRING_DESC_F_NEXT;
        desc0.next = idx[1] as u16;

        let desc1 = &mut *d.desc.add(idx[1]);
        desc1.addr = b.data.as_mut_ptr() as u64;
        desc1.len = BSIZE as u32;
        desc1.flags = if write {
            0 // device reads b.data
        } else {
            VRING_DESC_F_WRITE // device writes b.data
        };
        desc1.flags |= VRING_DESC_F_NEXT;
        desc1.next = idx[2] as u16;

        d.info[idx[0]].status = 0xff; // device writes 0 on success
        let desc2 = &mut *d.desc.add(idx[2]);
        desc2.addr = &d.info[idx[0]].status as *const u8 as u64;
        desc2.len = 1;
        desc2.flags = VRING_DESC_F_WRITE; // device writes the status
        desc2.next = 0;

        // record struct buf for intr().
        b.disk = true;
        d.info[idx[0]].b = b;

        // tell the device the first index in our chain of descriptors.
        let avail = &mut *d.avail;
        avail.ring[avail.idx as usize % NUM] = idx[0] as u16;

        sync_synchronize();

        // tell the device another avail ring entry is available.
        avail.idx = avail.idx.wrapping_add(1);

        sync_synchronize();
    }

    write_reg(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

    // Wait for intr() to say the request has finished.
    let chan = b as *const Buf as usize;
    while b.disk {
        sleep(chan, &mut d.vdisk_lock);
    }

    d.info[idx[0]].b = null_mut();
    free_chain(idx[0]);

    d.vdisk_lock.release();
}

pub fn intr() {
    let d = disk();
    d.vdisk_lock.acquire();

    // the device won't raise another interrupt until we tell it we've
    // seen this interrupt, which the following line does. this may
    // race with the device writing new entries to the "used" ring, in
    // which case we may process the new completion entries in this
    // interrupt, and have nothing to do in the next interrupt, which
    // is harmless.
    write_reg(
        VIRTIO_MMIO_INTERRUPT_ACK,
        read_reg(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3,
    );

    sync_synchronize();

    // the device increments used.idx when it adds an entry to the
    // used ring.
    let used = unsafe { &*d.used };
    while d.used_idx != used.idx {
        sync_synchronize();
        let id = used.ring[d.used_idx as usize % NUM].id as usize;

        if d.info[id].status != 0 {
            panic!("virtio_disk intr status");
        }

        let b = unsafe { &mut *d.info[id].b };
        b.disk = false; // disk is done with buf
        wakeup(b as *const Buf as usize);

        d.used_idx = d.used_idx.wrapping_add(1);
    }

    d.vdisk_lock.release();
}
