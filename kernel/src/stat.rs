// File types and the user-visible stat record.

#[repr(i16)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    None = 0,
    Dir = 1,    // Directory
    File = 2,   // File
    Device = 3, // Device
}

impl FileType {
    pub fn from_disk(raw: i16) -> FileType {
        match raw {
            0 => FileType::None,
            1 => FileType::Dir,
            2 => FileType::File,
            3 => FileType::Device,
            _ => panic!("bad inode type"),
        }
    }
}

#[repr(C)]
pub struct Stat {
    pub dev: u32,       // File system's disk device
    pub ino: u32,       // Inode number
    pub file_type: i16, // Type of file
    pub nlink: i16,     // Number of links to file
    pub size: u64,      // Size of file in bytes
    pub uid: u32,       // Owner user id
    pub gid: u32,       // Owner group id
}
