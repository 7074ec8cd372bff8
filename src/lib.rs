//! Flat filesystem over a fixed-size block device.
//!
//! One superblock, a FAT of chained u16 entries, a single 128-entry root
//! directory, and byte-granular I/O through small integer descriptors.

pub use error::Error;
pub use filesystem::{BlockDevice, Disk, Filesystem, FsInfo, FsLs};
pub use structs::{
    Fat, Superblock, BLOCK_SIZE, FAT_EOC, FS_FILENAME_LEN, FS_FILE_MAX_COUNT, FS_OPEN_MAX_COUNT,
};

mod error;
mod filesystem;
mod structs;
