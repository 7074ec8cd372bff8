use std::fmt::Display;
use std::path::Path;

use log::debug;

use crate::structs::*;
use crate::Error;

mod disk;
mod handles;
mod io;

pub use disk::{BlockDevice, Disk};
pub(crate) use handles::HandleTable;

/// A mounted filesystem: the resident metadata plus the owned device.
///
/// Holding a value of this type is the mounted state; dropping it or
/// passing it to [`umount`](Self::umount) ends it.
#[derive(Debug)]
pub struct Filesystem {
    pub(crate) superblock: Superblock,
    pub(crate) fat: Fat,
    pub(crate) root: RootDirectory,
    pub(crate) handles: HandleTable,
    pub(crate) disk: Disk,
}

impl Filesystem {
    /// Mount the filesystem stored in the disk image at `path`.
    pub fn mount<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::mount_disk(Disk::open(path)?)
    }

    /// Mount from an already-open block device.
    pub fn mount_device(device: Box<dyn BlockDevice>) -> Result<Self, Error> {
        Self::mount_disk(Disk::new(device)?)
    }

    fn mount_disk(mut disk: Disk) -> Result<Self, Error> {
        let superblock = Superblock::load(&mut disk)?;
        let fat = Fat::load(&mut disk, &superblock)?;
        let root = RootDirectory::load(&mut disk, &superblock)?;
        debug!(
            "Mounted filesystem, {} data blocks, {} free",
            superblock.data_block_count,
            fat.free_count()
        );
        Ok(Self {
            superblock,
            fat,
            root,
            handles: HandleTable::new(),
            disk,
        })
    }

    /// Write a fresh filesystem sized to the device and mount it.
    pub fn format(device: Box<dyn BlockDevice>) -> Result<Self, Error> {
        let mut disk = Disk::new(device)?;
        let superblock = Superblock::new(disk.count())?;
        let fat = Fat::new(&superblock);
        let root = RootDirectory::new();
        superblock.flush(&mut disk)?;
        fat.flush(&mut disk)?;
        root.flush(&mut disk, &superblock)?;
        debug!(
            "Formatted device, {} FAT blocks, {} data blocks",
            superblock.fat_blocks, superblock.data_block_count
        );
        Ok(Self {
            superblock,
            fat,
            root,
            handles: HandleTable::new(),
            disk,
        })
    }

    /// Flush all metadata and hand back the underlying device.
    ///
    /// Refused while any descriptor is open; the intact filesystem comes
    /// back alongside the error.
    pub fn umount(mut self) -> Result<Box<dyn BlockDevice>, (Self, Error)> {
        if self.handles.open_count() > 0 {
            return Err((self, Error::HandlesOpen));
        }
        if let Err(e) = self.flush_metadata() {
            return Err((self, e));
        }
        Ok(self.disk.device)
    }

    fn flush_metadata(&mut self) -> Result<(), Error> {
        self.superblock.flush(&mut self.disk)?;
        self.fat.flush(&mut self.disk)?;
        self.root.flush(&mut self.disk, &self.superblock)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    /// Snapshot for the fixed diagnostic block.
    pub fn info(&self) -> FsInfo {
        FsInfo {
            total_blocks: self.superblock.total_blocks,
            fat_blocks: self.superblock.fat_blocks,
            root_dir_block: self.superblock.root_dir_block,
            data_start_block: self.superblock.data_start_block,
            data_block_count: self.superblock.data_block_count,
            fat_free: self.fat.free_count(),
            root_free: self.root.free_count(),
        }
    }

    /// Listing of every occupied root-directory entry.
    pub fn ls(&self) -> FsLs<'_> {
        FsLs { root: &self.root }
    }

    /// Add an empty file named `name` to the root directory.
    pub fn create(&mut self, name: &str) -> Result<(), Error> {
        validate_filename(name)?;
        if self.root.find(name).is_some() {
            return Err(Error::Exists);
        }
        let slot = self.root.free_slot().ok_or(Error::DirectoryFull)?;
        self.root.entries[slot].assign(name);
        debug!("Created {name} in slot {slot}");
        self.root.flush(&mut self.disk, &self.superblock)
    }

    /// Remove `name` and return its data blocks to the free pool.
    pub fn delete(&mut self, name: &str) -> Result<(), Error> {
        let slot = self.root.find(name).ok_or(Error::NotFound)?;
        if self.handles.references(slot) {
            return Err(Error::FileBusy);
        }
        let head = self.root.entries[slot].first_block;
        if head != FAT_EOC {
            self.fat.release_chain(head)?;
        }
        self.root.entries[slot].clear();
        debug!("Deleted {name} from slot {slot}");
        self.fat.flush(&mut self.disk)?;
        self.root.flush(&mut self.disk, &self.superblock)
    }

    /// Open `name`; descriptors are small positive integers, 0 never valid.
    pub fn open(&mut self, name: &str) -> Result<usize, Error> {
        validate_filename(name)?;
        if self.handles.open_count() == FS_OPEN_MAX_COUNT {
            return Err(Error::TooManyOpen);
        }
        let slot = self.root.find(name).ok_or(Error::NotFound)?;
        self.handles.open(slot)
    }

    pub fn close(&mut self, fd: usize) -> Result<(), Error> {
        self.handles.close(fd)
    }

    /// Current byte length of the file behind `fd`.
    pub fn stat(&self, fd: usize) -> Result<u32, Error> {
        let handle = self.handles.get(fd)?;
        Ok(self.root.entries[handle.entry].size)
    }

    /// Move the descriptor's cursor; `offset == size` positions at EOF.
    pub fn lseek(&mut self, fd: usize, offset: u32) -> Result<(), Error> {
        let size = self.stat(fd)?;
        if offset > size {
            return Err(Error::OffsetOutOfRange);
        }
        self.handles.get_mut(fd)?.offset = offset;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    total_blocks: u16,
    fat_blocks: u8,
    root_dir_block: u16,
    data_start_block: u16,
    data_block_count: u16,
    fat_free: usize,
    root_free: usize,
}

impl Display for FsInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FS Info:")?;
        writeln!(f, "total_blk_count={}", self.total_blocks)?;
        writeln!(f, "fat_blk_count={}", self.fat_blocks)?;
        writeln!(f, "rdir_blk={}", self.root_dir_block)?;
        writeln!(f, "data_blk={}", self.data_start_block)?;
        writeln!(f, "data_blk_count={}", self.data_block_count)?;
        writeln!(f, "fat_free_ratio={}/{}", self.fat_free, self.data_block_count)?;
        writeln!(f, "rdir_free_ratio={}/{}", self.root_free, FS_FILE_MAX_COUNT)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FsLs<'a> {
    root: &'a RootDirectory,
}

impl Display for FsLs<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FS Ls:")?;
        for entry in self.root.entries.iter().filter(|entry| !entry.is_free()) {
            writeln!(
                f,
                "file: {}, size: {}, data_blk: {}",
                String::from_utf8_lossy(entry.name()),
                entry.size,
                entry.first_block
            )?;
        }
        Ok(())
    }
}
