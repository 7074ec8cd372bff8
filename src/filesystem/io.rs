use log::debug;

use super::Filesystem;
use crate::structs::{BLOCK_SIZE, FAT_EOC};
use crate::Error;

impl Filesystem {
    /// Read up to `buffer.len()` bytes at the descriptor's cursor.
    ///
    /// Short counts happen only at end of file. The cursor advances by
    /// the returned length.
    pub fn read(&mut self, fd: usize, buffer: &mut [u8]) -> Result<usize, Error> {
        let handle = self.handles.get(fd)?;
        let entry = self.root.entries[handle.entry];
        if entry.first_block == FAT_EOC {
            return Ok(0);
        }
        let chain = self.fat.chain(entry.first_block)?;
        let offset = handle.offset as usize;
        let effective = buffer.len().min((entry.size as usize).saturating_sub(offset));
        if effective == 0 {
            return Ok(0);
        }
        let mut block_index = offset / BLOCK_SIZE;
        let mut block_offset = offset % BLOCK_SIZE;
        let mut copied = 0;
        let mut raw = [0u8; BLOCK_SIZE];
        while copied < effective {
            // A size larger than the chain covers is a corrupt image.
            let block = chain.get(block_index).copied().ok_or(Error::Corruption)?;
            let absolute = self.superblock.data_start_block + block;
            self.disk.read_block(absolute, &mut raw)?;
            let take = (BLOCK_SIZE - block_offset).min(effective - copied);
            buffer[copied..copied + take].copy_from_slice(&raw[block_offset..block_offset + take]);
            copied += take;
            block_index += 1;
            block_offset = 0;
        }
        self.handles.get_mut(fd)?.offset += effective as u32;
        Ok(effective)
    }

    /// Write `buffer` at the descriptor's cursor, extending the file on
    /// demand and stopping short only once the data region is exhausted.
    ///
    /// The cursor stays where it was; reposition with
    /// [`lseek`](Self::lseek) before the next operation.
    pub fn write(&mut self, fd: usize, buffer: &[u8]) -> Result<usize, Error> {
        let handle = self.handles.get(fd)?;
        if buffer.is_empty() {
            return Ok(0);
        }
        let entry = self.root.entries[handle.entry];
        let offset = handle.offset as usize;
        let mut chain = self.fat.chain(entry.first_block)?;
        let existing_blocks = chain.len();
        let needed = (offset + buffer.len()).div_ceil(BLOCK_SIZE);
        let mut first_block = entry.first_block;
        while chain.len() < needed {
            let tail = chain.last().copied().unwrap_or(FAT_EOC);
            match self.fat.extend_chain(tail) {
                Ok(block) => {
                    if first_block == FAT_EOC {
                        first_block = block;
                    }
                    chain.push(block);
                }
                Err(Error::OutOfSpace) => break,
                Err(e) => return Err(e),
            }
        }
        let capacity = chain.len() * BLOCK_SIZE;
        let effective = buffer.len().min(capacity.saturating_sub(offset));
        if effective == 0 {
            return Ok(0);
        }
        let mut block_index = offset / BLOCK_SIZE;
        let mut block_offset = offset % BLOCK_SIZE;
        let mut written = 0;
        let mut raw = [0u8; BLOCK_SIZE];
        while written < effective {
            let absolute = self.superblock.data_start_block + chain[block_index];
            let take = (BLOCK_SIZE - block_offset).min(effective - written);
            let fresh = block_index >= existing_blocks;
            if fresh {
                // Zero-fill slack instead of pre-reading stale contents.
                raw = [0u8; BLOCK_SIZE];
            } else if take < BLOCK_SIZE {
                self.disk.read_block(absolute, &mut raw)?;
            }
            raw[block_offset..block_offset + take]
                .copy_from_slice(&buffer[written..written + take]);
            self.disk.write_block(absolute, &raw)?;
            written += take;
            block_index += 1;
            block_offset = 0;
        }
        let slot = handle.entry;
        let grown = self.root.entries[slot].size.max((offset + written) as u32);
        self.root.entries[slot].size = grown;
        self.root.entries[slot].first_block = first_block;
        self.fat.flush(&mut self.disk)?;
        self.root.flush(&mut self.disk, &self.superblock)?;
        debug!("Wrote {written} bytes to slot {slot}, size now {grown}");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::super::{BlockDevice, Filesystem};
    use crate::structs::{BLOCK_SIZE, FAT_EOC};

    fn blank_device(blocks: usize) -> Box<dyn BlockDevice> {
        Box::new(Cursor::new(vec![0u8; blocks * BLOCK_SIZE]))
    }

    fn fs_with_data_blocks(data_blocks: usize) -> Filesystem {
        Filesystem::format(blank_device(3 + data_blocks)).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|index| (index % 251) as u8).collect()
    }

    fn open_file(fs: &mut Filesystem, name: &str) -> usize {
        fs.create(name).unwrap();
        fs.open(name).unwrap()
    }

    #[test]
    fn hello_round_trip() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "hello.txt");
        assert_eq!(fd, 1);
        assert_eq![fs.write(fd, b"Hi").unwrap(), 2];
        assert_eq![fs.stat(fd).unwrap(), 2];
        fs.lseek(fd, 0).unwrap();
        let mut buffer = [0u8; 16];
        assert_eq![fs.read(fd, &mut buffer).unwrap(), 2];
        assert_eq!(&buffer[0..2], b"Hi");
    }

    #[test]
    fn exact_two_block_write() {
        let mut fs = fs_with_data_blocks(7);
        let free_before = fs.fat.free_count();
        let fd = open_file(&mut fs, "two");
        let data = pattern(2 * BLOCK_SIZE);
        assert_eq!(fs.write(fd, &data).unwrap(), 2 * BLOCK_SIZE);
        assert_eq!(fs.stat(fd).unwrap(), 2 * BLOCK_SIZE as u32);
        let head = fs.root.entries[fs.root.find("two").unwrap()].first_block;
        assert_eq!(fs.fat.chain(head).unwrap().len(), 2);
        assert_eq!(fs.fat.free_count(), free_before - 2);
    }

    #[test]
    fn read_spanning_three_blocks() {
        let mut fs = fs_with_data_blocks(7);
        let fd = open_file(&mut fs, "span");
        let data = pattern(3 * BLOCK_SIZE + 1);
        assert_eq!(fs.write(fd, &data).unwrap(), data.len());
        assert_eq!(fs.stat(fd).unwrap(), data.len() as u32);
        let head = fs.root.entries[fs.root.find("span").unwrap()].first_block;
        assert_eq!(fs.fat.chain(head).unwrap().len(), 4);
        let start = BLOCK_SIZE - 5;
        fs.lseek(fd, start as u32).unwrap();
        let mut buffer = vec![0u8; BLOCK_SIZE + 10];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), buffer.len());
        assert_eq!(&buffer[..], &data[start..start + BLOCK_SIZE + 10]);
    }

    #[test]
    fn exhaustion_truncates_the_write() {
        // One usable data block: block 0 of the region is reserved.
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "big");
        let data = pattern(BLOCK_SIZE + 100);
        assert_eq!(fs.write(fd, &data).unwrap(), BLOCK_SIZE);
        assert_eq!(fs.stat(fd).unwrap(), BLOCK_SIZE as u32);
        assert_eq!(fs.fat.free_count(), 0);
        // The cursor did not move, so the written prefix reads back.
        let mut buffer = vec![0u8; 8];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 8);
        assert_eq!(&buffer[..], &data[..8]);
        // At end of file with nothing left to allocate, nothing fits.
        fs.lseek(fd, BLOCK_SIZE as u32).unwrap();
        assert_eq!(fs.write(fd, &data).unwrap(), 0);
        // An overwrite of the lone block still succeeds in place.
        fs.lseek(fd, 0).unwrap();
        assert_eq!(fs.write(fd, &data).unwrap(), BLOCK_SIZE);
    }

    #[test]
    fn write_does_not_advance_the_cursor() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "cursor");
        fs.write(fd, b"abc").unwrap();
        let mut buffer = [0u8; 3];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 3);
        assert_eq!(&buffer, b"abc");
    }

    #[test]
    fn interior_writes_do_not_grow_the_file() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "interior");
        let mut expected = pattern(100);
        fs.write(fd, &expected).unwrap();
        fs.lseek(fd, 10).unwrap();
        assert_eq!(fs.write(fd, b"0123456789").unwrap(), 10);
        assert_eq!(fs.stat(fd).unwrap(), 100);
        expected[10..20].copy_from_slice(b"0123456789");
        fs.lseek(fd, 0).unwrap();
        let mut buffer = vec![0u8; 100];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 100);
        assert_eq!(buffer, expected);
    }

    #[test]
    fn overwrite_preserves_neighboring_bytes() {
        let mut fs = fs_with_data_blocks(7);
        let fd = open_file(&mut fs, "rmw");
        let mut expected = pattern(BLOCK_SIZE + 200);
        fs.write(fd, &expected).unwrap();
        // Patch a range that straddles the block boundary.
        let start = BLOCK_SIZE - 3;
        fs.lseek(fd, start as u32).unwrap();
        assert_eq!(fs.write(fd, b"XXXXXX").unwrap(), 6);
        expected[start..start + 6].copy_from_slice(b"XXXXXX");
        fs.lseek(fd, 0).unwrap();
        let mut buffer = vec![0u8; expected.len()];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), expected.len());
        assert_eq!(buffer, expected);
    }

    #[test]
    fn zero_count_operations_are_noops() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "noop");
        assert_eq!(fs.write(fd, &[]).unwrap(), 0);
        let mut empty = [0u8; 0];
        assert_eq!(fs.read(fd, &mut empty).unwrap(), 0);
        assert_eq!(fs.stat(fd).unwrap(), 0);
    }

    #[test]
    fn reads_from_an_empty_file_return_zero() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "empty");
        let mut buffer = [0u8; 4];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn reads_at_end_of_file_return_zero() {
        let mut fs = fs_with_data_blocks(2);
        let fd = open_file(&mut fs, "eof");
        fs.write(fd, b"payload").unwrap();
        fs.lseek(fd, 7).unwrap();
        let mut buffer = [0u8; 4];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn descriptors_share_the_underlying_file() {
        let mut fs = fs_with_data_blocks(2);
        let first = open_file(&mut fs, "shared");
        let second = fs.open("shared").unwrap();
        assert_ne!(first, second);
        fs.write(first, b"visible").unwrap();
        assert_eq!(fs.stat(second).unwrap(), 7);
        let mut buffer = [0u8; 7];
        assert_eq!(fs.read(second, &mut buffer).unwrap(), 7);
        assert_eq!(&buffer, b"visible");
    }

    #[test]
    fn contents_survive_a_remount() {
        let mut fs = fs_with_data_blocks(7);
        let fd = open_file(&mut fs, "durable");
        let data = pattern(2 * BLOCK_SIZE + 17);
        assert_eq!(fs.write(fd, &data).unwrap(), data.len());
        fs.close(fd).unwrap();
        let device = fs.umount().unwrap();
        let mut fs = Filesystem::mount_device(device).unwrap();
        let fd = fs.open("durable").unwrap();
        assert_eq!(fs.stat(fd).unwrap(), data.len() as u32);
        let mut buffer = vec![0u8; data.len()];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), data.len());
        assert_eq!(buffer, data);
    }

    #[test]
    fn delete_then_recreate_yields_an_empty_file() {
        let mut fs = fs_with_data_blocks(7);
        let fd = open_file(&mut fs, "reborn");
        fs.write(fd, &pattern(BLOCK_SIZE * 2)).unwrap();
        fs.close(fd).unwrap();
        let free_before = fs.fat.free_count();
        fs.delete("reborn").unwrap();
        assert_eq!(fs.fat.free_count(), free_before + 2);
        let fd = open_file(&mut fs, "reborn");
        assert_eq!(fs.stat(fd).unwrap(), 0);
        let mut buffer = [0u8; 16];
        assert_eq!(fs.read(fd, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn used_plus_free_blocks_stay_balanced() {
        let mut fs = fs_with_data_blocks(7);
        let fd = open_file(&mut fs, "a");
        fs.write(fd, &pattern(BLOCK_SIZE + 1)).unwrap();
        fs.close(fd).unwrap();
        let fd = fs.open("a").unwrap();
        fs.lseek(fd, fs.stat(fd).unwrap()).unwrap();
        fs.write(fd, &pattern(BLOCK_SIZE)).unwrap();
        fs.close(fd).unwrap();
        let head = fs.root.entries[fs.root.find("a").unwrap()].first_block;
        let used = fs.fat.chain(head).unwrap().len();
        assert_eq!(used, 3);
        assert_eq!(fs.fat.free_count() + used, 6);
        assert_ne!(head, FAT_EOC);
    }
}
