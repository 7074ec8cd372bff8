use std::fmt::Display;

use super::*;
use crate::filesystem::Disk;
use crate::Error;

impl Fat {
    /// Fresh table with every data block free and block 0 reserved.
    pub(crate) fn new(superblock: &Superblock) -> Self {
        let mut entries = vec![0u16; superblock.fat_entry_slots()];
        entries[0] = FAT_EOC;
        Self {
            entries,
            data_block_count: superblock.data_block_count,
        }
    }

    /// Load FAT blocks 1..=F from the device.
    pub(crate) fn load(disk: &mut Disk, superblock: &Superblock) -> Result<Self, Error> {
        let mut entries = Vec::with_capacity(superblock.fat_entry_slots());
        let mut raw = [0u8; BLOCK_SIZE];
        for block in 1..=superblock.fat_blocks as u16 {
            disk.read_block(block, &mut raw)?;
            let words: Vec<u16> = bytemuck::pod_collect_to_vec(&raw[..]);
            entries.extend(words.into_iter().map(u16::from_le));
        }
        Ok(Self {
            entries,
            data_block_count: superblock.data_block_count,
        })
    }

    /// Write every FAT block back to the device.
    pub(crate) fn flush(&self, disk: &mut Disk) -> Result<(), Error> {
        for (index, chunk) in self.entries.chunks(FAT_ENTRIES_PER_BLOCK).enumerate() {
            let words: Vec<u16> = chunk.iter().map(|entry| entry.to_le()).collect();
            disk.write_block(1 + index as u16, bytemuck::cast_slice(&words))?;
        }
        Ok(())
    }

    pub(crate) fn get(&self, index: u16) -> u16 {
        self.entries[index as usize]
    }

    /// Materialize the chain rooted at `head` as ordered data-block indices.
    ///
    /// A `FAT_EOC` head yields an empty chain. Iteration is bounded by the
    /// data-block count; loops, links into the reserved block 0 and links
    /// reaching a free entry are corruption.
    pub(crate) fn chain(&self, head: u16) -> Result<Vec<u16>, Error> {
        let mut blocks = Vec::new();
        if head == FAT_EOC {
            return Ok(blocks);
        }
        let mut current = head;
        loop {
            if current == 0
                || current >= self.data_block_count
                || blocks.len() >= self.data_block_count as usize
            {
                return Err(Error::Corruption);
            }
            blocks.push(current);
            match self.entries[current as usize] {
                FAT_EOC => return Ok(blocks),
                0 => return Err(Error::Corruption),
                next => current = next,
            }
        }
    }

    /// Free every block of the chain rooted at `head`, final slot included.
    pub(crate) fn release_chain(&mut self, head: u16) -> Result<(), Error> {
        for block in self.chain(head)? {
            self.entries[block as usize] = 0;
        }
        Ok(())
    }

    /// Claim the first free data block and link it after `tail`.
    ///
    /// Pass `FAT_EOC` as `tail` to start a new chain. The scan covers the
    /// whole table, so allocation only fails once no free entry exists.
    pub(crate) fn extend_chain(&mut self, tail: u16) -> Result<u16, Error> {
        let free = (1..self.data_block_count)
            .find(|&index| self.entries[index as usize] == 0)
            .ok_or(Error::OutOfSpace)?;
        self.entries[free as usize] = FAT_EOC;
        if tail != FAT_EOC {
            self.entries[tail as usize] = free;
        }
        Ok(free)
    }

    /// Free entries among the addressable indices, reserved block excluded.
    pub(crate) fn free_count(&self) -> usize {
        (1..self.data_block_count)
            .filter(|&index| self.entries[index as usize] == 0)
            .count()
    }
}

impl Display for Fat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Fat {{")?;
        writeln!(f, "    data_block_count: {}", self.data_block_count)?;
        writeln!(f, "    free: {}", self.free_count())?;
        writeln!(f, "    allocated: [")?;
        for index in 1..self.data_block_count {
            match self.get(index) {
                0 => {}
                FAT_EOC => writeln!(f, "        {index} -> EOC")?,
                next => writeln!(f, "        {index} -> {next}")?,
            }
        }
        writeln!(f, "    ]")?;
        write!(f, "}}")?;
        Ok(())
    }
}
