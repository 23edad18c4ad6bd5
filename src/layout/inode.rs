// @author:    olinex
// @time:      2023/11/08

// self mods

// use other mods

// use self mods
use super::super_block::SuperBlock;
use crate::configs::{
    ADDRESS_COUNT, DIRECT_ADDRESS_COUNT, DOUBLE_INDIRECT_ADDRESS_SLOT, INDIRECT_ADDRESS_SLOT,
    INODE_RECORD_BYTE_SIZE, POINTER_BYTE_SIZE, TRIPLE_INDIRECT_ADDRESS_SLOT,
};
use crate::{CFSError, Result};

const UID_OFFSET: usize = 0;
const LAST_MODIFIED_OFFSET: usize = 8;
const FILE_SIZE_OFFSET: usize = 16;
const REFERENCE_COUNT_OFFSET: usize = 24;
const ADDRESSES_OFFSET: usize = 32;
const INODE_BITS_OFFSET: usize = ADDRESSES_OFFSET + ADDRESS_COUNT * POINTER_BYTE_SIZE;

bitflags! {
    /// Permission and type bits of the inode: rwxrwxrwx for owner, group and others, then dir and special
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InodeFlags: u16 {
        const OTHER_EXEC = 1 << 0;
        const OTHER_WRITE = 1 << 1;
        const OTHER_READ = 1 << 2;
        const GROUP_EXEC = 1 << 3;
        const GROUP_WRITE = 1 << 4;
        const GROUP_READ = 1 << 5;
        const OWNER_EXEC = 1 << 6;
        const OWNER_WRITE = 1 << 7;
        const OWNER_READ = 1 << 8;
        const DIR = 1 << 9;
        const SPECIAL = 1 << 10;
        const OWNER_RW = Self::OWNER_READ.bits() | Self::OWNER_WRITE.bits();
    }
}
impl InodeFlags {
    pub fn is_dir(&self) -> bool {
        self.contains(InodeFlags::DIR)
    }

    pub fn is_special(&self) -> bool {
        self.contains(InodeFlags::SPECIAL)
    }
}

/// The addressing tier of a logical chunk number in a file,
/// the value is the chunk number relative to the start of the tier
#[derive(Debug, PartialEq, Eq)]
enum Tier {
    Direct(usize),
    Indirect(u64),
    DoubleIndirect(u64),
    TripleIndirect(u64),
}
impl Tier {
    /// Calculate the tier of the chunk number
    ///
    /// # Arguments
    /// * chunk_number: the logical chunk number in the file
    /// * per_chunk: the count of the pointers which one chunk can hold
    ///
    /// # Returns
    /// * Ok(Tier)
    /// * Err(FileTooLarge(chunk_number))
    fn locate(chunk_number: u64, per_chunk: u64) -> Result<Self> {
        // a tier whose size overflows u64 holds every remaining chunk number
        let fits = |remainder: u64, exp: u32| {
            per_chunk
                .checked_pow(exp)
                .map_or(true, |tier_size| remainder < tier_size)
        };
        let mut remainder = chunk_number;
        if remainder < DIRECT_ADDRESS_COUNT as u64 {
            return Ok(Tier::Direct(remainder as usize));
        }
        remainder -= DIRECT_ADDRESS_COUNT as u64;
        if fits(remainder, 1) {
            return Ok(Tier::Indirect(remainder));
        }
        remainder -= per_chunk;
        if fits(remainder, 2) {
            return Ok(Tier::DoubleIndirect(remainder));
        }
        remainder -= per_chunk.pow(2);
        if fits(remainder, 3) {
            return Ok(Tier::TripleIndirect(remainder));
        }
        Err(CFSError::FileTooLarge(chunk_number))
    }

    /// # Returns
    /// * (the slot of the root address in the inode, count of pointer chunks to pass, relative chunk number)
    fn walk(&self) -> (usize, u32, u64) {
        match *self {
            Tier::Direct(slot) => (slot, 0, 0),
            Tier::Indirect(remainder) => (INDIRECT_ADDRESS_SLOT, 1, remainder),
            Tier::DoubleIndirect(remainder) => (DOUBLE_INDIRECT_ADDRESS_SLOT, 2, remainder),
            Tier::TripleIndirect(remainder) => (TRIPLE_INDIRECT_ADDRESS_SLOT, 3, remainder),
        }
    }
}

/// The inode record of a file or a directory.
///
/// The address array holds 8 direct chunk addresses, then the addresses of a
/// single, a double and a triple indirect pointer chunk:
///
/// ```text
/// direct address
///     --> data chunk
/// indirect address
///     --> pointer chunk
///         --> data chunk
/// double indirect address
///     --> pointer chunk
///         --> pointer chunk
///             --> data chunk
/// triple indirect address
///     --> pointer chunk
///         --> pointer chunk
///             --> pointer chunk
///                 --> data chunk
/// ```
///
/// An address of zero is a hole, it is filled with a new chunk the first time it is walked through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct INode {
    /// user id of the owner
    pub uid: u64,
    /// last modified timestamp, the unit is up to the caller
    pub last_modified: u64,
    /// byte size of the file
    pub file_size: u64,
    pub reference_count: u64,
    pub addresses: [u64; ADDRESS_COUNT],
    pub inode_bits: InodeFlags,
}
impl INode {
    /// Create a new empty inode with a single reference
    ///
    /// # Arguments
    /// * uid: the user id of the owner
    /// * inode_bits: the permission and type bits
    /// * now: the timestamp of creation
    pub fn new(uid: u64, inode_bits: InodeFlags, now: u64) -> Self {
        Self {
            uid,
            last_modified: now,
            reference_count: 1,
            inode_bits,
            ..Self::default()
        }
    }

    /// The zeroed inode record
    #[inline(always)]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Deserialize the inode from the bytes of the inode table
    ///
    /// # Arguments
    /// * bytes: the record bytes, which length must be same with [`INODE_RECORD_BYTE_SIZE`]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), INODE_RECORD_BYTE_SIZE);
        let mut addresses = [0; ADDRESS_COUNT];
        for (slot, address) in addresses.iter_mut().enumerate() {
            *address = read_u64(bytes, ADDRESSES_OFFSET + slot * POINTER_BYTE_SIZE);
        }
        let mut inode_bits = [0; 2];
        inode_bits.copy_from_slice(&bytes[INODE_BITS_OFFSET..INODE_BITS_OFFSET + 2]);
        Self {
            uid: read_u64(bytes, UID_OFFSET),
            last_modified: read_u64(bytes, LAST_MODIFIED_OFFSET),
            file_size: read_u64(bytes, FILE_SIZE_OFFSET),
            reference_count: read_u64(bytes, REFERENCE_COUNT_OFFSET),
            addresses,
            inode_bits: InodeFlags::from_bits_truncate(u16::from_le_bytes(inode_bits)),
        }
    }

    /// Serialize the inode into the record bytes of the inode table
    pub fn to_bytes(&self) -> [u8; INODE_RECORD_BYTE_SIZE] {
        let mut bytes = [0; INODE_RECORD_BYTE_SIZE];
        write_u64(&mut bytes, UID_OFFSET, self.uid);
        write_u64(&mut bytes, LAST_MODIFIED_OFFSET, self.last_modified);
        write_u64(&mut bytes, FILE_SIZE_OFFSET, self.file_size);
        write_u64(&mut bytes, REFERENCE_COUNT_OFFSET, self.reference_count);
        for (slot, address) in self.addresses.iter().enumerate() {
            write_u64(&mut bytes, ADDRESSES_OFFSET + slot * POINTER_BYTE_SIZE, *address);
        }
        bytes[INODE_BITS_OFFSET..INODE_BITS_OFFSET + 2]
            .copy_from_slice(&self.inode_bits.bits().to_le_bytes());
        bytes
    }

    #[inline(always)]
    pub fn direct_addresses(&self) -> &[u64] {
        &self.addresses[..DIRECT_ADDRESS_COUNT]
    }

    #[inline(always)]
    pub fn indirect_address(&self) -> u64 {
        self.addresses[INDIRECT_ADDRESS_SLOT]
    }

    #[inline(always)]
    pub fn double_indirect_address(&self) -> u64 {
        self.addresses[DOUBLE_INDIRECT_ADDRESS_SLOT]
    }

    #[inline(always)]
    pub fn triple_indirect_address(&self) -> u64 {
        self.addresses[TRIPLE_INDIRECT_ADDRESS_SLOT]
    }

    /// Read the pointer in the pointer chunk, a new chunk is allocated if the pointer is a hole
    ///
    /// # Arguments
    /// * super_block: the super block which owns the chunk allocator
    /// * pointer_chunk_idx: the index of the pointer chunk
    /// * entry: the index of the pointer in the pointer chunk
    fn follow_pointer(super_block: &SuperBlock, pointer_chunk_idx: u64, entry: usize) -> Result<u64> {
        let chunk = super_block.disk().get_chunk(pointer_chunk_idx as usize)?;
        let offset = entry * POINTER_BYTE_SIZE;
        let address = chunk.read(offset, POINTER_BYTE_SIZE, |bytes| read_u64(bytes, 0))?;
        if address != 0 {
            return Ok(address);
        }
        let address = super_block.allocate_chunk()?.idx() as u64;
        chunk.modify(offset, POINTER_BYTE_SIZE, |bytes| write_u64(bytes, 0, address))?;
        log::trace!(
            "fill hole {} of pointer chunk {} with chunk {}",
            entry,
            pointer_chunk_idx,
            address
        );
        Ok(address)
    }

    /// Find the chunk which stores the logical chunk of the file.
    /// Holes met on the way are filled with new chunks, the pointer chunks are updated in place,
    /// but the caller must save the inode itself if any of its addresses changed.
    ///
    /// # Arguments
    /// * super_block: the super block which owns the chunk allocator
    /// * chunk_number: the logical chunk number in the file
    ///
    /// # Returns
    /// * Ok(chunk index in the disk)
    /// * Err(FileTooLarge(chunk_number) | DiskFull | ChunkOutOfBounds(chunk_idx))
    pub fn resolve_indirection(
        &mut self,
        super_block: &SuperBlock,
        chunk_number: u64,
    ) -> Result<usize> {
        let per_chunk = (super_block.chunk_size() / POINTER_BYTE_SIZE) as u64;
        let (slot, depth, remainder) = Tier::locate(chunk_number, per_chunk)?.walk();
        let mut address = self.addresses[slot];
        if address == 0 {
            address = super_block.allocate_chunk()?.idx() as u64;
            self.addresses[slot] = address;
            log::trace!("fill hole of address slot {} with chunk {}", slot, address);
        }
        for level in (0..depth).rev() {
            let entry = per_chunk
                .checked_pow(level)
                .map_or(0, |divisor| remainder / divisor % per_chunk) as usize;
            address = Self::follow_pointer(super_block, address, entry)?;
        }
        Ok(address as usize)
    }

    /// Read the file data from the offset into the buffer.
    /// Reading stops at the end of the file, holes inside the file are filled with zeroed chunks.
    ///
    /// # Arguments
    /// * super_block: the super block which owns the chunk allocator
    /// * starting_offset: the byte offset in the file
    /// * buffer: the bytes are copied into it, at most its length are read
    ///
    /// # Returns
    /// * Ok(the count of the bytes which have been read)
    pub fn read(
        &mut self,
        super_block: &SuperBlock,
        starting_offset: u64,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let chunk_size = super_block.chunk_size() as u64;
        let end_offset = starting_offset
            .saturating_add(buffer.len() as u64)
            .min(self.file_size);
        let mut offset = starting_offset;
        let mut read_size = 0;
        while offset < end_offset {
            let in_chunk = (offset % chunk_size) as usize;
            let len = (chunk_size - in_chunk as u64).min(end_offset - offset) as usize;
            let chunk_idx = self.resolve_indirection(super_block, offset / chunk_size)?;
            let dst = &mut buffer[read_size..read_size + len];
            super_block
                .disk()
                .get_chunk(chunk_idx)?
                .read(in_chunk, len, |src| dst.copy_from_slice(src))?;
            read_size += len;
            offset += len as u64;
        }
        Ok(read_size)
    }

    /// Write the data into the file at the offset, the file grows if the data goes beyond its end
    ///
    /// # Arguments
    /// * super_block: the super block which owns the chunk allocator
    /// * starting_offset: the byte offset in the file
    /// * data: the bytes to be written
    ///
    /// # Returns
    /// * Ok(the count of the bytes which have been written)
    /// * Err(FileTooLarge(chunk_number) | DiskFull | ...)
    pub fn write(
        &mut self,
        super_block: &SuperBlock,
        starting_offset: u64,
        data: &[u8],
    ) -> Result<usize> {
        let chunk_size = super_block.chunk_size() as u64;
        let end_offset = starting_offset
            .checked_add(data.len() as u64)
            .ok_or(CFSError::FileTooLarge(u64::MAX / chunk_size))?;
        let mut offset = starting_offset;
        let mut write_size = 0;
        while offset < end_offset {
            let in_chunk = (offset % chunk_size) as usize;
            let len = (chunk_size - in_chunk as u64).min(end_offset - offset) as usize;
            let chunk_idx = self.resolve_indirection(super_block, offset / chunk_size)?;
            let src = &data[write_size..write_size + len];
            super_block
                .disk()
                .get_chunk(chunk_idx)?
                .modify(in_chunk, len, |dst| dst.copy_from_slice(src))?;
            write_size += len;
            offset += len as u64;
            // keep the size in step, the chunks written so far stay reachable if a later one fails
            self.file_size = self.file_size.max(offset);
        }
        Ok(write_size)
    }
}

#[inline(always)]
fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut value = [0; 8];
    value.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(value)
}

#[inline(always)]
fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
