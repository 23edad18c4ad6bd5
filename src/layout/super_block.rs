// @author:    olinex
// @time:      2023/11/08

// self mods

// use other mods
use alloc::sync::Arc;
use spin::Mutex;

// use self mods
use super::bitmap::{BitRange, DiskBitMap};
use super::inode_table::INodeTable;
use crate::block::{Chunk, Disk};
use crate::configs::{
    DEFAULT_INODE_TABLE_PERCENT, FS_MAGIC, MIN_CHUNK_SIZE, POINTER_BYTE_SIZE,
    SUPER_BLOCK_CHUNK_IDX,
};
use crate::{CFSError, Result};

const SUPER_BLOCK_FIELD_COUNT: usize = 9;
const SUPER_BLOCK_RECORD_BYTE_SIZE: usize = SUPER_BLOCK_FIELD_COUNT * core::mem::size_of::<u32>();

/// Options used when formatting a disk
#[derive(Clone, Debug)]
pub struct FormatOptions {
    /// Percentage of the disk chunks given to the inode table,
    /// the table never gets smaller than the room of a single inode
    pub inode_table_percent: u8,
}
impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            inode_table_percent: DEFAULT_INODE_TABLE_PERCENT,
        }
    }
}

/// The super block record stored in the first chunk of the disk,
/// all fields are little endian u32 in the order of declaration
#[derive(Clone, Debug, PartialEq, Eq)]
struct SuperBlockRecord {
    magic: u32,
    chunk_count: u32,
    chunk_size: u32,
    disk_block_map_offset: u32,
    disk_block_map_size_chunks: u32,
    inode_table_offset: u32,
    inode_table_size_chunks: u32,
    inode_count: u32,
    data_offset: u32,
}
impl SuperBlockRecord {
    fn fields(&self) -> [u32; SUPER_BLOCK_FIELD_COUNT] {
        [
            self.magic,
            self.chunk_count,
            self.chunk_size,
            self.disk_block_map_offset,
            self.disk_block_map_size_chunks,
            self.inode_table_offset,
            self.inode_table_size_chunks,
            self.inode_count,
            self.data_offset,
        ]
    }

    fn to_bytes(&self) -> [u8; SUPER_BLOCK_RECORD_BYTE_SIZE] {
        let mut bytes = [0; SUPER_BLOCK_RECORD_BYTE_SIZE];
        for (dst, field) in bytes.chunks_exact_mut(4).zip(self.fields()) {
            dst.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut fields = [0; SUPER_BLOCK_FIELD_COUNT];
        for (field, src) in fields.iter_mut().zip(bytes.chunks_exact(4)) {
            let mut value = [0; 4];
            value.copy_from_slice(src);
            *field = u32::from_le_bytes(value);
        }
        let [magic, chunk_count, chunk_size, disk_block_map_offset, disk_block_map_size_chunks, inode_table_offset, inode_table_size_chunks, inode_count, data_offset] =
            fields;
        Self {
            magic,
            chunk_count,
            chunk_size,
            disk_block_map_offset,
            disk_block_map_size_chunks,
            inode_table_offset,
            inode_table_size_chunks,
            inode_count,
            data_offset,
        }
    }

    /// Check the record against the disk it was loaded from
    fn is_valid(&self, disk: &Disk) -> bool {
        let chunk_size = disk.chunk_size();
        let inode_table_size_chunks = self.inode_table_size_chunks as usize;
        self.magic == FS_MAGIC
            && self.chunk_count as usize == disk.chunk_count()
            && self.chunk_size as usize == chunk_size
            && self.disk_block_map_offset as usize == SUPER_BLOCK_CHUNK_IDX + 1
            && self.disk_block_map_size_chunks as usize
                == DiskBitMap::chunks_for(disk.chunk_count(), chunk_size)
            && self.inode_table_offset == self.disk_block_map_offset + self.disk_block_map_size_chunks
            && self.data_offset == self.inode_table_offset + self.inode_table_size_chunks
            && (self.data_offset as usize) < disk.chunk_count()
            && self.inode_count as usize
                == INodeTable::capacity(chunk_size, inode_table_size_chunks).1
    }
}

/// The super block describes how the disk is laid out:
/// ```text
///                | <chunk area> |    <chunk count>
///                ----------------
///                | super block  | <-      1
///                ----------------
///                |              | <-
///                | block bitmap |   |     disk block map chunks
///                |              | <-
///                ----------------
///                | inode bitmap | <-
///                |--------------|   |     inode table chunks
///                |    inodes    | <-
///                ----------------
///                |              | <-
///                |     data     |   |     rest of the chunks
///                |              | <-
///                ----------------
/// ```
///
/// The block bitmap has one bit for every chunk of the disk,
/// the bits of the chunks before the data area are always set.
pub struct SuperBlock {
    disk: Arc<Disk>,
    record: SuperBlockRecord,
    disk_block_map: Mutex<DiskBitMap>,
    inode_table: INodeTable,
}
impl SuperBlock {
    fn check_chunk_size(chunk_size: usize) -> Result<()> {
        if chunk_size < MIN_CHUNK_SIZE || chunk_size % POINTER_BYTE_SIZE != 0 {
            Err(CFSError::UnsupportedChunkSize(chunk_size))
        } else {
            Ok(())
        }
    }

    /// Format the disk and create a new file system on it
    ///
    /// # Arguments
    /// * disk: the disk to be formatted
    /// * options: how the disk is shared between the areas
    ///
    /// # Returns
    /// * Ok(SuperBlock)
    /// * Err(UnsupportedChunkSize(chunk_size) | NotEnoughChunks(minimum chunk count))
    pub fn init(disk: Arc<Disk>, options: &FormatOptions) -> Result<Self> {
        let chunk_size = disk.chunk_size();
        let chunk_count = disk.chunk_count();
        Self::check_chunk_size(chunk_size)?;
        let disk_block_map_offset = SUPER_BLOCK_CHUNK_IDX + 1;
        let disk_block_map_size_chunks = DiskBitMap::chunks_for(chunk_count, chunk_size);
        let inode_table_offset = disk_block_map_offset + disk_block_map_size_chunks;
        let inode_table_size_chunks = (chunk_count * options.inode_table_percent as usize)
            .div_ceil(100)
            .max(INodeTable::min_size_chunks(chunk_size));
        let data_offset = inode_table_offset + inode_table_size_chunks;
        if data_offset >= chunk_count {
            return Err(CFSError::NotEnoughChunks(data_offset + 1));
        }
        let (_, inode_count) = INodeTable::capacity(chunk_size, inode_table_size_chunks);
        let to_u32 =
            |value: usize| u32::try_from(value).map_err(|_| CFSError::NotEnoughChunks(value));
        let record = SuperBlockRecord {
            magic: FS_MAGIC,
            chunk_count: to_u32(chunk_count)?,
            chunk_size: to_u32(chunk_size)?,
            disk_block_map_offset: to_u32(disk_block_map_offset)?,
            disk_block_map_size_chunks: to_u32(disk_block_map_size_chunks)?,
            inode_table_offset: to_u32(inode_table_offset)?,
            inode_table_size_chunks: to_u32(inode_table_size_chunks)?,
            inode_count: to_u32(inode_count)?,
            data_offset: to_u32(data_offset)?,
        };
        let bytes = record.to_bytes();
        disk.get_chunk(SUPER_BLOCK_CHUNK_IDX)?.modify(0, chunk_size, |dst| {
            dst.fill(0);
            dst[..bytes.len()].copy_from_slice(&bytes);
        })?;

        let mut disk_block_map = DiskBitMap::new(&disk, disk_block_map_offset, chunk_count)?;
        disk_block_map.clear_all();
        disk_block_map.set_range(&BitRange {
            start_idx: 0,
            bit_count: data_offset,
        });
        let inode_table = INodeTable::new(&disk, inode_table_offset, inode_table_size_chunks)?;
        inode_table.format_inode_table();
        log::debug!(
            "format disk: block map {}+{}, inode table {}+{} with {} inodes, data from {}",
            disk_block_map_offset,
            disk_block_map_size_chunks,
            inode_table_offset,
            inode_table_size_chunks,
            inode_count,
            data_offset
        );
        Ok(Self {
            disk,
            record,
            disk_block_map: Mutex::new(disk_block_map),
            inode_table,
        })
    }

    /// Load the file system from a disk which was formatted before
    ///
    /// # Arguments
    /// * disk: the formatted disk
    ///
    /// # Returns
    /// * Ok(SuperBlock)
    /// * Err(UnsupportedChunkSize(chunk_size) | InvalidSuperBlock)
    pub fn load_from_disk(disk: Arc<Disk>) -> Result<Self> {
        Self::check_chunk_size(disk.chunk_size())?;
        let record = disk.get_chunk(SUPER_BLOCK_CHUNK_IDX)?.read(
            0,
            SUPER_BLOCK_RECORD_BYTE_SIZE,
            SuperBlockRecord::from_bytes,
        )?;
        if !record.is_valid(&disk) {
            log::warn!("invalid super block: {:?}", record);
            return Err(CFSError::InvalidSuperBlock);
        }
        let disk_block_map = DiskBitMap::new(
            &disk,
            record.disk_block_map_offset as usize,
            disk.chunk_count(),
        )?;
        let inode_table = INodeTable::new(
            &disk,
            record.inode_table_offset as usize,
            record.inode_table_size_chunks as usize,
        )?;
        log::debug!("load file system with {} inodes", record.inode_count);
        Ok(Self {
            disk,
            record,
            disk_block_map: Mutex::new(disk_block_map),
            inode_table,
        })
    }

    #[inline(always)]
    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    #[inline(always)]
    pub fn chunk_size(&self) -> usize {
        self.disk.chunk_size()
    }

    #[inline(always)]
    pub fn disk_block_map_offset(&self) -> usize {
        self.record.disk_block_map_offset as usize
    }

    #[inline(always)]
    pub fn disk_block_map_size_chunks(&self) -> usize {
        self.record.disk_block_map_size_chunks as usize
    }

    #[inline(always)]
    pub fn inode_table_offset(&self) -> usize {
        self.record.inode_table_offset as usize
    }

    #[inline(always)]
    pub fn inode_table_size_chunks(&self) -> usize {
        self.record.inode_table_size_chunks as usize
    }

    /// The first chunk available for file data
    #[inline(always)]
    pub fn data_offset(&self) -> usize {
        self.record.data_offset as usize
    }

    #[inline(always)]
    pub fn inode_table(&self) -> &INodeTable {
        &self.inode_table
    }

    /// Allocate a free chunk of the data area, its bytes are zeroed
    ///
    /// # Returns
    /// * Ok(chunk)
    /// * Err(DiskFull)
    pub fn allocate_chunk(&self) -> Result<Arc<Chunk>> {
        let chunk_idx = {
            let mut disk_block_map = self.disk_block_map.lock();
            let range = disk_block_map.find_unset_bits(1);
            if range.bit_count != 1 {
                log::warn!("no free chunk left on disk");
                return Err(CFSError::DiskFull);
            }
            disk_block_map.set(range.start_idx);
            range.start_idx
        };
        let chunk = self.disk.get_chunk(chunk_idx)?;
        chunk.lock().fill(0);
        log::trace!("allocate chunk {}", chunk_idx);
        Ok(chunk)
    }

    /// Give a chunk of the data area back to the allocator.
    /// The chunk must not be checked out, it will be zeroed when allocated again.
    ///
    /// # Returns
    /// * Ok(())
    /// * Err(ChunkOutOfBounds(chunk_idx) | ChunkNotInDataArea(chunk_idx) | ChunkAlreadyFree(chunk_idx) | ChunkStillReferenced(chunk_idx))
    pub fn free_chunk(&self, chunk_idx: usize) -> Result<()> {
        if chunk_idx >= self.disk.chunk_count() {
            return Err(CFSError::ChunkOutOfBounds(chunk_idx));
        }
        if chunk_idx < self.data_offset() {
            return Err(CFSError::ChunkNotInDataArea(chunk_idx));
        }
        let mut disk_block_map = self.disk_block_map.lock();
        if self.disk.is_checked_out(chunk_idx) {
            return Err(CFSError::ChunkStillReferenced(chunk_idx));
        }
        if !disk_block_map.get(chunk_idx) {
            return Err(CFSError::ChunkAlreadyFree(chunk_idx));
        }
        disk_block_map.clr(chunk_idx);
        log::trace!("free chunk {}", chunk_idx);
        Ok(())
    }

    /// The count of the free chunks in the data area
    pub fn free_chunk_count(&self) -> usize {
        self.disk_block_map.lock().count_unset()
    }

    /// Read the file data of the inode, holes inside the file are filled on the way
    ///
    /// # Returns
    /// * Ok(the count of the bytes which have been read)
    /// * Err(InodeOutOfRange(idx) | InodeNotInUse(idx) | DiskFull | ...)
    pub fn read_file(&self, inode_idx: usize, offset: u64, buffer: &mut [u8]) -> Result<usize> {
        let handle = self.inode_table.open(inode_idx)?;
        let mut inode = handle.lock();
        let result = inode.read(self, offset, buffer);
        self.inode_table.commit_locked(&handle, &inode)?;
        result
    }

    /// Write the data into the file of the inode
    ///
    /// # Returns
    /// * Ok(the count of the bytes which have been written)
    /// * Err(InodeOutOfRange(idx) | InodeNotInUse(idx) | DiskFull | ...)
    pub fn write_file(&self, inode_idx: usize, offset: u64, data: &[u8]) -> Result<usize> {
        let handle = self.inode_table.open(inode_idx)?;
        let mut inode = handle.lock();
        let result = inode.write(self, offset, data);
        self.inode_table.commit_locked(&handle, &inode)?;
        result
    }
}
