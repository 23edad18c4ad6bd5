// @author:    olinex
// @time:      2023/11/04

// self mods

// use other mods

// use self mods

/// Magic number for check the file system type
pub const FS_MAGIC: u32 = 0x3b800007;

/// The chunk which stores the super block record
pub const SUPER_BLOCK_CHUNK_IDX: usize = 0;

/// Smallest chunk size a file system can be formatted with,
/// the super block record and a useful pointer chunk must fit into one chunk
pub const MIN_CHUNK_SIZE: usize = 64;

/// Byte size of a chunk pointer stored in inodes and pointer chunks
pub const POINTER_BYTE_SIZE: usize = core::mem::size_of::<u64>();

pub const DIRECT_ADDRESS_COUNT: usize = 8;
pub const INDIRECT_ADDRESS_SLOT: usize = DIRECT_ADDRESS_COUNT;
pub const DOUBLE_INDIRECT_ADDRESS_SLOT: usize = DIRECT_ADDRESS_COUNT + 1;
pub const TRIPLE_INDIRECT_ADDRESS_SLOT: usize = DIRECT_ADDRESS_COUNT + 2;
pub const ADDRESS_COUNT: usize = DIRECT_ADDRESS_COUNT + 3;

/// Serialized byte size of one inode record in the inode table
pub const INODE_RECORD_BYTE_SIZE: usize = 128;

/// The shared object cache won't sweep dead entries before holding this many keys
pub const CACHE_SWEEP_THRESHOLD: usize = 16;

/// Percentage of the disk chunks given to the inode table when formatting
pub const DEFAULT_INODE_TABLE_PERCENT: u8 = 10;
