// @author:    olinex
// @time:      2023/11/30

// self mods

// use other mods
use enum_group::EnumGroup;
use thiserror_no_std::Error;

// use self mods

#[derive(Error, EnumGroup, Debug)]
pub enum CFSError {
    #[groups(disk)]
    #[error("Chunk {0} out of bounds")]
    ChunkOutOfBounds(usize),

    #[groups(disk)]
    #[error("Disk still has {0} chunks referenced")]
    StillReferenced(usize),

    #[groups(chunk)]
    #[error("Data out of bounds")]
    DataOutOfBounds,

    #[groups(bitmap)]
    #[error("No free chunk left on disk")]
    DiskFull,

    #[groups(bitmap)]
    #[error("Chunk {0} was already freed")]
    ChunkAlreadyFree(usize),

    #[groups(bitmap)]
    #[error("Chunk {0} is not in the data area")]
    ChunkNotInDataArea(usize),

    #[groups(bitmap)]
    #[error("Chunk {0} is still checked out")]
    ChunkStillReferenced(usize),

    #[groups(layout)]
    #[error("Not valid super block data")]
    InvalidSuperBlock,

    #[groups(layout)]
    #[error("Chunk size {0} is not supported")]
    UnsupportedChunkSize(usize),

    #[groups(layout)]
    #[error("No enough chunks, layout needs at least {0}")]
    NotEnoughChunks(usize),

    #[groups(inode)]
    #[error("Inode {0} out of range")]
    InodeOutOfRange(usize),

    #[groups(inode)]
    #[error("Inode {0} is not in use")]
    InodeNotInUse(usize),

    #[groups(inode)]
    #[error("Inode table was exhausted")]
    InodeTableFull,

    #[groups(inode)]
    #[error("Chunk number {0} is beyond the triple indirect tier")]
    FileTooLarge(u64),
}

pub type Result<T> = core::result::Result<T, CFSError>;
