// @author:    olinex
// @time:      2023/11/04

// self mods

// use other mods
use alloc::sync::Arc;
use alloc::vec::Vec;

// use self mods
use super::device::Disk;
use crate::{CFSError, Result};

pub(crate) type RawChunkLock = spin::Mutex<()>;
pub(crate) type ChunkLock = lock_api::Mutex<RawChunkLock, Vec<u8>>;
pub type ChunkGuard<'a> = lock_api::MutexGuard<'a, RawChunkLock, Vec<u8>>;
pub(crate) type ArcChunkGuard = lock_api::ArcMutexGuard<RawChunkLock, Vec<u8>>;

/// The in-memory working copy of one chunk of the disk.
/// Callers which ask for the same chunk at the same time share one object,
/// the bytes are written back to the disk when the last reference is dropped.
pub struct Chunk {
    idx: usize,
    size: usize,
    disk: Arc<Disk>,
    data: Arc<ChunkLock>,
}
impl Chunk {
    /// Create a new chunk from the bytes copied out of the disk
    ///
    /// # Arguments
    /// * idx: the index of the chunk in the disk
    /// * disk: the disk which owns the chunk
    /// * data: the copied bytes, its length must be same with the disk's chunk size
    pub(crate) fn new(idx: usize, disk: Arc<Disk>, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), disk.chunk_size());
        Self {
            idx,
            size: data.len(),
            disk,
            data: Arc::new(ChunkLock::new(data)),
        }
    }

    #[inline(always)]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub(crate) fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    /// Lock the chunk bytes, the lock will be released when the guard is dropped
    #[inline(always)]
    pub fn lock(&self) -> ChunkGuard<'_> {
        self.data.lock()
    }

    /// Lock the chunk bytes with a guard which isn't bound to the chunk's borrow.
    /// The owner of the guard must drop it before the last reference of the chunk.
    #[inline(always)]
    pub(crate) fn lock_arc(&self) -> ArcChunkGuard {
        self.data.lock_arc()
    }

    /// Read a range of the chunk bytes and return the result of the closure
    ///
    /// # Arguments
    /// * offset: the offset of the bytes which start from zero
    /// * len: the length of the bytes
    /// * f: the closure function which receives the bytes
    ///
    /// # Returns
    /// * Ok(the result of the closure)
    /// * Err(DataOutOfBounds)
    pub fn read<V>(&self, offset: usize, len: usize, f: impl FnOnce(&[u8]) -> V) -> Result<V> {
        if offset + len <= self.size {
            Ok(f(&self.lock()[offset..offset + len]))
        } else {
            Err(CFSError::DataOutOfBounds)
        }
    }

    /// Modify a range of the chunk bytes and return the result of the closure
    ///
    /// # Arguments
    /// * offset: the offset of the bytes which start from zero
    /// * len: the length of the bytes
    /// * f: the closure function which receives the mutable bytes
    ///
    /// # Returns
    /// * Ok(the result of the closure)
    /// * Err(DataOutOfBounds)
    pub fn modify<V>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> V,
    ) -> Result<V> {
        if offset + len <= self.size {
            Ok(f(&mut self.lock()[offset..offset + len]))
        } else {
            Err(CFSError::DataOutOfBounds)
        }
    }
}
impl Drop for Chunk {
    fn drop(&mut self) {
        self.disk.flush_chunk(self);
    }
}
