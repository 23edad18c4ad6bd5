// @author:    olinex
// @time:      2023/11/23

// self mods

// use other mods
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard};

// use self mods
use super::bitmap::DiskBitMap;
use super::inode::INode;
use crate::block::{Disk, SharedObjectCache};
use crate::configs::INODE_RECORD_BYTE_SIZE;
use crate::{CFSError, Result};

/// An inode which is shared by all the users who opened it at the same time.
/// Once the inode is freed or the table is formatted, the handle is released and can't be saved anymore.
pub struct OpenInode {
    idx: usize,
    inode: Mutex<INode>,
    released: AtomicBool,
}
impl OpenInode {
    #[inline(always)]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[inline(always)]
    pub fn lock(&self) -> MutexGuard<'_, INode> {
        self.inode.lock()
    }

    #[inline(always)]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark the handle as released, waiting for the current user of the inode
    fn release(&self) {
        let _inode = self.inode.lock();
        self.released.store(true, Ordering::Release);
    }
}

/// The inode table area of the disk.
///
/// ```text
/// | used inodes bitmap | inode records ... |
/// ```
///
/// Records are packed `chunk_size / INODE_RECORD_BYTE_SIZE` per chunk.
/// If a chunk is smaller than a record, each record takes as many consecutive chunks as it needs.
pub struct INodeTable {
    disk: Arc<Disk>,
    chunk_size: usize,
    offset: usize,
    size_chunks: usize,
    /// the first chunk of the records
    ilist_offset: usize,
    inode_count: usize,
    inodes_per_chunk: usize,
    used_inodes: Mutex<DiskBitMap>,
    inode_cache: Mutex<SharedObjectCache<usize, OpenInode>>,
}
impl INodeTable {
    /// Calculate the count of the chunks taken by one record
    #[inline(always)]
    fn chunks_per_inode(chunk_size: usize) -> usize {
        INODE_RECORD_BYTE_SIZE.div_ceil(chunk_size)
    }

    /// The smallest table, which holds the bitmap and a single record
    pub fn min_size_chunks(chunk_size: usize) -> usize {
        1 + Self::chunks_per_inode(chunk_size)
    }

    /// Calculate how the table area is shared between the bitmap and the records
    ///
    /// # Arguments
    /// * chunk_size: the byte size of each chunk
    /// * size_chunks: the count of the chunks of the whole table
    ///
    /// # Returns
    /// * (count of the bitmap chunks, count of the inodes)
    pub fn capacity(chunk_size: usize, size_chunks: usize) -> (usize, usize) {
        let inodes_per_chunk = chunk_size / INODE_RECORD_BYTE_SIZE;
        let inodes_in = |chunks: usize| {
            if inodes_per_chunk > 0 {
                chunks * inodes_per_chunk
            } else {
                chunks / Self::chunks_per_inode(chunk_size)
            }
        };
        let bitmap_chunks = DiskBitMap::chunks_for(inodes_in(size_chunks), chunk_size);
        (
            bitmap_chunks,
            inodes_in(size_chunks.saturating_sub(bitmap_chunks)),
        )
    }

    /// Open the inode table area, the used inodes bitmap is kept as it is on the disk
    ///
    /// # Arguments
    /// * disk: the disk which stores the table
    /// * offset: the first chunk of the table
    /// * size_chunks: the count of the chunks of the table
    ///
    /// # Returns
    /// * Ok(INodeTable)
    /// * Err(ChunkOutOfBounds(chunk_idx))
    pub fn new(disk: &Arc<Disk>, offset: usize, size_chunks: usize) -> Result<Self> {
        let chunk_size = disk.chunk_size();
        let (bitmap_chunks, inode_count) = Self::capacity(chunk_size, size_chunks);
        if offset + size_chunks > disk.chunk_count() {
            return Err(CFSError::ChunkOutOfBounds(offset + size_chunks - 1));
        }
        let used_inodes = DiskBitMap::new(disk, offset, inode_count)?;
        Ok(Self {
            disk: Arc::clone(disk),
            chunk_size,
            offset,
            size_chunks,
            ilist_offset: offset + bitmap_chunks,
            inode_count,
            inodes_per_chunk: chunk_size / INODE_RECORD_BYTE_SIZE,
            used_inodes: Mutex::new(used_inodes),
            inode_cache: Mutex::new(SharedObjectCache::new()),
        })
    }

    #[inline(always)]
    pub fn inode_count(&self) -> usize {
        self.inode_count
    }

    /// Zero if a record is larger than a chunk
    #[inline(always)]
    pub fn inodes_per_chunk(&self) -> usize {
        self.inodes_per_chunk
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn size_chunks(&self) -> usize {
        self.size_chunks
    }

    /// Mark all the inodes as free, the opened inodes are released
    pub fn format_inode_table(&self) {
        let mut inode_cache = self.inode_cache.lock();
        for handle in inode_cache.clear() {
            handle.release();
        }
        self.used_inodes.lock().clear_all();
        log::debug!("format inode table with {} inodes", self.inode_count);
    }

    fn check_range(&self, idx: usize) -> Result<()> {
        if idx < self.inode_count {
            Ok(())
        } else {
            Err(CFSError::InodeOutOfRange(idx))
        }
    }

    /// Calculate the chunk and the byte offset in it where the record starts
    fn record_position(&self, idx: usize) -> (usize, usize) {
        if self.inodes_per_chunk > 0 {
            (
                self.ilist_offset + idx / self.inodes_per_chunk,
                idx % self.inodes_per_chunk * INODE_RECORD_BYTE_SIZE,
            )
        } else {
            (
                self.ilist_offset + idx * Self::chunks_per_inode(self.chunk_size),
                0,
            )
        }
    }

    fn read_record(&self, idx: usize) -> Result<INode> {
        let mut bytes = [0; INODE_RECORD_BYTE_SIZE];
        let (mut chunk_idx, mut offset) = self.record_position(idx);
        let mut done = 0;
        while done < INODE_RECORD_BYTE_SIZE {
            let len = (self.chunk_size - offset).min(INODE_RECORD_BYTE_SIZE - done);
            let dst = &mut bytes[done..done + len];
            self.disk
                .get_chunk(chunk_idx)?
                .read(offset, len, |src| dst.copy_from_slice(src))?;
            done += len;
            chunk_idx += 1;
            offset = 0;
        }
        Ok(INode::from_bytes(&bytes))
    }

    fn write_record(&self, idx: usize, inode: &INode) -> Result<()> {
        let bytes = inode.to_bytes();
        let (mut chunk_idx, mut offset) = self.record_position(idx);
        let mut done = 0;
        while done < INODE_RECORD_BYTE_SIZE {
            let len = (self.chunk_size - offset).min(INODE_RECORD_BYTE_SIZE - done);
            let src = &bytes[done..done + len];
            self.disk
                .get_chunk(chunk_idx)?
                .modify(offset, len, |dst| dst.copy_from_slice(src))?;
            done += len;
            chunk_idx += 1;
            offset = 0;
        }
        Ok(())
    }

    /// Check if the inode is in use
    ///
    /// # Returns
    /// * Ok(bool)
    /// * Err(InodeOutOfRange(idx))
    pub fn is_in_use(&self, idx: usize) -> Result<bool> {
        self.check_range(idx)?;
        Ok(self.used_inodes.lock().get(idx))
    }

    /// Get a copy of the inode record
    ///
    /// # Returns
    /// * Ok(INode)
    /// * Err(InodeOutOfRange(idx) | InodeNotInUse(idx))
    pub fn get_inode(&self, idx: usize) -> Result<INode> {
        if !self.is_in_use(idx)? {
            return Err(CFSError::InodeNotInUse(idx));
        }
        self.read_record(idx)
    }

    /// Save the inode record and mark it as used.
    /// If the inode is opened, the shared handle gets the new record too,
    /// so the caller must not hold the guard of that handle.
    ///
    /// # Returns
    /// * Ok(())
    /// * Err(InodeOutOfRange(idx))
    pub fn set_inode(&self, idx: usize, inode: &INode) -> Result<()> {
        self.check_range(idx)?;
        let inode_cache = self.inode_cache.lock();
        match inode_cache.get(&idx) {
            Some(handle) => {
                let mut opened = handle.lock();
                self.write_record(idx, inode)?;
                *opened = inode.clone();
            }
            None => self.write_record(idx, inode)?,
        }
        self.used_inodes.lock().set(idx);
        Ok(())
    }

    /// Mark the inode as free, the record and its data chunks are left as they are.
    /// The shared handle of the inode is released if it was opened.
    ///
    /// # Returns
    /// * Ok(())
    /// * Err(InodeOutOfRange(idx))
    pub fn free_inode(&self, idx: usize) -> Result<()> {
        self.check_range(idx)?;
        let mut inode_cache = self.inode_cache.lock();
        if let Some(handle) = inode_cache.remove(&idx) {
            handle.release();
        }
        self.used_inodes.lock().clr(idx);
        log::debug!("free inode {}", idx);
        Ok(())
    }

    /// Take the first free inode and zero its record
    ///
    /// # Returns
    /// * Ok(inode index)
    /// * Err(InodeTableFull)
    pub fn allocate_inode(&self) -> Result<usize> {
        let mut used_inodes = self.used_inodes.lock();
        let range = used_inodes.find_unset_bits(1);
        if range.is_empty() {
            log::warn!("inode table with {} inodes is full", self.inode_count);
            return Err(CFSError::InodeTableFull);
        }
        self.write_record(range.start_idx, &INode::empty())?;
        used_inodes.set(range.start_idx);
        log::debug!("allocate inode {}", range.start_idx);
        Ok(range.start_idx)
    }

    /// Open the inode, users who open the same inode at the same time share one handle
    ///
    /// # Returns
    /// * Ok(shared handle)
    /// * Err(InodeOutOfRange(idx) | InodeNotInUse(idx))
    pub fn open(&self, idx: usize) -> Result<Arc<OpenInode>> {
        let mut inode_cache = self.inode_cache.lock();
        if let Some(handle) = inode_cache.get(&idx) {
            if !handle.is_released() && self.is_in_use(idx)? {
                return Ok(handle);
            }
            return Err(CFSError::InodeNotInUse(idx));
        }
        let handle = Arc::new(OpenInode {
            idx,
            inode: Mutex::new(self.get_inode(idx)?),
            released: AtomicBool::new(false),
        });
        inode_cache.put(idx, &handle);
        Ok(handle)
    }

    /// Save the opened inode back to the table
    ///
    /// # Returns
    /// * Ok(())
    /// * Err(InodeNotInUse(idx)): the handle was released
    pub fn commit(&self, handle: &OpenInode) -> Result<()> {
        self.commit_locked(handle, &handle.lock())
    }

    /// Save the record of the opened inode, the caller holds the guard of the handle.
    /// The usage bit is never touched, a released handle can't bring the inode back.
    pub(crate) fn commit_locked(&self, handle: &OpenInode, inode: &INode) -> Result<()> {
        if handle.is_released() {
            return Err(CFSError::InodeNotInUse(handle.idx));
        }
        self.write_record(handle.idx, inode)
    }
}
