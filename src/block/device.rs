// @author:    olinex
// @time:      2023/11/04

// self mods

// use other mods
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

// use self mods
use super::cache::SharedObjectCache;
use super::chunk::Chunk;
use crate::{CFSError, Result};

/// Everything guarded by the disk wide lock
struct DiskState {
    /// the backing bytes standing in for the device
    data: Vec<u8>,
    /// the chunks which are checked out at the moment
    chunk_cache: SharedObjectCache<usize, Chunk>,
    /// indexes of the chunks which were created and not written back yet.
    /// A chunk whose last reference was dropped stays here until its flush lands.
    unflushed: BTreeSet<usize>,
}

/// The simulated block device.
/// Data is stored into the memory and partitioned into chunks of the same size.
/// It also acts as the cache of the checked out chunks,
/// so the same chunk can be accessed and modified in multiple places at the same time.
pub struct Disk {
    chunk_count: usize,
    chunk_size: usize,
    state: Mutex<DiskState>,
}
impl Disk {
    /// Create a new disk whose bytes are all zero
    ///
    /// # Arguments
    /// * chunk_count: the count of the chunks
    /// * chunk_size: the byte size of each chunk
    pub fn new(chunk_count: usize, chunk_size: usize) -> Arc<Self> {
        Self::from_image(chunk_size, vec![0; chunk_count * chunk_size])
    }

    /// Create a disk over an existing image, trailing bytes which don't fill a whole chunk are dropped
    ///
    /// # Arguments
    /// * chunk_size: the byte size of each chunk
    /// * image: the bytes of the disk
    pub fn from_image(chunk_size: usize, mut image: Vec<u8>) -> Arc<Self> {
        assert!(chunk_size > 0);
        let chunk_count = image.len() / chunk_size;
        image.truncate(chunk_count * chunk_size);
        log::debug!("create disk with {} chunks of {} bytes", chunk_count, chunk_size);
        Arc::new(Self {
            chunk_count,
            chunk_size,
            state: Mutex::new(DiskState {
                data: image,
                chunk_cache: SharedObjectCache::new(),
                unflushed: BTreeSet::new(),
            }),
        })
    }

    #[inline(always)]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[inline(always)]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline(always)]
    pub fn size_bytes(&self) -> usize {
        self.chunk_count * self.chunk_size
    }

    /// The count of the chunks which are checked out or still waiting for being written back
    pub fn live_chunks(&self) -> usize {
        self.state.lock().unflushed.len()
    }

    /// Check if the chunk is checked out or still waiting for being written back
    pub fn is_checked_out(&self, chunk_idx: usize) -> bool {
        self.state.lock().unflushed.contains(&chunk_idx)
    }

    /// Copy the backing bytes out.
    /// Modifications in chunks which are still checked out are not included.
    pub fn snapshot(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Get the chunk of the index.
    /// If the chunk is already checked out, the shared chunk will be returned,
    /// otherwise the bytes will be copied from the disk into a new chunk.
    ///
    /// # Arguments
    /// * chunk_idx: the index of the chunk
    ///
    /// # Returns
    /// * Ok(shared chunk)
    /// * Err(ChunkOutOfBounds(chunk_idx))
    pub fn get_chunk(self: &Arc<Self>, chunk_idx: usize) -> Result<Arc<Chunk>> {
        if chunk_idx >= self.chunk_count {
            return Err(CFSError::ChunkOutOfBounds(chunk_idx));
        }
        loop {
            let mut state = self.state.lock();
            if let Some(chunk) = state.chunk_cache.get(&chunk_idx) {
                return Ok(chunk);
            }
            if state.unflushed.contains(&chunk_idx) {
                // the last owner is dropping it, wait for the bytes to come back
                drop(state);
                core::hint::spin_loop();
                continue;
            }
            let start = chunk_idx * self.chunk_size;
            let data = state.data[start..start + self.chunk_size].to_vec();
            let chunk = Arc::new(Chunk::new(chunk_idx, Arc::clone(self), data));
            state.chunk_cache.put(chunk_idx, &chunk);
            state.unflushed.insert(chunk_idx);
            log::trace!("check out chunk {}", chunk_idx);
            return Ok(chunk);
        }
    }

    /// Write the chunk bytes back, only called when the last reference of the chunk is dropped
    ///
    /// # Arguments
    /// * chunk: the chunk which is dropping
    pub(crate) fn flush_chunk(&self, chunk: &Chunk) {
        let mut state = self.state.lock();
        assert_eq!(chunk.size(), self.chunk_size);
        assert!(core::ptr::eq(Arc::as_ptr(chunk.disk()), self));
        let start = chunk.idx() * self.chunk_size;
        state.data[start..start + self.chunk_size].copy_from_slice(&chunk.lock());
        state.unflushed.remove(&chunk.idx());
        log::trace!("flush chunk {}", chunk.idx());
    }

    /// Check if the disk can be closed safely
    ///
    /// # Returns
    /// * Ok(())
    /// * Err(StillReferenced(count of live chunks))
    pub fn try_close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.chunk_cache.sweep(true);
        let live = state.chunk_cache.len().max(state.unflushed.len());
        if live > 0 {
            log::warn!("disk still has {} chunks referenced", live);
            Err(CFSError::StillReferenced(live))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_disk_new() {
        let disk = Disk::new(16, 64);
        assert_eq!(16, disk.chunk_count());
        assert_eq!(64, disk.chunk_size());
        assert_eq!(1024, disk.size_bytes());
        assert!(disk.snapshot().iter().all(|b| *b == 0));

        let disk = Disk::from_image(64, vec![1; 64 * 3 + 10]);
        assert_eq!(3, disk.chunk_count());
        assert_eq!(64 * 3, disk.snapshot().len());
    }

    #[test]
    fn test_disk_get_chunk_out_of_bounds() {
        let disk = Disk::new(4, 32);
        assert!(disk.get_chunk(0).is_ok());
        assert!(disk.get_chunk(3).is_ok());
        assert!(disk
            .get_chunk(4)
            .is_err_and(|e| e.is_chunkoutofbounds()));
    }

    #[test]
    fn test_disk_get_chunk_shared() {
        let disk = Disk::new(4, 32);
        let chunk1 = disk.get_chunk(1).unwrap();
        let chunk2 = disk.get_chunk(1).unwrap();
        assert!(Arc::ptr_eq(&chunk1, &chunk2));
        chunk1.modify(0, 4, |bytes| bytes.copy_from_slice(&[1, 2, 3, 4])).unwrap();
        assert!(chunk2
            .read(0, 4, |bytes| bytes == [1, 2, 3, 4])
            .is_ok_and(|v| v));
        let chunk3 = disk.get_chunk(2).unwrap();
        assert!(!Arc::ptr_eq(&chunk1, &chunk3));
    }

    #[test]
    fn test_disk_flush_round_trip() {
        let disk = Disk::new(4, 32);
        let chunk = disk.get_chunk(3).unwrap();
        chunk.modify(30, 2, |bytes| bytes.copy_from_slice(&[0xab, 0xcd])).unwrap();
        drop(chunk);
        let chunk = disk.get_chunk(3).unwrap();
        assert!(chunk
            .read(30, 2, |bytes| bytes == [0xab, 0xcd])
            .is_ok_and(|v| v));
        assert!(chunk.read(0, 30, |bytes| bytes.iter().all(|b| *b == 0)).is_ok_and(|v| v));
    }

    #[test]
    fn test_disk_try_close() {
        let disk = Disk::new(4, 32);
        assert!(disk.try_close().is_ok());
        let chunk1 = disk.get_chunk(0).unwrap();
        let chunk2 = disk.get_chunk(1).unwrap();
        assert!(disk
            .try_close()
            .is_err_and(|e| matches!(e, CFSError::StillReferenced(2))));
        drop(chunk1);
        assert!(disk.try_close().is_err_and(|e| e.is_stillreferenced()));
        drop(chunk2);
        assert!(disk.try_close().is_ok());
    }

    #[test]
    fn test_disk_get_chunk_waits_for_pending_flush() {
        let disk = Disk::new(4, 64);
        // chunk 1 was dropped by its last owner, but the bytes are not written back yet
        disk.state.lock().unflushed.insert(1);
        assert!(disk.is_checked_out(1));
        let waiter = {
            let disk = Arc::clone(&disk);
            thread::spawn(move || disk.get_chunk(1).unwrap().read(0, 1, |bytes| bytes[0]).unwrap())
        };
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());
        {
            let mut state = disk.state.lock();
            state.data[64] = 7;
            state.unflushed.remove(&1);
        }
        assert_eq!(7, waiter.join().unwrap());
        assert!(disk.try_close().is_ok());
    }

    #[test]
    fn test_disk_last_drop_races_get_chunk() {
        let disk = Disk::new(2, 64);
        let rounds = 2000u64;
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let disk = Arc::clone(&disk);
                thread::spawn(move || {
                    for _ in 0..rounds {
                        // the chunk is dropped at the end of each round,
                        // racing with the other thread checking it out again
                        disk.get_chunk(1)
                            .unwrap()
                            .modify(0, 8, |bytes| {
                                let mut value = [0; 8];
                                value.copy_from_slice(bytes);
                                let value = u64::from_le_bytes(value) + 1;
                                bytes.copy_from_slice(&value.to_le_bytes());
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(disk.try_close().is_ok());
        let mut value = [0; 8];
        value.copy_from_slice(&disk.snapshot()[64..72]);
        assert_eq!(rounds * 2, u64::from_le_bytes(value));
    }

    #[test]
    fn test_disk_concurrent_get_chunk() {
        let disk = Disk::new(8, 64);
        let handles: Vec<_> = (0..8)
            .map(|offset| {
                let disk = Arc::clone(&disk);
                thread::spawn(move || {
                    for round in 0..200 {
                        let chunk = disk.get_chunk(round % 8).unwrap();
                        let mut bytes = chunk.lock();
                        bytes[offset] = bytes[offset].wrapping_add(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(disk.try_close().is_ok());
        let image = disk.snapshot();
        for chunk_idx in 0..8 {
            for offset in 0..8 {
                assert_eq!(25, image[chunk_idx * 64 + offset]);
            }
        }
    }
}
