// @author:    olinex
// @time:      2023/11/06

// self mods

// use other mods
use alloc::sync::Arc;
use alloc::vec::Vec;
use bit_field::BitField;

// use self mods
use crate::block::{ArcChunkGuard, Chunk, Disk};
use crate::Result;

/// A range of bits in the bitmap
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BitRange {
    pub start_idx: usize,
    pub bit_count: usize,
}
impl BitRange {
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bit_count == 0
    }

    /// The index after the last bit of the range
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.start_idx + self.bit_count
    }
}

/// Build the first run of unset bits for every byte value.
/// Bits are scanned from bit 0 upward, a run which touches bit 7 may continue in the next byte.
fn build_find_unset_table() -> [BitRange; 256] {
    let mut table = [BitRange::default(); 256];
    for (value, range) in table.iter_mut().enumerate() {
        let byte = value as u8;
        if let Some(start) = (0..8).find(|bit| !byte.get_bit(*bit)) {
            let end = (start..8).find(|bit| byte.get_bit(*bit)).unwrap_or(8);
            *range = BitRange {
                start_idx: start,
                bit_count: end - start,
            };
        }
    }
    table
}

lazy_static! {
    static ref FIND_UNSET_TABLE: [BitRange; 256] = build_find_unset_table();
}

/// The bitmap laid across a range of the chunks of a disk.
/// Bits are packed into bytes least significant bit first,
/// an extra byte of padding follows the last bit.
///
/// All the backing chunks are checked out and locked as long as the bitmap lives,
/// so nobody else can touch the bitmap area behind its back.
pub struct DiskBitMap {
    /// Must be declared before `chunks`, the guards have to be released before the chunks are flushed
    guards: Vec<ArcChunkGuard>,
    chunks: Vec<Arc<Chunk>>,
    chunk_start: usize,
    chunk_size: usize,
    size_in_bits: usize,
}
impl DiskBitMap {
    /// Calculate the count of the chunks needed by a bitmap
    ///
    /// # Arguments
    /// * size_in_bits: the count of the usable bits
    /// * chunk_size: the byte size of each chunk
    pub fn chunks_for(size_in_bits: usize, chunk_size: usize) -> usize {
        (size_in_bits / 8 + 1).div_ceil(chunk_size)
    }

    /// Create a bitmap on the disk, the bits are kept as they are on the disk
    ///
    /// # Arguments
    /// * disk: the disk which stores the bitmap
    /// * chunk_start: the index of the first chunk of the bitmap
    /// * size_in_bits: the count of the usable bits
    ///
    /// # Returns
    /// * Ok(DiskBitMap)
    /// * Err(ChunkOutOfBounds(chunk_idx))
    pub fn new(disk: &Arc<Disk>, chunk_start: usize, size_in_bits: usize) -> Result<Self> {
        let chunk_size = disk.chunk_size();
        let size_chunks = Self::chunks_for(size_in_bits, chunk_size);
        let mut chunks = Vec::with_capacity(size_chunks);
        for chunk_idx in chunk_start..chunk_start + size_chunks {
            chunks.push(disk.get_chunk(chunk_idx)?);
        }
        let guards = chunks.iter().map(|chunk| chunk.lock_arc()).collect();
        Ok(Self {
            guards,
            chunks,
            chunk_start,
            chunk_size,
            size_in_bits,
        })
    }

    #[inline(always)]
    pub fn size_in_bits(&self) -> usize {
        self.size_in_bits
    }

    #[inline(always)]
    pub fn chunk_start(&self) -> usize {
        self.chunk_start
    }

    /// The byte size of the bitmap, including one byte of padding
    #[inline(always)]
    pub fn size_bytes(&self) -> usize {
        self.size_in_bits / 8 + 1
    }

    #[inline(always)]
    pub fn size_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Find the chunk and the byte offset in it which holds the bit
    #[inline(always)]
    fn locate(&self, bit_idx: usize) -> (usize, usize) {
        let byte_idx = bit_idx / 8;
        assert!(byte_idx < self.size_bytes(), "bit {} out of bitmap", bit_idx);
        (byte_idx / self.chunk_size, byte_idx % self.chunk_size)
    }

    #[inline(always)]
    fn byte(&self, byte_idx: usize) -> u8 {
        self.guards[byte_idx / self.chunk_size][byte_idx % self.chunk_size]
    }

    pub fn get(&self, bit_idx: usize) -> bool {
        let (chunk, offset) = self.locate(bit_idx);
        self.guards[chunk][offset].get_bit(bit_idx % 8)
    }

    pub fn set(&mut self, bit_idx: usize) {
        let (chunk, offset) = self.locate(bit_idx);
        self.guards[chunk][offset].set_bit(bit_idx % 8, true);
    }

    pub fn clr(&mut self, bit_idx: usize) {
        let (chunk, offset) = self.locate(bit_idx);
        self.guards[chunk][offset].set_bit(bit_idx % 8, false);
    }

    pub fn set_range(&mut self, range: &BitRange) {
        for bit_idx in range.start_idx..range.end() {
            self.set(bit_idx);
        }
    }

    pub fn clr_range(&mut self, range: &BitRange) {
        for bit_idx in range.start_idx..range.end() {
            self.clr(bit_idx);
        }
    }

    /// Find the first run of unset bits, the run will be no longer than the length.
    /// A shorter run may be returned if it comes first, the result is empty if no bit is unset.
    ///
    /// # Arguments
    /// * length: the wanted count of the bits
    pub fn find_unset_bits(&self, length: usize) -> BitRange {
        let mut found = BitRange::default();
        if length == 0 {
            return found;
        }
        for byte_idx in 0..self.size_bytes() {
            let run = FIND_UNSET_TABLE[self.byte(byte_idx) as usize];
            if run.is_empty() {
                if found.is_empty() {
                    continue;
                }
                break;
            }
            let start_idx = byte_idx * 8 + run.start_idx;
            if found.is_empty() {
                found = BitRange {
                    start_idx,
                    bit_count: run.bit_count,
                };
            } else if start_idx == found.end() {
                found.bit_count += run.bit_count;
            } else {
                break;
            }
            if found.bit_count >= length {
                break;
            }
        }
        if found.start_idx >= self.size_in_bits {
            return BitRange::default();
        }
        found.bit_count = found
            .bit_count
            .min(length)
            .min(self.size_in_bits - found.start_idx);
        found
    }

    /// Count the unset bits among the usable bits
    pub fn count_unset(&self) -> usize {
        (0..self.size_in_bits).filter(|bit_idx| !self.get(*bit_idx)).count()
    }

    /// Unset all the bits, then set the padding bits after the usable bits
    pub fn clear_all(&mut self) {
        for guard in self.guards.iter_mut() {
            guard.fill(0);
        }
        let guard_end = (self.size_in_bits + 8).min(self.size_bytes() * 8);
        for bit_idx in self.size_in_bits..guard_end {
            self.set(bit_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_unset_table() {
        let table = build_find_unset_table();
        assert_eq!(BitRange { start_idx: 0, bit_count: 8 }, table[0]);
        assert!(table[0xff].is_empty());
        assert_eq!(BitRange { start_idx: 1, bit_count: 7 }, table[0b0000_0001]);
        assert_eq!(BitRange { start_idx: 0, bit_count: 1 }, table[0b0000_0010]);
        assert_eq!(BitRange { start_idx: 4, bit_count: 4 }, table[0b0000_1111]);
        assert_eq!(BitRange { start_idx: 2, bit_count: 2 }, table[0b1111_0011]);
        assert_eq!(BitRange { start_idx: 7, bit_count: 1 }, table[0b0111_1111]);
    }

    #[test]
    fn test_bitmap_chunks_for() {
        assert_eq!(1, DiskBitMap::chunks_for(0, 64));
        assert_eq!(1, DiskBitMap::chunks_for(16, 64));
        assert_eq!(1, DiskBitMap::chunks_for(63 * 8, 64));
        assert_eq!(2, DiskBitMap::chunks_for(64 * 8, 64));
    }

    #[test]
    fn test_bitmap_get_set_clr() {
        let disk = Disk::new(4, 16);
        let mut bitmap = DiskBitMap::new(&disk, 1, 200).unwrap();
        assert_eq!(26, bitmap.size_bytes());
        assert_eq!(2, bitmap.size_chunks());
        bitmap.clear_all();
        assert!(!bitmap.get(0));
        bitmap.set(0);
        bitmap.set(9);
        // crosses the chunk boundary
        bitmap.set(16 * 8 + 3);
        assert!(bitmap.get(0));
        assert!(bitmap.get(9));
        assert!(bitmap.get(131));
        assert!(!bitmap.get(130));
        bitmap.clr(9);
        assert!(!bitmap.get(9));
        assert_eq!(198, bitmap.count_unset());
        drop(bitmap);

        // least significant bit first
        let image = disk.snapshot();
        assert_eq!(0b0000_0001, image[16]);
        assert_eq!(0b0000_0000, image[17]);
        assert_eq!(0b0000_1000, image[32]);
    }

    #[test]
    fn test_bitmap_holds_chunks() {
        let disk = Disk::new(4, 16);
        let bitmap = DiskBitMap::new(&disk, 0, 8).unwrap();
        assert_eq!(1, disk.live_chunks());
        assert!(disk.try_close().is_err());
        drop(bitmap);
        assert!(disk.try_close().is_ok());
    }

    #[test]
    fn test_bitmap_clear_all_sets_padding() {
        let disk = Disk::new(2, 16);
        let mut bitmap = DiskBitMap::new(&disk, 0, 16).unwrap();
        bitmap.set(3);
        bitmap.clear_all();
        assert!((0..16).all(|bit_idx| !bitmap.get(bit_idx)));
        assert!((16..24).all(|bit_idx| bitmap.get(bit_idx)));

        let mut bitmap = DiskBitMap::new(&disk, 1, 12).unwrap();
        bitmap.clear_all();
        assert!((0..12).all(|bit_idx| !bitmap.get(bit_idx)));
        assert!((12..16).all(|bit_idx| bitmap.get(bit_idx)));
    }

    #[test]
    fn test_bitmap_find_unset_bits_empty() {
        let disk = Disk::new(4, 16);
        let mut bitmap = DiskBitMap::new(&disk, 0, 100).unwrap();
        bitmap.clear_all();
        assert_eq!(BitRange { start_idx: 0, bit_count: 1 }, bitmap.find_unset_bits(1));
        assert_eq!(BitRange { start_idx: 0, bit_count: 13 }, bitmap.find_unset_bits(13));
        assert_eq!(BitRange { start_idx: 0, bit_count: 100 }, bitmap.find_unset_bits(100));
        assert_eq!(BitRange { start_idx: 0, bit_count: 100 }, bitmap.find_unset_bits(500));
        assert!(bitmap.find_unset_bits(0).is_empty());
    }

    #[test]
    fn test_bitmap_find_unset_bits_stops_at_set_bit() {
        let disk = Disk::new(4, 16);
        let mut bitmap = DiskBitMap::new(&disk, 0, 64).unwrap();
        for k in 1..20 {
            bitmap.clear_all();
            bitmap.set(k);
            assert_eq!(
                BitRange { start_idx: 0, bit_count: k },
                bitmap.find_unset_bits(20)
            );
        }
    }

    #[test]
    fn test_bitmap_find_unset_bits_skips_used() {
        let disk = Disk::new(4, 16);
        let mut bitmap = DiskBitMap::new(&disk, 0, 64).unwrap();
        bitmap.clear_all();
        bitmap.set_range(&BitRange { start_idx: 0, bit_count: 11 });
        assert_eq!(BitRange { start_idx: 11, bit_count: 1 }, bitmap.find_unset_bits(1));
        assert_eq!(BitRange { start_idx: 11, bit_count: 9 }, bitmap.find_unset_bits(9));
        bitmap.set(14);
        assert_eq!(BitRange { start_idx: 11, bit_count: 3 }, bitmap.find_unset_bits(9));
        bitmap.clr_range(&BitRange { start_idx: 2, bit_count: 3 });
        assert_eq!(BitRange { start_idx: 2, bit_count: 3 }, bitmap.find_unset_bits(8));
    }

    #[test]
    fn test_bitmap_find_unset_bits_full() {
        let disk = Disk::new(4, 16);
        let mut bitmap = DiskBitMap::new(&disk, 0, 20).unwrap();
        bitmap.clear_all();
        bitmap.set_range(&BitRange { start_idx: 0, bit_count: 20 });
        assert!(bitmap.find_unset_bits(1).is_empty());
        assert_eq!(0, bitmap.count_unset());
        bitmap.clr(19);
        assert_eq!(BitRange { start_idx: 19, bit_count: 1 }, bitmap.find_unset_bits(4));
    }
}
