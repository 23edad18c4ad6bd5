// @author:    olinex
// @time:      2023/11/03
#![cfg_attr(not(test), no_std)]

// self mods
pub mod block;
pub mod configs;
pub mod error;
pub mod layout;

// use other mods
#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
extern crate bitflags;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate alloc;

extern crate bit_field;
extern crate spin;

// reexports
pub use block::{Chunk, Disk, SharedObjectCache};
pub use error::{CFSError, Result};
pub use layout::{
    BitRange, DiskBitMap, FormatOptions, INode, INodeTable, InodeFlags, OpenInode, SuperBlock,
};
