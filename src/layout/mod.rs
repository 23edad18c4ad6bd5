// @author:    olinex
// @time:      2023/11/08

// self mods
mod bitmap;
mod inode;
mod inode_table;
mod super_block;

// use other mods

// use self mods

// reexport
pub use bitmap::*;
pub use inode::*;
pub use inode_table::*;
pub use super_block::*;
