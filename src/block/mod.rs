// @author:    olinex
// @time:      2023/11/04

// self mods
mod cache;
mod chunk;
mod device;

// use other mods

// use self mods

// reexport
pub use cache::*;
pub use chunk::*;
pub use device::*;
