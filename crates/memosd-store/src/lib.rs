//! MemOSD storage engine - in-memory sparse block store
//!
//! Objects live entirely in RAM as sparse collections of fixed 64 KiB
//! blocks. Blocks appear lazily on first write and vanish with their
//! object; unwritten ranges read back as zeros.

pub mod store;

pub use store::{BLOCK_SHIFT, BLOCK_SIZE, ObjectStore, StoredObject};
