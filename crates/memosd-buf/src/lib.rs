//! MemOSD buffer primitives
//!
//! This crate provides the memory plumbing shared by the networking layer
//! and the object store:
//! - Zeroed power-of-two page allocations ([`Page`])
//! - Owned page-vector buffers carried in messages ([`PageVec`], [`BufferRef`])
//! - A scatter/gather cursor over mixed backing memories ([`BufferCursor`])
//!
//! The cursor lets payload bytes flow from the wire into store blocks, and
//! from store blocks back onto the wire, without an intermediate copy.

pub mod cursor;
pub mod page;

pub use cursor::{BufferCursor, CursorBuf, Direction, KernelSeg, UserSeg};
pub use page::{BufferRef, PAGE_SHIFT, PAGE_SIZE, Page, PageExtent, PageVec, order_for};
