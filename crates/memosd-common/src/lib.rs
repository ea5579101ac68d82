//! MemOSD common definitions
//!
//! This crate defines the types shared by every MemOSD component:
//! - The error taxonomy and the `Result` alias
//! - Object identities, timestamps and placement-group ids
//! - Daemon configuration options

pub mod config;
pub mod error;
pub mod types;

pub use config::{OsdOptions, parse_osd_id};
pub use error::{Error, Result};
pub use types::{MAX_NAME_LEN, ObjectIdentity, PgId, Spg, Timestamp, name_hash};
