//! MemOSD server
//!
//! The serving half of the daemon:
//! - Per-request op dispatch over the object store
//! - Peer sessions speaking the framed op protocol
//! - The monitor client and the boot / mark-down lifecycle
//!
//! Everything runs on one executor. Server state is reference-counted
//! without atomics (`Rc<RefCell<..>>`); a request runs from decode to
//! reply enqueue without yielding, so requests never interleave. Sharding
//! the object table across executors by `(pool, hash)` is the intended
//! scale-out path and needs no shared mutable state.

pub mod dispatch;
pub mod mon;
pub mod server;
pub mod session;

pub use dispatch::{ClassLoader, execute_request};
pub use mon::{MonClient, MonitorClient};
pub use server::{MAP_POLL_INTERVAL, OsdServer, STARTUP_TIMEOUT};
pub use session::{ServerShared, run_session};
