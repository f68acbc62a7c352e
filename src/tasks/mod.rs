//! Background Tasks Module
//!
//! Optional maintenance tasks an embedding application can run alongside
//! the cache.
//!
//! # Tasks
//! - Expiry Sweep: Removes expired cache entries at a fixed interval

mod sweep;

pub use sweep::spawn_sweep_task;
