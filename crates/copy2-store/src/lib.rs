//! Bounded clipboard history with eviction protection.
//!
//! - [`ProtectedStore`]: ordered, de-duplicated entries that respect a soft
//!   cap, a fixed hard cap, and protection flags that forbid eviction.
//! - [`Capacity`]: the clamped soft cap plus the fixed bounds.
//! - JSON persistence of the store files and the export document.

mod capacity;
mod persist;
mod store;

pub use capacity::{Capacity, DEFAULT_CAPACITY, HARD_CAPACITY, MIN_CAPACITY};
pub use persist::{ExportDocument, PersistError, StoreFiles, read_export, write_atomic, write_export};
pub use store::{
    AddOutcome, CapacityReport, Entry, EvictionReport, ImportReport, Protection, ProtectionFlags,
    ProtectedStore, StoreSnapshot,
};
