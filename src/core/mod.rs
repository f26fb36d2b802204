// Storage primitives: framing, the two entry stores, exclusion, and cancellation.
pub mod abort;
pub mod assembler;
pub mod device;
pub mod entry;
pub mod error;
pub mod exclusion;
pub mod file_store;
pub mod ring;
pub mod store;
