//! Prism Core
//!
//! Foundational utilities shared by the Prism crates:
//!
//! - [`interner`]: process-wide string interning for flag names
//! - [`version`]: monotonic generation counters used for cache staleness

pub mod interner;
pub mod version;

pub use interner::Symbol;
pub use version::Generation;
