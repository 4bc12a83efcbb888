//! Infrastructure layer - engine adapters
//!
//! - `memory`: single-process engine honouring the bulk, versioning,
//!   alias, scroll and recovery contracts of [`crate::SearchEngine`]

pub mod memory;

pub use memory::InMemorySearchEngine;
