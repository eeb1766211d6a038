// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence for rolekeeper policies and saved role sets.
//!
//! Two storage interfaces are defined here:
//!
//! - `PolicyStore`: community defaults and per-role overrides
//! - `SavedRoleStore`: the last known role set of every member
//!
//! Both are implemented by an in-memory store (feature `memory`) and an SQLite store (feature
//! `sqlite`). Writes happen inside transactions which are strictly serialized, see
//! `Transaction`.
#[cfg(feature = "memory")]
pub mod memory;
pub mod policies;
pub mod saved_roles;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test_utils"))]
mod test_utils;
mod traits;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use policies::PolicyStore;
pub use saved_roles::SavedRoleStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
pub use traits::Transaction;
