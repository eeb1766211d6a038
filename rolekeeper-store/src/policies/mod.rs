// SPDX-License-Identifier: MIT OR Apache-2.0

//! Community defaults and per-role overrides.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use traits::PolicyStore;
