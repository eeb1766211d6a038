// SPDX-License-Identifier: MIT OR Apache-2.0

//! Last known role set of every member.
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use traits::SavedRoleStore;
