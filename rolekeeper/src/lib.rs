// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remembers the roles of community members and restores them when they rejoin.
//!
//! A [`Warden`] sits between a chat platform and a policy and saved role store. It saves the live
//! role set of a member whenever it changes, grants the persisted subset back on rejoin and
//! cleans up after deleted roles and communities the agent was removed from.
//!
//! Which roles are persisted is decided per community and per role, see
//! [`rolekeeper_core::resolve`]. Whether a role can actually be granted is checked against the
//! live state of the platform, every saved role ends up with a [`RoleOutcome`] in the
//! [`RestorationReport`].
//!
//! ## Example
//!
//! ```rust
//! # use std::error::Error;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn Error>> {
//! use std::collections::BTreeSet;
//!
//! use rolekeeper::RoleOutcome;
//! use rolekeeper::test_utils::{TestPlatform, test_warden};
//! use rolekeeper_core::{CommunityId, RoleId, UserId};
//!
//! let community_id = CommunityId::new(1);
//! let user_id = UserId::new(2);
//! let role_id = RoleId::new(3);
//!
//! let platform = TestPlatform::new();
//! platform.add_role(community_id, role_id, 1);
//! platform.add_member(community_id, user_id, &[role_id]);
//!
//! let warden = test_warden(platform.clone());
//!
//! // Remember the role set while the member is present.
//! warden
//!     .on_roles_changed(community_id, user_id, None, &BTreeSet::from([role_id]))
//!     .await?;
//!
//! // Member leaves and comes back without any roles.
//! platform.add_member(community_id, user_id, &[]);
//! let report = warden.on_member_join(community_id, user_id).await?.unwrap();
//!
//! assert_eq!(report.outcome(role_id), Some(&RoleOutcome::Applied));
//! # Ok(())
//! # }
//! ```
mod builder;
mod commands;
pub mod events;
mod guard;
mod lifecycle;
pub mod log;
pub mod platform;
mod restore;
mod snapshot;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod warden;

#[cfg(test)]
mod tests;

pub use builder::WardenBuilder;
pub use commands::{Configuration, ConfiguredRole};
pub use events::{EventDispatcher, EventHandler, EventKind, EventSource, PlatformEvent};
pub use guard::{GuardError, RestorationGuard, RestorationPermit};
pub use lifecycle::ClearedCommunity;
pub use log::LogEntry;
pub use platform::{Platform, RoleInfo};
pub use restore::{RestorationOutcome, RestorationReport, RoleOutcome};
pub use snapshot::SnapshotOutcome;
pub use warden::{Config, Warden, WardenError, WardenStore};

/// Returns a builder for a warden backed by an SQLite database.
pub fn builder() -> WardenBuilder {
    WardenBuilder::new()
}
