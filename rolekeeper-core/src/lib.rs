// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data types of rolekeeper.
//!
//! rolekeeper remembers which roles a member held in a community and grants the subset the
//! community wants persisted again when the member rejoins. This crate contains everything which
//! can be expressed without any I/O:
//!
//! - Platform identifiers (`CommunityId`, `RoleId`, `UserId`, `ChannelId`)
//! - Community- and role-level policies and their stable encodings
//! - The saved role set of a member
//! - Permission bitmasks and the classification of "dangerous" roles
//! - Millisecond timestamps with a monotonic clock
//! - The action resolver deciding if a single role gets persisted or ignored
//!
//! ## Resolving a role
//!
//! ```rust
//! use rolekeeper_core::{
//!     CommunityId, CommunityPolicy, DangerousMode, Disposition, Permissions, RoleAction, RoleId,
//!     RolePolicy, resolve,
//! };
//!
//! let community_id = CommunityId::new(1);
//!
//! let mut community = CommunityPolicy::new(community_id);
//! community.dangerous_mode = DangerousMode::AlwaysIgnore;
//!
//! let moderator = RolePolicy::new(RoleId::new(2), community_id, RoleAction::Persist);
//! let permissions = Permissions::KICK_MEMBERS | Permissions::SEND_MESSAGES;
//!
//! // Dangerous roles are never restored in this community, even if explicitly configured.
//! assert_eq!(
//!     resolve(&community, &moderator, permissions.is_dangerous()),
//!     Disposition::Ignore
//! );
//! ```
mod ids;
mod permissions;
mod policy;
mod resolver;
mod saved;
mod timestamp;

pub use ids::{ChannelId, CommunityId, RoleId, UserId};
pub use permissions::Permissions;
pub use policy::{CommunityPolicy, DangerousMode, LogFlags, PolicyError, RoleAction, RolePolicy};
pub use resolver::{Disposition, resolve};
pub use saved::SavedRoleSet;
pub use timestamp::{MonotonicClock, Timestamp};
