// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface to the chat platform.
use std::collections::BTreeSet;
use std::error::Error;

use rolekeeper_core::{ChannelId, CommunityId, Permissions, RoleId, UserId};

use crate::log::LogEntry;

/// Live state of a role as the platform reports it right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleInfo {
    pub role_id: RoleId,

    /// Role is owned by an integration and can't be granted by general role management.
    pub managed: bool,

    /// Position in the role hierarchy, higher ranks outrank lower ones.
    pub rank: u32,

    pub permissions: Permissions,
}

impl RoleInfo {
    pub fn is_dangerous(&self) -> bool {
        self.permissions.is_dangerous()
    }
}

/// Capability checks and actions rolekeeper needs from the platform gateway.
///
/// Every call is a suspension point and may fail for transient reasons (network, rate limits).
/// Implementations are expected to retry according to their own backoff policy before returning
/// an error.
pub trait Platform: Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Looks up a role in a community. Returns `None` if it doesn't exist (anymore).
    fn role(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
    ) -> impl Future<Output = Result<Option<RoleInfo>, Self::Error>> + Send;

    /// Returns `true` if the acting agent is allowed to manage roles in this community.
    fn can_manage_roles(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Highest rank among the roles of the acting agent, ignoring the "everyone" role.
    ///
    /// Only roles ranked strictly below can be granted.
    fn highest_rank(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<u32, Self::Error>> + Send;

    /// Current role set of a member, `None` if they are not a member of the community.
    fn member_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<BTreeSet<RoleId>>, Self::Error>> + Send;

    /// Grants a role to a member, the optional reason ends up in the platform's audit log.
    fn grant_role(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<&str>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns `true` if the channel exists in the community and the agent can post log entries
    /// into it.
    fn log_destination_ready(
        &self,
        community_id: CommunityId,
        channel_id: ChannelId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Posts a log entry into a channel.
    fn send_log(
        &self,
        channel_id: ChannelId,
        entry: &LogEntry,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
