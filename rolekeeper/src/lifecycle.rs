// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cleanup when communities, roles or members go away.
use rolekeeper_core::{CommunityId, LogFlags, RoleId, UserId};
use rolekeeper_store::{PolicyStore, SavedRoleStore, Transaction};
use tracing::{debug, info};

use crate::log::LogEntry;
use crate::platform::Platform;
use crate::warden::{Warden, WardenError, WardenStore};

/// Number of records removed while clearing a community.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearedCommunity {
    pub community_policy: bool,
    pub role_policies: usize,
    pub saved_roles: usize,
}

impl<S, P> Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    /// Removes everything known about a community after the agent was removed from it.
    pub async fn on_community_left(
        &self,
        community_id: CommunityId,
    ) -> Result<ClearedCommunity, WardenError> {
        let cleared = self.clear_community(community_id).await?;
        info!(
            community = %community_id,
            role_policies = cleared.role_policies,
            saved_roles = cleared.saved_roles,
            "left community, cleared state"
        );
        Ok(cleared)
    }

    /// Resets any state left over from an earlier stay in this community.
    pub async fn on_community_joined(
        &self,
        community_id: CommunityId,
    ) -> Result<ClearedCommunity, WardenError> {
        let cleared = self.clear_community(community_id).await?;
        info!(community = %community_id, "joined community, reset stale state");
        Ok(cleared)
    }

    /// Removes the policy of a role which was deleted on the platform.
    pub async fn on_role_deleted(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
    ) -> Result<bool, WardenError> {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = self
            .store
            .remove_role_policy(role_id)
            .await
            .map_err(WardenError::store);
        let removed = self.finish(permit, result).await?;

        debug!(
            community = %community_id,
            role = %role_id,
            removed,
            "role deleted"
        );

        Ok(removed)
    }

    /// Handles a member leaving the community.
    ///
    /// The saved role set stays untouched, it was kept up to date while the member was present.
    /// Returns `true` if a "saved" entry was posted into the community's log channel.
    pub async fn on_member_left(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<bool, WardenError> {
        let policy = self
            .store
            .community_policy(community_id)
            .await
            .map_err(WardenError::store)?;

        let Some(channel_id) = policy.log_destination(LogFlags::SAVED) else {
            return Ok(false);
        };

        let role_ids = self
            .store
            .saved_roles(community_id, user_id)
            .await
            .map_err(WardenError::store)?
            .map(|saved| saved.role_ids.into_iter().collect())
            .unwrap_or_default();

        debug!(
            community = %community_id,
            user = %user_id,
            channel = %channel_id,
            "member left, logging saved roles"
        );

        let entry = LogEntry::Saved {
            community_id,
            user_id,
            role_ids,
        };
        Ok(self.emit_log(&policy, entry).await)
    }

    async fn clear_community(
        &self,
        community_id: CommunityId,
    ) -> Result<ClearedCommunity, WardenError> {
        // Policies and saved role sets are cleared in two separate transactions.
        let (community_policy, role_policies) = self.clear_policies(community_id).await?;
        let saved_roles = self.clear_saved_roles(community_id).await?;

        Ok(ClearedCommunity {
            community_policy,
            role_policies,
            saved_roles,
        })
    }

    async fn clear_policies(
        &self,
        community_id: CommunityId,
    ) -> Result<(bool, usize), WardenError> {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = async {
            let community_policy = self
                .store
                .remove_community_policy(community_id)
                .await
                .map_err(WardenError::store)?;
            let role_policies = self
                .store
                .clear_role_policies(community_id)
                .await
                .map_err(WardenError::store)?;
            Ok::<_, WardenError>((community_policy, role_policies))
        }
        .await;
        self.finish(permit, result).await
    }

    async fn clear_saved_roles(&self, community_id: CommunityId) -> Result<usize, WardenError> {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = self
            .store
            .clear_saved_roles(community_id)
            .await
            .map_err(WardenError::store);
        self.finish(permit, result).await
    }
}
