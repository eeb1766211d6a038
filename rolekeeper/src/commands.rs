// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request/response API for the command layer.
use rolekeeper_core::{
    ChannelId, CommunityId, CommunityPolicy, DangerousMode, Disposition, LogFlags, RoleAction,
    RoleId, RolePolicy, SavedRoleSet, UserId, resolve,
};
use rolekeeper_store::{PolicyStore, SavedRoleStore, Transaction};
use tracing::info;

use crate::platform::{Platform, RoleInfo};
use crate::warden::{Warden, WardenError, WardenStore};

/// Explicitly configured role as shown in the configuration overview.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfiguredRole {
    pub role_id: RoleId,
    pub action: RoleAction,
    pub is_dangerous: bool,

    /// What actually happens to this role on restoration.
    pub disposition: Disposition,
}

/// Current configuration of a community.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration {
    pub policy: CommunityPolicy,

    /// Default action with "unset" mapped to what it means in practice.
    pub effective_default_action: RoleAction,

    /// `Some(true)` if a log channel is configured and reachable, `None` if none is configured.
    pub log_channel_ready: Option<bool>,

    /// Explicitly configured roles which still exist, ordered by role id.
    pub roles: Vec<ConfiguredRole>,
}

impl<S, P> Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    pub async fn community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<CommunityPolicy, WardenError> {
        self.store
            .community_policy(community_id)
            .await
            .map_err(WardenError::store)
    }

    pub async fn set_community_policy(&self, policy: &CommunityPolicy) -> Result<(), WardenError> {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = self
            .store
            .set_community_policy(policy)
            .await
            .map_err(WardenError::store);
        self.finish(permit, result).await?;

        info!(
            community = %policy.community_id,
            default_action = %policy.default_action,
            dangerous_mode = %policy.dangerous_mode,
            log_flags = %policy.log_flags,
            "community policy updated"
        );
        Ok(())
    }

    pub async fn set_default_action(
        &self,
        community_id: CommunityId,
        action: RoleAction,
    ) -> Result<CommunityPolicy, WardenError> {
        self.update_community_policy(community_id, |policy| policy.default_action = action)
            .await
    }

    pub async fn set_dangerous_mode(
        &self,
        community_id: CommunityId,
        mode: DangerousMode,
    ) -> Result<CommunityPolicy, WardenError> {
        self.update_community_policy(community_id, |policy| policy.dangerous_mode = mode)
            .await
    }

    /// Sets the log channel of a community.
    ///
    /// The channel is stored even if the agent can't post into it yet, the returned flag tells if
    /// it is reachable right now.
    pub async fn set_log_channel(
        &self,
        community_id: CommunityId,
        channel_id: ChannelId,
    ) -> Result<(CommunityPolicy, bool), WardenError> {
        let policy = self
            .update_community_policy(community_id, |policy| policy.log_channel = Some(channel_id))
            .await?;
        let ready = self
            .platform
            .log_destination_ready(community_id, channel_id)
            .await
            .map_err(WardenError::platform)?;
        Ok((policy, ready))
    }

    pub async fn remove_log_channel(
        &self,
        community_id: CommunityId,
    ) -> Result<CommunityPolicy, WardenError> {
        self.update_community_policy(community_id, |policy| policy.log_channel = None)
            .await
    }

    /// Enables or disables one kind of log entry, other kinds are left untouched.
    pub async fn set_log_flag(
        &self,
        community_id: CommunityId,
        flag: LogFlags,
        enabled: bool,
    ) -> Result<CommunityPolicy, WardenError> {
        self.update_community_policy(community_id, |policy| {
            policy.log_flags.set(flag, enabled)
        })
        .await
    }

    async fn update_community_policy<F>(
        &self,
        community_id: CommunityId,
        update: F,
    ) -> Result<CommunityPolicy, WardenError>
    where
        F: FnOnce(&mut CommunityPolicy) + Send,
    {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = async {
            let mut policy = self
                .store
                .community_policy(community_id)
                .await
                .map_err(WardenError::store)?;
            update(&mut policy);
            self.store
                .set_community_policy(&policy)
                .await
                .map_err(WardenError::store)?;
            Ok::<_, WardenError>(policy)
        }
        .await;
        let policy = self.finish(permit, result).await?;

        info!(
            community = %community_id,
            default_action = %policy.default_action,
            dangerous_mode = %policy.dangerous_mode,
            log_flags = %policy.log_flags,
            "community policy updated"
        );
        Ok(policy)
    }

    pub async fn role_policy(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
    ) -> Result<RolePolicy, WardenError> {
        self.store
            .role_policy(role_id, community_id)
            .await
            .map_err(WardenError::store)
    }

    /// Configures the action of a role.
    ///
    /// Fails with `RoleNotInCommunity` if the role doesn't exist in this community. Resetting a
    /// role to `Unset` always works, also for roles which are gone already.
    pub async fn set_role_policy(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
        action: RoleAction,
    ) -> Result<RolePolicy, WardenError> {
        if !action.is_unset() {
            let role = self
                .platform
                .role(community_id, role_id)
                .await
                .map_err(WardenError::platform)?;
            if role.is_none() {
                return Err(WardenError::RoleNotInCommunity {
                    role_id,
                    community_id,
                });
            }
        }

        let policy = RolePolicy::new(role_id, community_id, action);

        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = self
            .store
            .set_role_policy(&policy)
            .await
            .map_err(WardenError::store);
        self.finish(permit, result).await?;

        info!(community = %community_id, role = %role_id, %action, "role policy updated");
        Ok(policy)
    }

    /// Resets all roles of a community to `Unset`. Returns the number of removed policies.
    pub async fn clear_role_policies(
        &self,
        community_id: CommunityId,
    ) -> Result<usize, WardenError> {
        let permit = self.store.begin().await.map_err(WardenError::store)?;
        let result = self
            .store
            .clear_role_policies(community_id)
            .await
            .map_err(WardenError::store);
        let removed = self.finish(permit, result).await?;

        info!(community = %community_id, removed, "role policies reset");
        Ok(removed)
    }

    pub async fn saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<SavedRoleSet>, WardenError> {
        self.store
            .saved_roles(community_id, user_id)
            .await
            .map_err(WardenError::store)
    }

    /// Tells what a restoration would do with this role right now, based on the stored policies
    /// and the live permissions of the role.
    pub async fn resolve_action(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
    ) -> Result<Disposition, WardenError> {
        let policy = self.community_policy(community_id).await?;
        let role_policy = self.role_policy(community_id, role_id).await?;
        let is_dangerous = self
            .platform
            .role(community_id, role_id)
            .await
            .map_err(WardenError::platform)?
            .as_ref()
            .is_some_and(RoleInfo::is_dangerous);

        Ok(resolve(&policy, &role_policy, is_dangerous))
    }

    /// Collects everything the "show configuration" command displays.
    pub async fn configuration(
        &self,
        community_id: CommunityId,
    ) -> Result<Configuration, WardenError> {
        let policy = self.community_policy(community_id).await?;
        let role_policies = self
            .store
            .community_role_policies(community_id)
            .await
            .map_err(WardenError::store)?;

        let mut roles = Vec::with_capacity(role_policies.len());
        for role_policy in role_policies {
            let Some(role) = self
                .platform
                .role(community_id, role_policy.role_id)
                .await
                .map_err(WardenError::platform)?
            else {
                continue;
            };

            let is_dangerous = role.is_dangerous();
            roles.push(ConfiguredRole {
                role_id: role_policy.role_id,
                action: role_policy.action,
                is_dangerous,
                disposition: resolve(&policy, &role_policy, is_dangerous),
            });
        }

        let log_channel_ready = match policy.log_channel {
            Some(channel_id) => Some(
                self.platform
                    .log_destination_ready(community_id, channel_id)
                    .await
                    .map_err(WardenError::platform)?,
            ),
            None => None,
        };

        Ok(Configuration {
            effective_default_action: policy.effective_default_action(),
            log_channel_ready,
            roles,
            policy,
        })
    }
}
