// SPDX-License-Identifier: MIT OR Apache-2.0

//! Saving the live role set of members.
use std::collections::BTreeSet;

use rolekeeper_core::{CommunityId, RoleId, SavedRoleSet, UserId};
use rolekeeper_store::{SavedRoleStore, Transaction};
use tracing::{debug, trace, warn};

use crate::platform::Platform;
use crate::warden::{Warden, WardenError, WardenStore};

/// Result of a snapshot attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Role set was stored.
    Written(SavedRoleSet),

    /// Old and new role set are equal, nothing was stored.
    Unchanged,

    /// A restoration is in flight for this member and will save the role set itself when done.
    Restoring,

    /// Member is not part of the community (anymore).
    MemberMissing,
}

impl SnapshotOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, SnapshotOutcome::Written(_))
    }
}

impl<S, P> Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    /// Handles a change of a member's role set.
    ///
    /// `old_roles` is `None` if the platform didn't know the previous role set.
    pub async fn on_roles_changed(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        old_roles: Option<&BTreeSet<RoleId>>,
        new_roles: &BTreeSet<RoleId>,
    ) -> Result<SnapshotOutcome, WardenError> {
        if self.guard.is_held(community_id, user_id)? {
            debug!(
                community = %community_id,
                user = %user_id,
                "ignoring role change during restoration"
            );
            return Ok(SnapshotOutcome::Restoring);
        }

        if old_roles.is_some_and(|old_roles| old_roles == new_roles) {
            trace!(community = %community_id, user = %user_id, "role set unchanged");
            return Ok(SnapshotOutcome::Unchanged);
        }

        self.write_snapshot(community_id, user_id, new_roles.clone())
            .await
    }

    /// Reads the live role set of a member from the platform and saves it.
    pub async fn capture_snapshot(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<SnapshotOutcome, WardenError> {
        if self.guard.is_held(community_id, user_id)? {
            return Ok(SnapshotOutcome::Restoring);
        }

        let Some(roles) = self
            .platform
            .member_roles(community_id, user_id)
            .await
            .map_err(WardenError::platform)?
        else {
            debug!(
                community = %community_id,
                user = %user_id,
                "member left before role set could be saved"
            );
            return Ok(SnapshotOutcome::MemberMissing);
        };

        self.write_snapshot(community_id, user_id, roles).await
    }

    async fn write_snapshot(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        mut roles: BTreeSet<RoleId>,
    ) -> Result<SnapshotOutcome, WardenError> {
        roles.remove(&RoleId::everyone(community_id));

        let permit = self.store.begin().await.map_err(WardenError::store)?;

        // A restoration might have started while we were waiting for the transaction.
        match self.guard.is_held(community_id, user_id) {
            Ok(false) => (),
            held => {
                if let Err(err) = self.store.rollback(permit).await {
                    warn!("rolling back transaction failed: {err}");
                }
                held?;
                debug!(
                    community = %community_id,
                    user = %user_id,
                    "restoration started, dropping role set"
                );
                return Ok(SnapshotOutcome::Restoring);
            }
        }

        let result = self
            .store
            .set_saved_roles(community_id, user_id, roles, self.clock.tick())
            .await
            .map_err(WardenError::store);
        let saved = self.finish(permit, result).await?;

        debug!(
            community = %community_id,
            user = %user_id,
            roles = saved.role_ids.len(),
            timestamp = %saved.timestamp,
            "saved role set"
        );

        Ok(SnapshotOutcome::Written(saved))
    }
}
