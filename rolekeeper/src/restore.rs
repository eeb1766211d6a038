// SPDX-License-Identifier: MIT OR Apache-2.0

//! Granting saved roles back to rejoining members.
use std::fmt::Display;

use rolekeeper_core::{
    CommunityId, CommunityPolicy, Disposition, RoleId, RolePolicy, UserId, resolve,
};
use rolekeeper_store::{PolicyStore, SavedRoleStore};
use tracing::{debug, info, warn};

use crate::log::LogEntry;
use crate::platform::{Platform, RoleInfo};
use crate::warden::{Warden, WardenError, WardenStore};

/// What happened to a single saved role during a restoration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoleOutcome {
    /// Role was granted.
    Applied,

    /// Policy says the role should not be restored.
    SkippedPolicy,

    /// Role doesn't exist anymore.
    SkippedMissing,

    /// Role is owned by an integration.
    SkippedManaged,

    /// Acting agent is not allowed to manage roles in this community.
    SkippedPermission,

    /// Role is ranked at or above the highest role of the acting agent.
    SkippedRank,

    /// Platform failed granting or looking up the role.
    Failed(String),
}

impl RoleOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RoleOutcome::Applied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RoleOutcome::Failed(_))
    }
}

impl Display for RoleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleOutcome::Applied => write!(f, "applied"),
            RoleOutcome::SkippedPolicy => write!(f, "skipped (policy)"),
            RoleOutcome::SkippedMissing => write!(f, "skipped (missing)"),
            RoleOutcome::SkippedManaged => write!(f, "skipped (managed)"),
            RoleOutcome::SkippedPermission => write!(f, "skipped (permission)"),
            RoleOutcome::SkippedRank => write!(f, "skipped (rank)"),
            RoleOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestorationOutcome {
    pub role_id: RoleId,
    pub outcome: RoleOutcome,
}

/// Aggregated result of one restoration attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestorationReport {
    pub community_id: CommunityId,
    pub user_id: UserId,

    /// One entry per saved role, in the iteration order of the saved set.
    pub outcomes: Vec<RestorationOutcome>,

    /// `true` if a summary was posted into the community's log channel.
    pub logged: bool,
}

impl RestorationReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| entry.outcome.is_applied())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|entry| entry.outcome.is_failed())
            .count()
    }

    /// Returns the outcome for a single role.
    pub fn outcome(&self, role_id: RoleId) -> Option<&RoleOutcome> {
        self.outcomes
            .iter()
            .find(|entry| entry.role_id == role_id)
            .map(|entry| &entry.outcome)
    }

    pub fn applied_roles(&self) -> Vec<RoleId> {
        self.outcomes
            .iter()
            .filter(|entry| entry.outcome.is_applied())
            .map(|entry| entry.role_id)
            .collect()
    }

    fn log_entry(&self) -> LogEntry {
        LogEntry::Restored {
            community_id: self.community_id,
            user_id: self.user_id,
            restored: self.applied_roles(),
            failed: self
                .outcomes
                .iter()
                .filter_map(|entry| match &entry.outcome {
                    RoleOutcome::Failed(reason) => Some((entry.role_id, reason.clone())),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Capabilities of the acting agent, looked up once per restoration when the first role needs
/// them.
enum Agent {
    Allowed { highest_rank: u32 },
    NotAllowed,
    Unavailable(String),
}

impl Agent {
    fn unavailable(community_id: CommunityId, err: impl Display) -> Self {
        warn!(community = %community_id, "looking up agent capabilities failed: {err}");
        Agent::Unavailable(err.to_string())
    }

    /// Highest grantable rank or the outcome for every role reaching this check.
    fn highest_rank(&self) -> Result<u32, RoleOutcome> {
        match self {
            Agent::Allowed { highest_rank } => Ok(*highest_rank),
            Agent::NotAllowed => Err(RoleOutcome::SkippedPermission),
            Agent::Unavailable(reason) => Err(RoleOutcome::Failed(reason.clone())),
        }
    }
}

impl<S, P> Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    /// Restores the saved roles of a member who (re)joined a community.
    ///
    /// Returns `None` without doing anything if a restoration for the same member is already in
    /// flight. After the guard was released the live role set of the member is saved once more,
    /// it is the new ground truth for future restorations.
    ///
    /// Per-role platform failures are reported as `RoleOutcome::Failed` and don't affect the
    /// other roles, store failures abort the restoration.
    pub async fn on_member_join(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<RestorationReport>, WardenError> {
        let Some(permit) = self.guard.try_acquire(community_id, user_id)? else {
            debug!(
                community = %community_id,
                user = %user_id,
                "restoration already in flight, ignoring join"
            );
            return Ok(None);
        };

        info!(community = %community_id, user = %user_id, "member joined, restoring roles");
        let result = self.restore(community_id, user_id).await;
        permit.release();

        // Runs even if the restoration failed, the live role set is still worth saving.
        if let Err(err) = self.capture_snapshot(community_id, user_id).await {
            warn!(
                community = %community_id,
                user = %user_id,
                "saving role set after restoration failed: {err}"
            );
        }

        let (policy, mut report) = result?;

        info!(
            community = %community_id,
            user = %user_id,
            applied = report.applied(),
            failed = report.failed(),
            total = report.outcomes.len(),
            "roles restored"
        );

        report.logged = self.emit_log(&policy, report.log_entry()).await;

        Ok(Some(report))
    }

    async fn restore(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<(CommunityPolicy, RestorationReport), WardenError> {
        let saved = self
            .store
            .saved_roles(community_id, user_id)
            .await
            .map_err(WardenError::store)?;
        let policy = self
            .store
            .community_policy(community_id)
            .await
            .map_err(WardenError::store)?;

        let role_ids: Vec<RoleId> = saved
            .map(|saved| saved.role_ids.into_iter().collect())
            .unwrap_or_default();
        let role_policies = self
            .store
            .role_policies(&role_ids, community_id)
            .await
            .map_err(WardenError::store)?;

        let mut agent = None;
        let mut outcomes = Vec::with_capacity(role_ids.len());

        for role_policy in role_policies {
            let outcome = self
                .restore_role(community_id, user_id, &policy, &role_policy, &mut agent)
                .await;

            debug!(
                community = %community_id,
                user = %user_id,
                role = %role_policy.role_id,
                %outcome,
                "processed saved role"
            );

            outcomes.push(RestorationOutcome {
                role_id: role_policy.role_id,
                outcome,
            });
        }

        let report = RestorationReport {
            community_id,
            user_id,
            outcomes,
            logged: false,
        };

        Ok((policy, report))
    }

    async fn restore_role(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        policy: &CommunityPolicy,
        role_policy: &RolePolicy,
        agent: &mut Option<Agent>,
    ) -> RoleOutcome {
        let role_id = role_policy.role_id;

        // Classify with the live permissions, they might have changed since the role was saved.
        let role = match self.platform.role(community_id, role_id).await {
            Ok(role) => role,
            Err(err) => {
                warn!(
                    community = %community_id,
                    user = %user_id,
                    role = %role_id,
                    "looking up role failed: {err}"
                );
                return RoleOutcome::Failed(err.to_string());
            }
        };
        let is_dangerous = role.as_ref().is_some_and(RoleInfo::is_dangerous);

        if resolve(policy, role_policy, is_dangerous) != Disposition::Persist {
            return RoleOutcome::SkippedPolicy;
        }

        let Some(role) = role else {
            return RoleOutcome::SkippedMissing;
        };

        if role.managed {
            return RoleOutcome::SkippedManaged;
        }

        let capabilities = match agent.take() {
            Some(capabilities) => capabilities,
            None => self.agent(community_id).await,
        };
        let highest_rank = capabilities.highest_rank();
        *agent = Some(capabilities);

        let highest_rank = match highest_rank {
            Ok(highest_rank) => highest_rank,
            Err(outcome) => return outcome,
        };

        if role.rank >= highest_rank {
            return RoleOutcome::SkippedRank;
        }

        match self
            .platform
            .grant_role(
                community_id,
                user_id,
                role_id,
                self.config.audit_reason.as_deref(),
            )
            .await
        {
            Ok(()) => RoleOutcome::Applied,
            Err(err) => {
                warn!(
                    community = %community_id,
                    user = %user_id,
                    role = %role_id,
                    "granting role failed: {err}"
                );
                RoleOutcome::Failed(err.to_string())
            }
        }
    }

    async fn agent(&self, community_id: CommunityId) -> Agent {
        let allowed = match self.platform.can_manage_roles(community_id).await {
            Ok(allowed) => allowed,
            Err(err) => return Agent::unavailable(community_id, err),
        };
        if !allowed {
            return Agent::NotAllowed;
        }

        match self.platform.highest_rank(community_id).await {
            Ok(highest_rank) => Agent::Allowed { highest_rank },
            Err(err) => Agent::unavailable(community_id, err),
        }
    }
}
