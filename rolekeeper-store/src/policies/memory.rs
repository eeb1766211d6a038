// SPDX-License-Identifier: MIT OR Apache-2.0

use std::convert::Infallible;

use rolekeeper_core::{CommunityId, CommunityPolicy, RoleId, RolePolicy};

use crate::memory::MemoryStore;
use crate::policies::PolicyStore;

impl PolicyStore for MemoryStore {
    type Error = Infallible;

    async fn community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<CommunityPolicy, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .community_policies
            .get(&community_id)
            .cloned()
            .unwrap_or_else(|| CommunityPolicy::new(community_id)))
    }

    async fn set_community_policy(&self, policy: &CommunityPolicy) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        state
            .community_policies
            .insert(policy.community_id, policy.clone());
        Ok(())
    }

    async fn remove_community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<bool, Self::Error> {
        let mut state = self.state.write().await;
        Ok(state.community_policies.remove(&community_id).is_some())
    }

    async fn role_policy(
        &self,
        role_id: RoleId,
        community_id: CommunityId,
    ) -> Result<RolePolicy, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .role_policies
            .get(&role_id)
            .cloned()
            .unwrap_or_else(|| RolePolicy::unset(role_id, community_id)))
    }

    async fn role_policies(
        &self,
        role_ids: &[RoleId],
        community_id: CommunityId,
    ) -> Result<Vec<RolePolicy>, Self::Error> {
        let state = self.state.read().await;
        Ok(role_ids
            .iter()
            .map(|role_id| {
                state
                    .role_policies
                    .get(role_id)
                    .cloned()
                    .unwrap_or_else(|| RolePolicy::unset(*role_id, community_id))
            })
            .collect())
    }

    async fn community_role_policies(
        &self,
        community_id: CommunityId,
    ) -> Result<Vec<RolePolicy>, Self::Error> {
        let state = self.state.read().await;
        let mut policies: Vec<RolePolicy> = state
            .role_policies
            .values()
            .filter(|policy| policy.community_id == community_id)
            .cloned()
            .collect();
        policies.sort_by_key(|policy| policy.role_id);
        Ok(policies)
    }

    async fn set_role_policy(&self, policy: &RolePolicy) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        if policy.action.is_unset() {
            state.role_policies.remove(&policy.role_id);
        } else {
            state.role_policies.insert(policy.role_id, policy.clone());
        }
        Ok(())
    }

    async fn remove_role_policy(&self, role_id: RoleId) -> Result<bool, Self::Error> {
        let mut state = self.state.write().await;
        Ok(state.role_policies.remove(&role_id).is_some())
    }

    async fn clear_role_policies(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let mut state = self.state.write().await;
        let before = state.role_policies.len();
        state
            .role_policies
            .retain(|_, policy| policy.community_id != community_id);
        Ok(before - state.role_policies.len())
    }
}
