// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::convert::Infallible;

use rolekeeper_core::{CommunityId, RoleId, SavedRoleSet, Timestamp, UserId};

use crate::memory::MemoryStore;
use crate::saved_roles::SavedRoleStore;

impl SavedRoleStore for MemoryStore {
    type Error = Infallible;

    async fn saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<SavedRoleSet>, Self::Error> {
        let state = self.state.read().await;
        Ok(state.saved_roles.get(&(community_id, user_id)).cloned())
    }

    async fn set_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_ids: BTreeSet<RoleId>,
        timestamp: Timestamp,
    ) -> Result<SavedRoleSet, Self::Error> {
        let mut state = self.state.write().await;

        let timestamp = match state.saved_roles.get(&(community_id, user_id)) {
            Some(previous) => timestamp.after(previous.timestamp),
            None => timestamp,
        };

        let saved = SavedRoleSet::new(community_id, user_id, role_ids, timestamp);
        state
            .saved_roles
            .insert((community_id, user_id), saved.clone());
        Ok(saved)
    }

    async fn remove_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<bool, Self::Error> {
        let mut state = self.state.write().await;
        Ok(state.saved_roles.remove(&(community_id, user_id)).is_some())
    }

    async fn clear_saved_roles(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let mut state = self.state.write().await;
        let before = state.saved_roles.len();
        state
            .saved_roles
            .retain(|(saved_community_id, _), _| *saved_community_id != community_id);
        Ok(before - state.saved_roles.len())
    }
}
