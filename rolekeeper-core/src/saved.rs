// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{CommunityId, RoleId, Timestamp, UserId};

/// Last known role set of a member in a community.
///
/// A missing record and a record with an empty set are different states: the former means the
/// member was never observed, the latter that they held no roles besides "everyone".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedRoleSet {
    pub community_id: CommunityId,
    pub user_id: UserId,
    pub role_ids: BTreeSet<RoleId>,
    pub timestamp: Timestamp,
}

impl SavedRoleSet {
    pub fn new(
        community_id: CommunityId,
        user_id: UserId,
        role_ids: BTreeSet<RoleId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            community_id,
            user_id,
            role_ids,
            timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.role_ids.is_empty()
    }
}
