// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use rolekeeper_core::{CommunityId, CommunityPolicy, RoleId, RolePolicy};

/// Interface for storing and querying community- and role-level policies.
///
/// Reads never fail because of a missing record: an unknown community reads as
/// `CommunityPolicy::new` and an unconfigured role as `RolePolicy::unset`.
///
/// Writes are expected to happen inside a transaction, see `Transaction`. Reads don't need one
/// and are not isolated from it: while any process holds the transaction, reads may return its
/// uncommitted writes, which are gone again if it rolls back.
pub trait PolicyStore {
    type Error: Error + Send + Sync + 'static;

    /// Returns the policy of a community, materialising defaults if none was stored.
    fn community_policy(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<CommunityPolicy, Self::Error>> + Send;

    /// Inserts or overwrites the policy of a community.
    fn set_community_policy(
        &self,
        policy: &CommunityPolicy,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Removes the policy of a community.
    ///
    /// Returns `true` if a record was removed and `false` if none existed.
    fn remove_community_policy(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Returns the policy of a role.
    ///
    /// The given community is only used when no record exists for this role.
    fn role_policy(
        &self,
        role_id: RoleId,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<RolePolicy, Self::Error>> + Send;

    /// Returns the policies of all given roles in the same order, unconfigured roles are filled
    /// in as `Unset` for the given community.
    fn role_policies(
        &self,
        role_ids: &[RoleId],
        community_id: CommunityId,
    ) -> impl Future<Output = Result<Vec<RolePolicy>, Self::Error>> + Send;

    /// Returns all explicitly configured role policies of a community.
    fn community_role_policies(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<Vec<RolePolicy>, Self::Error>> + Send;

    /// Inserts or overwrites the policy of a role.
    ///
    /// Writing a policy with action `Unset` removes the record instead, no store ever retains
    /// unset role policies.
    fn set_role_policy(
        &self,
        policy: &RolePolicy,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Removes the policy of a role.
    ///
    /// Returns `true` if a record was removed and `false` if none existed.
    fn remove_role_policy(
        &self,
        role_id: RoleId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Removes all role policies of a community. Returns number of removed records.
    fn clear_role_policies(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;
}
