// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::error::Error;

use rolekeeper_core::{CommunityId, RoleId, SavedRoleSet, Timestamp, UserId};

/// Interface for storing and querying the last known role set of members.
///
/// Like for `PolicyStore`, reads may return uncommitted writes of whichever process currently
/// holds the transaction.
pub trait SavedRoleStore {
    type Error: Error + Send + Sync + 'static;

    /// Returns the saved role set of a member.
    ///
    /// Returns `None` if nothing was ever saved for this member, which is different from a saved
    /// but empty set.
    fn saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<SavedRoleSet>, Self::Error>> + Send;

    /// Inserts or overwrites the saved role set of a member and returns the stored record.
    ///
    /// The stored timestamp is strictly greater than the one of the record it replaces, even if
    /// the given `timestamp` is not (clock skew, racing writers).
    fn set_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_ids: BTreeSet<RoleId>,
        timestamp: Timestamp,
    ) -> impl Future<Output = Result<SavedRoleSet, Self::Error>> + Send;

    /// Removes the saved role set of a member.
    ///
    /// Returns `true` if a record was removed and `false` if none existed.
    fn remove_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Removes the saved role sets of all members of a community. Returns number of removed
    /// records.
    fn clear_saved_roles(
        &self,
        community_id: CommunityId,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;
}
