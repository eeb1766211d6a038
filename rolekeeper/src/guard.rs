// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rolekeeper_core::{CommunityId, UserId};
use thiserror::Error;

type GuardKey = (CommunityId, UserId);

/// Set of members currently under restoration.
///
/// A member is identified by community and user, the same user can be restored in two communities
/// at the same time. Cloned instances share the same set.
///
/// The guard lives in memory only. Entries of restorations abandoned during shutdown are lost
/// with the process, a new guard always starts out empty.
#[derive(Clone, Debug, Default)]
pub struct RestorationGuard {
    inner: Arc<Mutex<HashSet<GuardKey>>>,
}

impl RestorationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the member as "under restoration" if they aren't already.
    ///
    /// Returns `None` if another restoration holds the guard for this member. The returned permit
    /// releases the guard when dropped.
    pub fn try_acquire(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<RestorationPermit>, GuardError> {
        let mut keys = self.inner.lock().map_err(|_| GuardError::LockPoisoned)?;
        if !keys.insert((community_id, user_id)) {
            return Ok(None);
        }

        Ok(Some(RestorationPermit {
            key: (community_id, user_id),
            inner: self.inner.clone(),
        }))
    }

    /// Returns `true` if a restoration is in flight for this member.
    pub fn is_held(&self, community_id: CommunityId, user_id: UserId) -> Result<bool, GuardError> {
        let keys = self.inner.lock().map_err(|_| GuardError::LockPoisoned)?;
        Ok(keys.contains(&(community_id, user_id)))
    }

    /// Number of members currently under restoration.
    pub fn len(&self) -> Result<usize, GuardError> {
        let keys = self.inner.lock().map_err(|_| GuardError::LockPoisoned)?;
        Ok(keys.len())
    }

    pub fn is_empty(&self) -> Result<bool, GuardError> {
        Ok(self.len()? == 0)
    }
}

/// Proof of holding the guard for one member.
#[derive(Debug)]
pub struct RestorationPermit {
    key: GuardKey,
    inner: Arc<Mutex<HashSet<GuardKey>>>,
}

impl RestorationPermit {
    pub fn community_id(&self) -> CommunityId {
        self.key.0
    }

    pub fn user_id(&self) -> UserId {
        self.key.1
    }

    /// Releases the guard, same as dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RestorationPermit {
    fn drop(&mut self) {
        // A poisoned lock still holds a consistent set, removing a key can't leave it half-done.
        let mut keys = match self.inner.lock() {
            Ok(keys) => keys,
            Err(poisoned) => poisoned.into_inner(),
        };
        keys.remove(&self.key);
    }
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("restoration guard lock was poisoned")]
    LockPoisoned,
}
