// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;

use rolekeeper_core::{CommunityId, CommunityPolicy, RoleId, RolePolicy, SavedRoleSet, UserId};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::traits::Transaction;

#[derive(Clone, Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) community_policies: HashMap<CommunityId, CommunityPolicy>,
    pub(crate) role_policies: HashMap<RoleId, RolePolicy>,
    pub(crate) saved_roles: BTreeMap<(CommunityId, UserId), SavedRoleSet>,
}

/// In-memory store.
///
/// This does not persist data permamently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
///
/// Transactions behave like the ones of the SQLite store: only one can be active at a time and a
/// rollback restores the state as it was when the transaction began. Writes outside of a
/// transaction are applied directly.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    pub(crate) state: Arc<RwLock<MemoryState>>,
    snapshot: Arc<Mutex<Option<MemoryState>>>,
    semaphore: Arc<Semaphore>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            snapshot: Arc::default(),
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction for MemoryStore {
    type Error = Infallible;

    type Permit = MemoryPermit;

    async fn begin(&self) -> Result<Self::Permit, Self::Error> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("if semaphore is closed then the whole struct is gone as well");

        let state = self.state.read().await.clone();
        self.snapshot.lock().await.replace(state);

        Ok(MemoryPermit(permit))
    }

    async fn rollback(&self, permit: Self::Permit) -> Result<(), Self::Error> {
        if let Some(snapshot) = self.snapshot.lock().await.take() {
            *self.state.write().await = snapshot;
        }
        drop(permit);
        Ok(())
    }

    async fn commit(&self, permit: Self::Permit) -> Result<(), Self::Error> {
        self.snapshot.lock().await.take();
        drop(permit);
        Ok(())
    }
}

#[allow(unused)]
pub struct MemoryPermit(OwnedSemaphorePermit);

// Trait implementations are in the regarding modules, see `policies` and `saved_roles`.
