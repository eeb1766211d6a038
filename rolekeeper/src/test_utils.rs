// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable platform and helpers for tests.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rolekeeper_core::{
    ChannelId, CommunityId, CommunityPolicy, Permissions, RoleId, RolePolicy, SavedRoleSet,
    Timestamp, UserId,
};
use rolekeeper_store::{MemoryStore, PolicyStore, SavedRoleStore, Transaction};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

use crate::log::LogEntry;
use crate::platform::{Platform, RoleInfo};
use crate::warden::{Config, Warden};

/// Rank the agent holds in every community unless configured otherwise.
pub const DEFAULT_AGENT_RANK: u32 = 100;

#[derive(Debug, Error)]
#[error("test platform error: {0}")]
pub struct TestPlatformError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub community_id: CommunityId,
    pub user_id: UserId,
    pub role_id: RoleId,
    pub reason: Option<String>,
}

#[derive(Default)]
struct State {
    roles: HashMap<(CommunityId, RoleId), RoleInfo>,
    members: HashMap<(CommunityId, UserId), BTreeSet<RoleId>>,
    cannot_manage: HashSet<CommunityId>,
    ranks: HashMap<CommunityId, u32>,
    failing_agent: bool,
    failing_grants: HashSet<RoleId>,
    failing_lookups: HashSet<RoleId>,
    ready_channels: HashSet<ChannelId>,
    grants: Vec<Grant>,
    sent: Vec<(ChannelId, LogEntry)>,
    gate: Option<Arc<Semaphore>>,
}

/// In-memory platform where roles, members and capabilities of the agent are set up by the test.
///
/// Cloned instances share the same state, a test can keep one clone around to inspect and modify
/// the platform while a `Warden` owns another one.
#[derive(Clone, Default)]
pub struct TestPlatform {
    state: Arc<Mutex<State>>,
    grant_started: Arc<Notify>,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("test platform lock poisoned")
    }

    /// Adds a regular role with harmless permissions.
    pub fn add_role(&self, community_id: CommunityId, role_id: RoleId, rank: u32) {
        self.add_role_with(community_id, role_id, rank, Permissions::SEND_MESSAGES, false);
    }

    pub fn add_role_with(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
        rank: u32,
        permissions: Permissions,
        managed: bool,
    ) {
        self.state().roles.insert(
            (community_id, role_id),
            RoleInfo {
                role_id,
                managed,
                rank,
                permissions,
            },
        );
    }

    pub fn remove_role(&self, community_id: CommunityId, role_id: RoleId) {
        let mut state = self.state();
        state.roles.remove(&(community_id, role_id));
        for ((member_community_id, _), roles) in state.members.iter_mut() {
            if *member_community_id == community_id {
                roles.remove(&role_id);
            }
        }
    }

    pub fn set_permissions(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
        permissions: Permissions,
    ) {
        if let Some(role) = self.state().roles.get_mut(&(community_id, role_id)) {
            role.permissions = permissions;
        }
    }

    /// Adds a member with the given roles, replacing an earlier role set.
    pub fn add_member(&self, community_id: CommunityId, user_id: UserId, roles: &[RoleId]) {
        self.state()
            .members
            .insert((community_id, user_id), roles.iter().copied().collect());
    }

    pub fn remove_member(&self, community_id: CommunityId, user_id: UserId) {
        self.state().members.remove(&(community_id, user_id));
    }

    pub fn roles_of(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Option<BTreeSet<RoleId>> {
        self.state().members.get(&(community_id, user_id)).cloned()
    }

    pub fn set_can_manage_roles(&self, community_id: CommunityId, allowed: bool) {
        let mut state = self.state();
        if allowed {
            state.cannot_manage.remove(&community_id);
        } else {
            state.cannot_manage.insert(community_id);
        }
    }

    pub fn set_agent_rank(&self, community_id: CommunityId, rank: u32) {
        self.state().ranks.insert(community_id, rank);
    }

    /// Makes every lookup of the agent's capabilities fail.
    pub fn fail_agent_lookup(&self, fail: bool) {
        self.state().failing_agent = fail;
    }

    /// Makes granting this role fail.
    pub fn fail_grant(&self, role_id: RoleId) {
        self.state().failing_grants.insert(role_id);
    }

    /// Makes looking up this role fail.
    pub fn fail_lookup(&self, role_id: RoleId) {
        self.state().failing_lookups.insert(role_id);
    }

    pub fn set_channel_ready(&self, channel_id: ChannelId, ready: bool) {
        let mut state = self.state();
        if ready {
            state.ready_channels.insert(channel_id);
        } else {
            state.ready_channels.remove(&channel_id);
        }
    }

    pub fn grants(&self) -> Vec<Grant> {
        self.state().grants.clone()
    }

    pub fn sent_logs(&self) -> Vec<(ChannelId, LogEntry)> {
        self.state().sent.clone()
    }

    /// Blocks every following grant until `open_gate` is called.
    pub fn close_gate(&self) {
        self.state().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets blocked grants pass and disables the gate for following ones.
    pub fn open_gate(&self) {
        if let Some(gate) = self.state().gate.take() {
            gate.add_permits(1);
        }
    }

    /// Waits until a grant was started, useful together with `close_gate`.
    pub async fn grant_started(&self) {
        self.grant_started.notified().await;
    }
}

impl Platform for TestPlatform {
    type Error = TestPlatformError;

    async fn role(
        &self,
        community_id: CommunityId,
        role_id: RoleId,
    ) -> Result<Option<RoleInfo>, Self::Error> {
        let state = self.state();
        if state.failing_lookups.contains(&role_id) {
            return Err(TestPlatformError(format!("lookup of role {role_id} failed")));
        }
        Ok(state.roles.get(&(community_id, role_id)).cloned())
    }

    async fn can_manage_roles(&self, community_id: CommunityId) -> Result<bool, Self::Error> {
        let state = self.state();
        if state.failing_agent {
            return Err(TestPlatformError("agent lookup failed".into()));
        }
        Ok(!state.cannot_manage.contains(&community_id))
    }

    async fn highest_rank(&self, community_id: CommunityId) -> Result<u32, Self::Error> {
        let state = self.state();
        if state.failing_agent {
            return Err(TestPlatformError("agent lookup failed".into()));
        }
        Ok(state
            .ranks
            .get(&community_id)
            .copied()
            .unwrap_or(DEFAULT_AGENT_RANK))
    }

    async fn member_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<BTreeSet<RoleId>>, Self::Error> {
        Ok(self.roles_of(community_id, user_id))
    }

    async fn grant_role(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_id: RoleId,
        reason: Option<&str>,
    ) -> Result<(), Self::Error> {
        self.grant_started.notify_one();

        let gate = self.state().gate.clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| TestPlatformError("gate closed".into()))?;
        }

        let mut state = self.state();
        if state.failing_grants.contains(&role_id) {
            return Err(TestPlatformError(format!("granting role {role_id} failed")));
        }

        let Some(roles) = state.members.get_mut(&(community_id, user_id)) else {
            return Err(TestPlatformError(format!("unknown member {user_id}")));
        };
        roles.insert(role_id);

        state.grants.push(Grant {
            community_id,
            user_id,
            role_id,
            reason: reason.map(ToString::to_string),
        });

        Ok(())
    }

    async fn log_destination_ready(
        &self,
        _community_id: CommunityId,
        channel_id: ChannelId,
    ) -> Result<bool, Self::Error> {
        Ok(self.state().ready_channels.contains(&channel_id))
    }

    async fn send_log(&self, channel_id: ChannelId, entry: &LogEntry) -> Result<(), Self::Error> {
        self.state().sent.push((channel_id, entry.clone()));
        Ok(())
    }
}

/// Warden on top of an in-memory store and the given test platform.
#[derive(Debug, Error)]
#[error("test store error: {0}")]
pub struct TestStoreError(pub &'static str);

/// Memory store which can be told to fail reading or writing saved role sets.
///
/// Everything else is passed through to the wrapped `MemoryStore`, including transactions, so
/// failed writes are rolled back like on any other store.
#[derive(Clone, Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing_reads: Arc<AtomicBool>,
    failing_writes: Arc<AtomicBool>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `saved_roles` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.failing_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_saved_roles` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.failing_writes.store(fail, Ordering::SeqCst);
    }
}

impl Transaction for FailingStore {
    type Error = TestStoreError;

    type Permit = <MemoryStore as Transaction>::Permit;

    async fn begin(&self) -> Result<Self::Permit, Self::Error> {
        self.inner.begin().await.map_err(|never| match never {})
    }

    async fn rollback(&self, permit: Self::Permit) -> Result<(), Self::Error> {
        self.inner.rollback(permit).await.map_err(|never| match never {})
    }

    async fn commit(&self, permit: Self::Permit) -> Result<(), Self::Error> {
        self.inner.commit(permit).await.map_err(|never| match never {})
    }
}

impl PolicyStore for FailingStore {
    type Error = TestStoreError;

    async fn community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<CommunityPolicy, Self::Error> {
        let result = self.inner.community_policy(community_id).await;
        result.map_err(|never| match never {})
    }

    async fn set_community_policy(&self, policy: &CommunityPolicy) -> Result<(), Self::Error> {
        let result = self.inner.set_community_policy(policy).await;
        result.map_err(|never| match never {})
    }

    async fn remove_community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<bool, Self::Error> {
        let result = self.inner.remove_community_policy(community_id).await;
        result.map_err(|never| match never {})
    }

    async fn role_policy(
        &self,
        role_id: RoleId,
        community_id: CommunityId,
    ) -> Result<RolePolicy, Self::Error> {
        let result = self.inner.role_policy(role_id, community_id).await;
        result.map_err(|never| match never {})
    }

    async fn role_policies(
        &self,
        role_ids: &[RoleId],
        community_id: CommunityId,
    ) -> Result<Vec<RolePolicy>, Self::Error> {
        let result = self.inner.role_policies(role_ids, community_id).await;
        result.map_err(|never| match never {})
    }

    async fn community_role_policies(
        &self,
        community_id: CommunityId,
    ) -> Result<Vec<RolePolicy>, Self::Error> {
        let result = self.inner.community_role_policies(community_id).await;
        result.map_err(|never| match never {})
    }

    async fn set_role_policy(&self, policy: &RolePolicy) -> Result<(), Self::Error> {
        let result = self.inner.set_role_policy(policy).await;
        result.map_err(|never| match never {})
    }

    async fn remove_role_policy(&self, role_id: RoleId) -> Result<bool, Self::Error> {
        let result = self.inner.remove_role_policy(role_id).await;
        result.map_err(|never| match never {})
    }

    async fn clear_role_policies(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let result = self.inner.clear_role_policies(community_id).await;
        result.map_err(|never| match never {})
    }
}

impl SavedRoleStore for FailingStore {
    type Error = TestStoreError;

    async fn saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<SavedRoleSet>, Self::Error> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(TestStoreError("reading saved roles failed"));
        }
        let result = self.inner.saved_roles(community_id, user_id).await;
        result.map_err(|never| match never {})
    }

    async fn set_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_ids: BTreeSet<RoleId>,
        timestamp: Timestamp,
    ) -> Result<SavedRoleSet, Self::Error> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(TestStoreError("writing saved roles failed"));
        }
        let result = self
            .inner
            .set_saved_roles(community_id, user_id, role_ids, timestamp)
            .await;
        result.map_err(|never| match never {})
    }

    async fn remove_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<bool, Self::Error> {
        let result = self.inner.remove_saved_roles(community_id, user_id).await;
        result.map_err(|never| match never {})
    }

    async fn clear_saved_roles(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let result = self.inner.clear_saved_roles(community_id).await;
        result.map_err(|never| match never {})
    }
}

pub fn test_warden(platform: TestPlatform) -> Warden<MemoryStore, TestPlatform> {
    Warden::new(Config::default(), MemoryStore::new(), platform)
}

/// Warden on a `FailingStore`, the returned store handle controls the failures.
pub fn failing_warden(
    platform: TestPlatform,
) -> (Warden<FailingStore, TestPlatform>, FailingStore) {
    let store = FailingStore::new();
    (Warden::new(Config::default(), store.clone(), platform), store)
}

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}
