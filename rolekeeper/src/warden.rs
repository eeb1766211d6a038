// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error as StdError;
use std::sync::Arc;

use rolekeeper_core::{ChannelId, CommunityId, CommunityPolicy, MonotonicClock, RoleId};
use rolekeeper_store::sqlite::SqliteError;
use rolekeeper_store::{PolicyStore, SavedRoleStore, Transaction};
use thiserror::Error;
use tracing::warn;

use crate::guard::{GuardError, RestorationGuard};
use crate::log::LogEntry;
use crate::platform::Platform;

/// Everything the warden needs from its persistence layer.
pub trait WardenStore:
    PolicyStore + SavedRoleStore + Transaction + Clone + Send + Sync + 'static
{
}

impl<T> WardenStore for T where
    T: PolicyStore + SavedRoleStore + Transaction + Clone + Send + Sync + 'static
{
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Reason attached to every role grant, ends up in the platform's audit log.
    pub audit_reason: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audit_reason: Some("Restoring roles of rejoining member".into()),
        }
    }
}

/// Reconciles the roles of community members across leaving and rejoining.
///
/// The warden reacts to platform events: it saves the live role set of a member whenever it
/// changes and grants the persisted subset back when the member rejoins. A `RestorationGuard`
/// keeps both sides from racing each other for the same member.
///
/// Cloned instances share the same store, platform and guard.
pub struct Warden<S, P> {
    pub(crate) config: Arc<Config>,
    pub(crate) store: S,
    pub(crate) platform: Arc<P>,
    pub(crate) guard: RestorationGuard,
    pub(crate) clock: Arc<MonotonicClock>,
}

impl<S, P> Clone for Warden<S, P>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: self.store.clone(),
            platform: self.platform.clone(),
            guard: self.guard.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<S, P> Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    pub fn new(config: Config, store: S, platform: P) -> Self {
        Self {
            config: Arc::new(config),
            store,
            platform: Arc::new(platform),
            guard: RestorationGuard::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn guard(&self) -> &RestorationGuard {
        &self.guard
    }

    /// Commits the transaction if the operation succeeded, otherwise rolls it back.
    pub(crate) async fn finish<T>(
        &self,
        permit: S::Permit,
        result: Result<T, WardenError>,
    ) -> Result<T, WardenError> {
        match result {
            Ok(value) => {
                self.store.commit(permit).await.map_err(WardenError::store)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(permit).await {
                    warn!("rolling back transaction failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    /// Posts an entry into the community's log channel if it asked for this kind of entry and
    /// the channel is reachable. Returns `true` if the entry was sent.
    ///
    /// Logging is best-effort, failures are reported through tracing only.
    pub(crate) async fn emit_log(&self, policy: &CommunityPolicy, entry: LogEntry) -> bool {
        let Some(channel_id) = policy.log_destination(entry.kind()) else {
            return false;
        };

        match self.send_log(policy.community_id, channel_id, &entry).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!(
                    community = %policy.community_id,
                    channel = %channel_id,
                    "sending log entry failed: {err}"
                );
                false
            }
        }
    }

    async fn send_log(
        &self,
        community_id: CommunityId,
        channel_id: ChannelId,
        entry: &LogEntry,
    ) -> Result<bool, WardenError> {
        let ready = self
            .platform
            .log_destination_ready(community_id, channel_id)
            .await
            .map_err(WardenError::platform)?;
        if !ready {
            return Ok(false);
        }

        self.platform
            .send_log(channel_id, entry)
            .await
            .map_err(WardenError::platform)?;
        Ok(true)
    }
}

#[derive(Debug, Error)]
pub enum WardenError {
    /// Policy or saved role store is unreachable or returned corrupted data.
    #[error("store error: {0}")]
    Store(Box<dyn StdError + Send + Sync + 'static>),

    /// Platform call failed outside of a per-role step.
    #[error("platform error: {0}")]
    Platform(Box<dyn StdError + Send + Sync + 'static>),

    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Role is not part of the community it was configured for.
    #[error("role {role_id} does not exist in community {community_id}")]
    RoleNotInCommunity {
        role_id: RoleId,
        community_id: CommunityId,
    },
}

impl WardenError {
    pub(crate) fn store<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        WardenError::Store(Box::new(err))
    }

    pub(crate) fn platform<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        WardenError::Platform(Box::new(err))
    }
}

impl From<SqliteError> for WardenError {
    fn from(err: SqliteError) -> Self {
        WardenError::store(err)
    }
}
