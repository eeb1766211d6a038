// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use rolekeeper_store::sqlite::{SqliteStore, SqliteStoreBuilder};

use crate::platform::Platform;
use crate::warden::{Config, Warden, WardenError};

/// Builds a `Warden` backed by an SQLite database.
#[derive(Default)]
pub struct WardenBuilder {
    config: Config,
    store: SqliteStoreBuilder,
}

impl WardenBuilder {
    pub fn new() -> Self {
        WardenBuilder {
            config: Config::default(),
            store: SqliteStoreBuilder::default(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Reason attached to role grants, `None` grants without a reason.
    pub fn audit_reason(mut self, reason: Option<&str>) -> Self {
        self.config.audit_reason = reason.map(ToString::to_string);
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.store = self.store.database_url(url);
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.store = self.store.max_connections(max_connections);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.store = self.store.acquire_timeout(timeout);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.store = self.store.busy_timeout(timeout);
        self
    }

    pub fn default_migrations(mut self, value: bool) -> Self {
        self.store = self.store.run_default_migrations(value);
        self
    }

    pub async fn spawn<P>(self, platform: P) -> Result<Warden<SqliteStore<'static>, P>, WardenError>
    where
        P: Platform,
    {
        let store = self.store.build().await?;
        Ok(Warden::new(self.config, store, platform))
    }
}
