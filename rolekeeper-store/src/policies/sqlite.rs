// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;

use rolekeeper_core::{
    ChannelId, CommunityId, CommunityPolicy, DangerousMode, LogFlags, RoleAction, RoleId,
    RolePolicy,
};
use sqlx::{FromRow, query, query_as};

use crate::policies::PolicyStore;
use crate::sqlite::{DecodeError, SqliteError, SqliteStore, decode_id, decode_u8};

impl<'a> PolicyStore for SqliteStore<'a> {
    type Error = SqliteError;

    async fn community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<CommunityPolicy, Self::Error> {
        let query = query_as::<_, CommunityPolicyRow>(
            "
            SELECT
                community_id,
                default_action,
                dangerous_mode,
                log_channel_id,
                log_flags
            FROM
                community_policies_v1
            WHERE
                community_id = ?
            ",
        )
        .bind(community_id.to_string());

        let mut tx_ref = self.tx.lock().await;
        let row = match tx_ref.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        match row {
            Some(row) => row.try_into(),
            None => Ok(CommunityPolicy::new(community_id)),
        }
    }

    async fn set_community_policy(&self, policy: &CommunityPolicy) -> Result<(), Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        query(
            "
            INSERT INTO
                community_policies_v1 (
                    community_id,
                    default_action,
                    dangerous_mode,
                    log_channel_id,
                    log_flags
                )
            VALUES
                (?, ?, ?, ?, ?)
            ON CONFLICT(community_id) DO UPDATE SET
                default_action = excluded.default_action,
                dangerous_mode = excluded.dangerous_mode,
                log_channel_id = excluded.log_channel_id,
                log_flags = excluded.log_flags
            ",
        )
        .bind(policy.community_id.to_string())
        .bind(i64::from(u8::from(policy.default_action)))
        .bind(i64::from(u8::from(policy.dangerous_mode)))
        .bind(policy.log_channel.map(|channel_id| channel_id.to_string()))
        .bind(i64::from(policy.log_flags.bits()))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn remove_community_policy(
        &self,
        community_id: CommunityId,
    ) -> Result<bool, Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        let result = query(
            "
            DELETE FROM
                community_policies_v1
            WHERE
                community_id = ?
            ",
        )
        .bind(community_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn role_policy(
        &self,
        role_id: RoleId,
        community_id: CommunityId,
    ) -> Result<RolePolicy, Self::Error> {
        let query = query_as::<_, RolePolicyRow>(
            "
            SELECT
                role_id,
                community_id,
                action
            FROM
                role_policies_v1
            WHERE
                role_id = ?
            ",
        )
        .bind(role_id.to_string());

        let mut tx_ref = self.tx.lock().await;
        let row = match tx_ref.as_mut() {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };

        match row {
            Some(row) => row.try_into(),
            None => Ok(RolePolicy::unset(role_id, community_id)),
        }
    }

    async fn role_policies(
        &self,
        role_ids: &[RoleId],
        community_id: CommunityId,
    ) -> Result<Vec<RolePolicy>, Self::Error> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; role_ids.len()].join(", ");
        let sql = format!(
            "
            SELECT
                role_id,
                community_id,
                action
            FROM
                role_policies_v1
            WHERE
                role_id IN ({placeholders})
            "
        );

        let mut query = query_as::<_, RolePolicyRow>(&sql);
        for role_id in role_ids {
            query = query.bind(role_id.to_string());
        }

        let rows = {
            let mut tx_ref = self.tx.lock().await;
            match tx_ref.as_mut() {
                Some(tx) => query.fetch_all(&mut **tx).await?,
                None => query.fetch_all(&self.pool).await?,
            }
        };

        let mut stored = HashMap::with_capacity(rows.len());
        for row in rows {
            let policy = RolePolicy::try_from(row)?;
            stored.insert(policy.role_id, policy);
        }

        Ok(role_ids
            .iter()
            .map(|role_id| {
                stored
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
        let query = query_as::<_, RolePolicyRow>(
            "
            SELECT
                role_id,
                community_id,
                action
            FROM
                role_policies_v1
            WHERE
                community_id = ?
            ",
        )
        .bind(community_id.to_string());

        let rows = {
            let mut tx_ref = self.tx.lock().await;
            match tx_ref.as_mut() {
                Some(tx) => query.fetch_all(&mut **tx).await?,
                None => query.fetch_all(&self.pool).await?,
            }
        };

        // Identifiers are stored as TEXT, sort numerically after decoding.
        let mut policies = rows
            .into_iter()
            .map(RolePolicy::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        policies.sort_by_key(|policy| policy.role_id);
        Ok(policies)
    }

    async fn set_role_policy(&self, policy: &RolePolicy) -> Result<(), Self::Error> {
        if policy.action.is_unset() {
            self.remove_role_policy(policy.role_id).await?;
            return Ok(());
        }

        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        query(
            "
            INSERT INTO
                role_policies_v1 (
                    role_id,
                    community_id,
                    action
                )
            VALUES
                (?, ?, ?)
            ON CONFLICT(role_id) DO UPDATE SET
                community_id = excluded.community_id,
                action = excluded.action
            ",
        )
        .bind(policy.role_id.to_string())
        .bind(policy.community_id.to_string())
        .bind(i64::from(u8::from(policy.action)))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn remove_role_policy(&self, role_id: RoleId) -> Result<bool, Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        let result = query(
            "
            DELETE FROM
                role_policies_v1
            WHERE
                role_id = ?
            ",
        )
        .bind(role_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_role_policies(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        let result = query(
            "
            DELETE FROM
                role_policies_v1
            WHERE
                community_id = ?
            ",
        )
        .bind(community_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() as usize)
    }
}

/// Community policy row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct CommunityPolicyRow {
    community_id: String,
    default_action: i64,
    dangerous_mode: i64,
    log_channel_id: Option<String>,
    log_flags: i64,
}

impl TryFrom<CommunityPolicyRow> for CommunityPolicy {
    type Error = SqliteError;

    fn try_from(row: CommunityPolicyRow) -> Result<Self, Self::Error> {
        let community_id: CommunityId = decode_id("community_id", &row.community_id)?;

        let default_action = RoleAction::try_from(decode_u8("default_action", row.default_action)?)
            .map_err(|err| SqliteError::Decode("default_action".into(), DecodeError::from(err)))?;

        let dangerous_mode =
            DangerousMode::try_from(decode_u8("dangerous_mode", row.dangerous_mode)?).map_err(
                |err| SqliteError::Decode("dangerous_mode".into(), DecodeError::from(err)),
            )?;

        let log_channel = match row.log_channel_id {
            Some(value) => Some(decode_id::<ChannelId>("log_channel_id", &value)?),
            None => None,
        };

        let log_flags = LogFlags::try_from(decode_u8("log_flags", row.log_flags)?)
            .map_err(|err| SqliteError::Decode("log_flags".into(), DecodeError::from(err)))?;

        Ok(CommunityPolicy {
            community_id,
            default_action,
            dangerous_mode,
            log_channel,
            log_flags,
        })
    }
}

/// Role policy row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct RolePolicyRow {
    role_id: String,
    community_id: String,
    action: i64,
}

impl TryFrom<RolePolicyRow> for RolePolicy {
    type Error = SqliteError;

    fn try_from(row: RolePolicyRow) -> Result<Self, Self::Error> {
        let action = RoleAction::try_from(decode_u8("action", row.action)?)
            .map_err(|err| SqliteError::Decode("action".into(), DecodeError::from(err)))?;

        Ok(RolePolicy {
            role_id: decode_id("role_id", &row.role_id)?,
            community_id: decode_id("community_id", &row.community_id)?,
            action,
        })
    }
}
