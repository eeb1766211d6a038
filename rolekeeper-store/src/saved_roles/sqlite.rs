// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use rolekeeper_core::{CommunityId, RoleId, SavedRoleSet, Timestamp, UserId};
use sqlx::{FromRow, query, query_as, query_scalar};

use crate::saved_roles::SavedRoleStore;
use crate::sqlite::{DecodeError, EncodeError, SqliteError, SqliteStore, decode_id};

impl<'a> SavedRoleStore for SqliteStore<'a> {
    type Error = SqliteError;

    async fn saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<Option<SavedRoleSet>, Self::Error> {
        let query = query_as::<_, SavedRolesRow>(
            "
            SELECT
                community_id,
                user_id,
                role_ids,
                timestamp
            FROM
                saved_roles_v1
            WHERE
                community_id = ?
                AND user_id = ?
            ",
        )
        .bind(community_id.to_string())
        .bind(user_id.to_string());

        let row = {
            let mut tx_ref = self.tx.lock().await;
            match tx_ref.as_mut() {
                Some(tx) => query.fetch_optional(&mut **tx).await?,
                None => query.fetch_optional(&self.pool).await?,
            }
        };

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None => Ok(None),
        }
    }

    async fn set_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
        role_ids: BTreeSet<RoleId>,
        timestamp: Timestamp,
    ) -> Result<SavedRoleSet, Self::Error> {
        let encoded = encode_role_ids(&role_ids)?;
        let millis = i64::try_from(timestamp.as_millis()).map_err(|_| {
            SqliteError::Encode(
                "timestamp".into(),
                EncodeError::OutOfRange(timestamp.as_millis()),
            )
        })?;

        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        // The conflict clause keeps timestamps strictly increasing per member, independent of
        // the clock of whoever writes.
        let stored: i64 = query_scalar(
            "
            INSERT INTO
                saved_roles_v1 (
                    community_id,
                    user_id,
                    role_ids,
                    timestamp
                )
            VALUES
                (?, ?, ?, ?)
            ON CONFLICT(community_id, user_id) DO UPDATE SET
                role_ids = excluded.role_ids,
                timestamp = MAX(excluded.timestamp, saved_roles_v1.timestamp + 1)
            RETURNING
                timestamp
            ",
        )
        .bind(community_id.to_string())
        .bind(user_id.to_string())
        .bind(encoded)
        .bind(millis)
        .fetch_one(&mut **tx)
        .await?;

        Ok(SavedRoleSet::new(
            community_id,
            user_id,
            role_ids,
            decode_timestamp(stored)?,
        ))
    }

    async fn remove_saved_roles(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> Result<bool, Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        let result = query(
            "
            DELETE FROM
                saved_roles_v1
            WHERE
                community_id = ?
                AND user_id = ?
            ",
        )
        .bind(community_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_saved_roles(&self, community_id: CommunityId) -> Result<usize, Self::Error> {
        let mut tx_ref = self.tx.lock().await;
        let tx = tx_ref.as_mut().ok_or(SqliteError::TransactionMissing)?;

        let result = query(
            "
            DELETE FROM
                saved_roles_v1
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

fn encode_role_ids(role_ids: &BTreeSet<RoleId>) -> Result<Vec<u8>, SqliteError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(role_ids, &mut bytes)
        .map_err(|err| SqliteError::Encode("role_ids".into(), EncodeError::from(err)))?;
    Ok(bytes)
}

fn decode_role_ids(bytes: &[u8]) -> Result<BTreeSet<RoleId>, SqliteError> {
    ciborium::from_reader(bytes)
        .map_err(|err| SqliteError::Decode("role_ids".into(), DecodeError::from(err)))
}

fn decode_timestamp(value: i64) -> Result<Timestamp, SqliteError> {
    u64::try_from(value)
        .map(Timestamp::new)
        .map_err(|_| SqliteError::Decode("timestamp".into(), DecodeError::OutOfRange(value)))
}

/// Saved role set row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct SavedRolesRow {
    community_id: String,
    user_id: String,
    role_ids: Vec<u8>,
    timestamp: i64,
}

impl TryFrom<SavedRolesRow> for SavedRoleSet {
    type Error = SqliteError;

    fn try_from(row: SavedRolesRow) -> Result<Self, Self::Error> {
        Ok(SavedRoleSet::new(
            decode_id("community_id", &row.community_id)?,
            decode_id("user_id", &row.user_id)?,
            decode_role_ids(&row.role_ids)?,
            decode_timestamp(row.timestamp)?,
        ))
    }
}
