//! SQLite-backed, crash-durable event ledger.
//!
//! The local embedded store is exclusive to one device process. The pool is
//! opened with WAL journaling and `synchronous=FULL` so that once `append`
//! returns, the event survives a crash immediately afterwards.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use gatewarden_core::EventId;

use crate::backlog::BacklogCounter;
use crate::event::{AccessEvent, EvaluationMode, EventOutcome, EventRecord, SyncState};
use crate::signer::EventSigner;
use crate::store::{EventLedger, LedgerError};

#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
    signer: Option<EventSigner>,
    backlog: BacklogCounter,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `path` and seed the backlog
    /// counter. Startup is the only place the backlog is counted by query.
    pub async fn open(path: &Path, signer: Option<EventSigner>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create ledger directory at {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to open ledger database at {path:?}"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_ledger (
                id             TEXT PRIMARY KEY,
                credential_id  TEXT NOT NULL,
                space_id       TEXT NOT NULL,
                occurred_at    TEXT NOT NULL,
                outcome        TEXT NOT NULL,
                reason_code    TEXT NOT NULL,
                reason         TEXT NOT NULL,
                mode           TEXT NOT NULL,
                signature      TEXT NULL,
                sync_state     TEXT NOT NULL,
                sync_error     TEXT NULL,
                sync_attempts  INTEGER NOT NULL DEFAULT 0,
                synced_at      TEXT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create access_ledger table")?;

        let backlog = BacklogCounter::new();
        let unsynced: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM access_ledger WHERE sync_state = 'Unsynced'")
                .fetch_one(&pool)
                .await
                .context("failed to seed backlog counter")?;
        backlog.seed(unsynced as u64);

        Ok(Self {
            pool,
            signer,
            backlog,
        })
    }

    async fn exists(&self, id: EventId) -> Result<bool, LedgerError> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM access_ledger WHERE id = ?1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl EventLedger for SqliteLedger {
    async fn append(&self, record: EventRecord) -> Result<AccessEvent, LedgerError> {
        let event = AccessEvent::from_record(record, self.signer.as_ref());

        sqlx::query(
            r#"
            INSERT INTO access_ledger (
                id, credential_id, space_id, occurred_at, outcome,
                reason_code, reason, mode, signature,
                sync_state, sync_error, sync_attempts, synced_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'Unsynced', NULL, 0, NULL)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.credential_id.to_string())
        .bind(event.space_id.to_string())
        .bind(event.occurred_at.to_rfc3339())
        .bind(event.outcome.as_str())
        .bind(&event.reason_code)
        .bind(&event.reason)
        .bind(event.mode.as_str())
        .bind(event.signature.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        self.backlog.incremented();
        Ok(event)
    }

    async fn list_unsynced(&self, limit: usize) -> Result<Vec<AccessEvent>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT id, credential_id, space_id, occurred_at, outcome,
                   reason_code, reason, mode, signature,
                   sync_state, sync_error, sync_attempts, synced_at
            FROM access_ledger
            WHERE sync_state = 'Unsynced'
            ORDER BY occurred_at ASC, id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn mark_synced(&self, ids: &[EventId]) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339();
        let mut marked = 0u64;

        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE access_ledger
                SET sync_state = 'Synced', synced_at = ?2
                WHERE id = ?1 AND sync_state = 'Unsynced'
                "#,
            )
            .bind(id.to_string())
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;

            if result.rows_affected() == 1 {
                marked += 1;
            } else if !self.exists(*id).await? {
                self.backlog.decremented_by(marked);
                return Err(LedgerError::UnknownEvent(*id));
            }
        }

        self.backlog.decremented_by(marked);
        Ok(())
    }

    async fn mark_rejected(&self, id: EventId, error: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE access_ledger
            SET sync_state = 'Rejected', sync_error = ?2
            WHERE id = ?1 AND sync_state = 'Unsynced'
            "#,
        )
        .bind(id.to_string())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        if result.rows_affected() == 1 {
            self.backlog.decremented_by(1);
        } else if !self.exists(id).await? {
            return Err(LedgerError::UnknownEvent(id));
        }
        Ok(())
    }

    async fn record_sync_attempt(&self, ids: &[EventId]) -> Result<(), LedgerError> {
        for id in ids {
            sqlx::query(
                "UPDATE access_ledger SET sync_attempts = sync_attempts + 1 WHERE id = ?1",
            )
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Persistence(e.to_string()))?;
        }
        Ok(())
    }

    async fn clear_synced(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM access_ledger
            WHERE sync_state = 'Synced'
              AND synced_at IS NOT NULL
              AND synced_at < ?1
            "#,
        )
        .bind(older_than.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Persistence(e.to_string()))?;

        Ok(result.rows_affected())
    }

    fn unsynced_count(&self) -> u64 {
        self.backlog.get()
    }
}

/// Map a database row into an `AccessEvent`.
fn row_to_event(row: SqliteRow) -> Result<AccessEvent, LedgerError> {
    let corrupt = |what: &str, detail: String| LedgerError::Corrupt(format!("{what}: {detail}"));

    let id_str: String = row
        .try_get("id")
        .map_err(|e| corrupt("id", e.to_string()))?;
    let id = id_str
        .parse::<EventId>()
        .map_err(|e| corrupt("id", e.to_string()))?;

    let credential_id = row
        .try_get::<String, _>("credential_id")
        .map_err(|e| corrupt("credential_id", e.to_string()))?
        .parse()
        .map_err(|e: gatewarden_core::DomainError| corrupt("credential_id", e.to_string()))?;

    let space_id = row
        .try_get::<String, _>("space_id")
        .map_err(|e| corrupt("space_id", e.to_string()))?
        .parse()
        .map_err(|e: gatewarden_core::DomainError| corrupt("space_id", e.to_string()))?;

    let occurred_at = parse_timestamp(
        &row.try_get::<String, _>("occurred_at")
            .map_err(|e| corrupt("occurred_at", e.to_string()))?,
    )
    .map_err(|e| corrupt("occurred_at", e))?;

    let outcome = EventOutcome::parse(
        &row.try_get::<String, _>("outcome")
            .map_err(|e| corrupt("outcome", e.to_string()))?,
    )
    .map_err(|e| corrupt("outcome", e.to_string()))?;

    let mode = EvaluationMode::parse(
        &row.try_get::<String, _>("mode")
            .map_err(|e| corrupt("mode", e.to_string()))?,
    )
    .map_err(|e| corrupt("mode", e.to_string()))?;

    let sync_error: Option<String> = row
        .try_get("sync_error")
        .map_err(|e| corrupt("sync_error", e.to_string()))?;
    let sync_state_str: String = row
        .try_get("sync_state")
        .map_err(|e| corrupt("sync_state", e.to_string()))?;
    let sync_state = match sync_state_str.as_str() {
        "Unsynced" => SyncState::Unsynced,
        "Synced" => SyncState::Synced,
        "Rejected" => SyncState::Rejected(sync_error.unwrap_or_default()),
        other => return Err(corrupt("sync_state", format!("unknown value '{other}'"))),
    };

    let synced_at: Option<String> = row
        .try_get("synced_at")
        .map_err(|e| corrupt("synced_at", e.to_string()))?;
    let synced_at = synced_at
        .map(|s| parse_timestamp(&s))
        .transpose()
        .map_err(|e| corrupt("synced_at", e))?;

    Ok(AccessEvent {
        id,
        credential_id,
        space_id,
        occurred_at,
        outcome,
        reason_code: row
            .try_get("reason_code")
            .map_err(|e| corrupt("reason_code", e.to_string()))?,
        reason: row
            .try_get("reason")
            .map_err(|e| corrupt("reason", e.to_string()))?,
        mode,
        signature: row
            .try_get("signature")
            .map_err(|e| corrupt("signature", e.to_string()))?,
        sync_state,
        sync_attempts: row
            .try_get::<i64, _>("sync_attempts")
            .map_err(|e| corrupt("sync_attempts", e.to_string()))? as u32,
        synced_at,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_core::{CredentialId, SpaceId};
    use std::path::PathBuf;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir()
            .join("gatewarden-tests")
            .join(format!("{}.db", uuid::Uuid::now_v7()))
    }

    fn test_record() -> EventRecord {
        EventRecord {
            credential_id: CredentialId::new(),
            space_id: SpaceId::new(),
            occurred_at: Utc::now(),
            outcome: EventOutcome::Permit,
            reason_code: "rule_matched".to_string(),
            reason: "permitted".to_string(),
            mode: EvaluationMode::Offline,
        }
    }

    #[tokio::test]
    async fn append_survives_reopen() {
        let path = temp_db_path();
        let signer = EventSigner::new(b"device-key");

        let event = {
            let ledger = SqliteLedger::open(&path, Some(signer.clone())).await.unwrap();
            ledger.append(test_record()).await.unwrap()
        };

        // A fresh handle on the same file sees the event and a seeded backlog.
        let reopened = SqliteLedger::open(&path, Some(signer.clone())).await.unwrap();
        assert_eq!(reopened.unsynced_count(), 1);

        let unsynced = reopened.list_unsynced(10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0], event);
        assert!(unsynced[0].verify_signature(&signer));
    }

    #[tokio::test]
    async fn mark_synced_round_trip() {
        let ledger = SqliteLedger::open(&temp_db_path(), None).await.unwrap();
        let a = ledger.append(test_record()).await.unwrap();
        let b = ledger.append(test_record()).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 2);

        ledger.mark_synced(&[a.id]).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 1);

        let unsynced = ledger.list_unsynced(10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, b.id);

        // Re-marking is a no-op, unknown ids are errors.
        ledger.mark_synced(&[a.id]).await.unwrap();
        assert_eq!(ledger.unsynced_count(), 1);
        assert!(matches!(
            ledger.mark_synced(&[EventId::new()]).await,
            Err(LedgerError::UnknownEvent(_))
        ));
    }

    #[tokio::test]
    async fn rejection_and_attempt_metadata_persist() {
        let ledger = SqliteLedger::open(&temp_db_path(), None).await.unwrap();
        let a = ledger.append(test_record()).await.unwrap();
        let b = ledger.append(test_record()).await.unwrap();

        ledger.record_sync_attempt(&[a.id, b.id]).await.unwrap();
        ledger.mark_rejected(a.id, "unknown space").await.unwrap();
        assert_eq!(ledger.unsynced_count(), 1);

        let unsynced = ledger.list_unsynced(10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, b.id);
        assert_eq!(unsynced[0].sync_attempts, 1);
    }

    #[tokio::test]
    async fn clear_synced_respects_cutoff() {
        let ledger = SqliteLedger::open(&temp_db_path(), None).await.unwrap();
        let a = ledger.append(test_record()).await.unwrap();
        ledger.append(test_record()).await.unwrap();

        ledger.mark_synced(&[a.id]).await.unwrap();

        let removed = ledger
            .clear_synced(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.list_unsynced(10).await.unwrap().len(), 1);
    }
}
