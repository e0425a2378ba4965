use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use contextdoc_core::{GenerationRecord, GenerationStatus, RecordKey, RecordPatch, UsageLedger};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{
    apply_transition, LedgerStore, RecordStore, StoreError, Submission, SubmissionStore,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store. Each operation opens its own connection; writes
/// that read first run inside an immediate transaction.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS generation_records (
                owner_id TEXT NOT NULL,
                wizard_id TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (owner_id, wizard_id)
            );
            CREATE TABLE IF NOT EXISTS usage_ledgers (
                user_id TEXT PRIMARY KEY,
                active INTEGER NOT NULL,
                expires_at TEXT,
                token_count INTEGER NOT NULL DEFAULT 0,
                monthly_token_allowance INTEGER NOT NULL,
                documents_generated INTEGER NOT NULL DEFAULT 0,
                document_limit INTEGER NOT NULL,
                reset_date TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS submissions (
                owner_id TEXT NOT NULL,
                wizard_id TEXT NOT NULL,
                document_type TEXT,
                inputs TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (owner_id, wizard_id)
            );
            CREATE INDEX IF NOT EXISTS idx_generation_records_status ON generation_records(status);
            "#,
        )?;
        Ok(())
    }

    /// Provisions or replaces a user's ledger. Plan management lives outside
    /// the pipeline; this is its write path into the store.
    pub fn upsert_ledger(&self, ledger: &UsageLedger) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO usage_ledgers (user_id, active, expires_at, token_count, monthly_token_allowance, documents_generated, document_limit, reset_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                active = excluded.active,
                expires_at = excluded.expires_at,
                token_count = excluded.token_count,
                monthly_token_allowance = excluded.monthly_token_allowance,
                documents_generated = excluded.documents_generated,
                document_limit = excluded.document_limit,
                reset_date = excluded.reset_date
            "#,
            params![
                ledger.user_id,
                ledger.active,
                ledger.expires_at,
                to_sql_int(ledger.token_count),
                to_sql_int(ledger.monthly_token_allowance),
                ledger.documents_generated,
                ledger.document_limit,
                ledger.reset_date,
            ],
        )?;
        Ok(())
    }
}

fn read_record(conn: &Connection, key: &RecordKey) -> Result<Option<GenerationRecord>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM generation_records WHERE owner_id = ?1 AND wizard_id = ?2",
            params![key.owner_id, key.wizard_id],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

fn write_record(conn: &Connection, record: &GenerationRecord) -> Result<(), StoreError> {
    let body = serde_json::to_string(record)?;
    conn.execute(
        r#"
        INSERT INTO generation_records (owner_id, wizard_id, status, body, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(owner_id, wizard_id) DO UPDATE SET
            status = excluded.status,
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
        params![
            record.key.owner_id,
            record.key.wizard_id,
            record.status.as_str(),
            body,
            record.updated_at,
        ],
    )?;
    Ok(())
}

impl RecordStore for SqliteStore {
    fn get(&self, key: &RecordKey) -> Result<Option<GenerationRecord>, StoreError> {
        let conn = self.connection()?;
        read_record(&conn, key)
    }

    fn create_if_absent(&self, record: GenerationRecord) -> Result<GenerationRecord, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(existing) = read_record(&tx, &record.key)? {
            return Ok(existing);
        }
        write_record(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }

    fn set(&self, record: &GenerationRecord) -> Result<(), StoreError> {
        let conn = self.connection()?;
        write_record(&conn, record)
    }

    fn merge(&self, key: &RecordKey, patch: RecordPatch) -> Result<GenerationRecord, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record =
            read_record(&tx, key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        record.apply(patch, Utc::now());
        write_record(&tx, &record)?;
        tx.commit()?;
        Ok(record)
    }

    fn compare_and_set_status(
        &self,
        key: &RecordKey,
        expected: GenerationStatus,
        next: GenerationStatus,
        patch: RecordPatch,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut record =
            read_record(&tx, key)?.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if !apply_transition(&mut record, expected, next, patch)? {
            return Ok(None);
        }
        write_record(&tx, &record)?;
        tx.commit()?;
        Ok(Some(record))
    }
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<UsageLedger> {
    Ok(UsageLedger {
        user_id: row.get(0)?,
        active: row.get(1)?,
        expires_at: row.get::<_, Option<DateTime<Utc>>>(2)?,
        token_count: from_sql_int(row.get(3)?),
        monthly_token_allowance: from_sql_int(row.get(4)?),
        documents_generated: row.get(5)?,
        document_limit: row.get(6)?,
        reset_date: row.get(7)?,
    })
}

fn read_ledger(conn: &Connection, user_id: &str) -> Result<Option<UsageLedger>, StoreError> {
    Ok(conn
        .query_row(
            r#"
            SELECT user_id, active, expires_at, token_count, monthly_token_allowance,
                   documents_generated, document_limit, reset_date
            FROM usage_ledgers WHERE user_id = ?1
            "#,
            params![user_id],
            ledger_from_row,
        )
        .optional()?)
}

impl LedgerStore for SqliteStore {
    fn load(&self, user_id: &str) -> Result<Option<UsageLedger>, StoreError> {
        let conn = self.connection()?;
        read_ledger(&conn, user_id)
    }

    fn increment(
        &self,
        user_id: &str,
        tokens: u64,
        documents: u32,
    ) -> Result<UsageLedger, StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            r#"
            UPDATE usage_ledgers
            SET token_count = token_count + ?1,
                documents_generated = documents_generated + ?2
            WHERE user_id = ?3
            "#,
            params![to_sql_int(tokens), documents, user_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("usage ledger {user_id}")));
        }
        let ledger = read_ledger(&tx, user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("usage ledger {user_id}")))?;
        tx.commit()?;
        Ok(ledger)
    }
}

impl SubmissionStore for SqliteStore {
    fn save_submission(&self, key: &RecordKey, submission: &Submission) -> Result<(), StoreError> {
        let conn = self.connection()?;
        conn.execute(
            r#"
            INSERT INTO submissions (owner_id, wizard_id, document_type, inputs)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(owner_id, wizard_id) DO UPDATE SET
                document_type = excluded.document_type,
                inputs = excluded.inputs
            "#,
            params![
                key.owner_id,
                key.wizard_id,
                submission.document_type,
                serde_json::to_string(&submission.input)?,
            ],
        )?;
        Ok(())
    }

    fn load_submission(&self, key: &RecordKey) -> Result<Option<Submission>, StoreError> {
        let conn = self.connection()?;
        let row: Option<(Option<String>, String)> = conn
            .query_row(
                "SELECT document_type, inputs FROM submissions WHERE owner_id = ?1 AND wizard_id = ?2",
                params![key.owner_id, key.wizard_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((document_type, inputs)) => Ok(Some(Submission {
                document_type,
                input: serde_json::from_str(&inputs)?,
            })),
            None => Ok(None),
        }
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
