//! SQLite-backed handoff store using sqlx.

use std::future::Future;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    handoff_common::ConversationIdentity,
    sqlx::{Row, SqliteConnection, SqlitePool, sqlite::SqlitePoolOptions},
    tokio::sync::Mutex,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use handoff_metrics::{counter, histogram, labels, queue as queue_metrics, store as store_metrics};

use crate::{
    Error, Result,
    store::HandoffStore,
    types::{HandoffRecord, HandoffState, StateKind, TranscriptMessage},
};

/// SQLite-backed persistence for handoff records and transcripts.
///
/// SQLite allows one writer at a time; `write_lock` queues writers inside the
/// process so a deferred transaction never fails to upgrade mid-operation.
pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other tables, use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self::with_pool(pool))
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl HandoffStore for SqliteStore {
    async fn find_or_create(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        timed("find_or_create", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            insert_if_missing(&mut tx, identity).await?;
            let record = require_record(&mut tx, identity.key()).await?;
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }

    async fn save(&self, record: &HandoffRecord) -> Result<()> {
        record.identity.validate()?;
        timed("save", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            insert_if_missing(&mut tx, &record.identity).await?;

            let current =
                sqlx::query("SELECT state, queue_seq FROM handoff_users WHERE user_id = ?")
                    .bind(record.user_id())
                    .fetch_one(&mut *tx)
                    .await?;
            let was_queued = current.get::<String, _>("state") == StateKind::Queued.as_db_str();
            let queue_seq = match (record.queued_at(), was_queued) {
                (Some(_), true) => current.get::<Option<i64>, _>("queue_seq"),
                (Some(_), false) => Some(next_queue_seq(&mut tx).await?),
                (None, _) => None,
            };

            let columns = StateColumns::from_state(&record.state)?;
            sqlx::query(
                "UPDATE handoff_users
                 SET identity = ?, state = ?, agent_id = ?, agent_identity = ?,
                     queued_at = ?, queue_seq = ?, updated_at = ?
                 WHERE user_id = ?",
            )
            .bind(record.identity.to_json()?)
            .bind(columns.state)
            .bind(&columns.agent_id)
            .bind(&columns.agent_identity)
            .bind(columns.queued_at)
            .bind(queue_seq)
            .bind(record.updated_at.timestamp_millis())
            .bind(record.user_id())
            .execute(&mut *tx)
            .await
            .map_err(|e| pairing_conflict(e, columns.agent_id.as_deref()))?;

            sqlx::query("DELETE FROM handoff_messages WHERE user_id = ?")
                .bind(record.user_id())
                .execute(&mut *tx)
                .await?;
            // Stored oldest first so that `ORDER BY id DESC` yields newest first.
            for message in record.messages.iter().rev() {
                insert_message(&mut tx, record.user_id(), &message.sender, &message.text).await?;
            }

            tx.commit().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    async fn append_message(
        &self,
        record: &HandoffRecord,
        sender: &str,
        text: &str,
    ) -> Result<HandoffRecord> {
        record.identity.validate()?;
        timed("append_message", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            insert_if_missing(&mut tx, &record.identity).await?;
            insert_message(&mut tx, record.user_id(), sender, text).await?;
            sqlx::query("UPDATE handoff_users SET updated_at = ? WHERE user_id = ?")
                .bind(now_ms())
                .bind(record.user_id())
                .execute(&mut *tx)
                .await?;
            let stored = require_record(&mut tx, record.user_id()).await?;
            tx.commit().await?;
            Ok::<_, Error>(stored)
        })
        .await
    }

    async fn find_by_agent(&self, agent: &ConversationIdentity) -> Result<Option<HandoffRecord>> {
        timed("find_by_agent", async {
            let mut tx = self.pool.begin().await?;
            let user_id = paired_user_id(&mut tx, agent).await?;
            let record = match user_id {
                Some(user_id) => load_record(&mut tx, &user_id).await?,
                None => None,
            };
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }

    async fn enqueue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        timed("enqueue", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            insert_if_missing(&mut tx, identity).await?;
            let seq = next_queue_seq(&mut tx).await?;
            let now = now_ms();
            let result = sqlx::query(
                "UPDATE handoff_users
                 SET state = 'queued', queued_at = ?, queue_seq = ?, updated_at = ?
                 WHERE user_id = ? AND state = 'bot'",
            )
            .bind(now)
            .bind(seq)
            .bind(now)
            .bind(identity.key())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                debug!(user_id = identity.key(), queue_seq = seq, "user enqueued");
                #[cfg(feature = "metrics")]
                counter!(queue_metrics::ENQUEUED_TOTAL).increment(1);
            }
            let record = require_record(&mut tx, identity.key()).await?;
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }

    async fn dequeue(&self, identity: &ConversationIdentity) -> Result<HandoffRecord> {
        identity.validate()?;
        timed("dequeue", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            insert_if_missing(&mut tx, identity).await?;
            let result = sqlx::query(
                "UPDATE handoff_users
                 SET state = 'bot', queued_at = NULL, queue_seq = NULL, updated_at = ?
                 WHERE user_id = ? AND state = 'queued'",
            )
            .bind(now_ms())
            .bind(identity.key())
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                debug!(user_id = identity.key(), "user left the queue");
                #[cfg(feature = "metrics")]
                counter!(queue_metrics::CANCELLED_TOTAL).increment(1);
            }
            let record = require_record(&mut tx, identity.key()).await?;
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }

    async fn pair_with_agent(
        &self,
        agent: &ConversationIdentity,
    ) -> Result<Option<HandoffRecord>> {
        agent.validate()?;
        timed("pair_with_agent", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            if paired_user_id(&mut tx, agent).await?.is_some() {
                return Err(Error::agent_already_paired(agent.key()));
            }

            let head = sqlx::query(
                "SELECT user_id, queued_at FROM handoff_users
                 WHERE state = 'queued'
                 ORDER BY queued_at ASC, queue_seq ASC
                 LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await?;
            let Some(head) = head else {
                return Ok(None);
            };
            let user_id: String = head.get("user_id");

            #[cfg(feature = "metrics")]
            {
                let queued_at: i64 = head.get("queued_at");
                let waited = (now_ms() - queued_at).max(0) as f64 / 1000.0;
                histogram!(queue_metrics::WAIT_SECONDS).record(waited);
            }

            sqlx::query(
                "UPDATE handoff_users
                 SET state = 'with_agent', agent_id = ?, agent_identity = ?,
                     queued_at = NULL, queue_seq = NULL, updated_at = ?
                 WHERE user_id = ? AND state = 'queued'",
            )
            .bind(agent.key())
            .bind(agent.to_json()?)
            .bind(now_ms())
            .bind(&user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| pairing_conflict(e, Some(agent.key())))?;

            let record = require_record(&mut tx, &user_id).await?;
            tx.commit().await?;
            Ok::<_, Error>(Some(record))
        })
        .await
    }

    async fn unpair_agent(&self, agent: &ConversationIdentity) -> Result<HandoffRecord> {
        timed("unpair_agent", async {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;
            let user_id = paired_user_id(&mut tx, agent)
                .await?
                .ok_or_else(|| Error::not_paired(agent.key()))?;
            sqlx::query(
                "UPDATE handoff_users
                 SET state = 'bot', agent_id = NULL, agent_identity = NULL, updated_at = ?
                 WHERE user_id = ?",
            )
            .bind(now_ms())
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;
            let record = require_record(&mut tx, &user_id).await?;
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }

    async fn list_queue(&self) -> Result<Vec<HandoffRecord>> {
        timed("list_queue", async {
            let mut tx = self.pool.begin().await?;
            let rows = sqlx::query(
                "SELECT user_id FROM handoff_users
                 WHERE state = 'queued'
                 ORDER BY queued_at ASC, queue_seq ASC",
            )
            .fetch_all(&mut *tx)
            .await?;

            let mut queue = Vec::with_capacity(rows.len());
            for row in rows {
                let user_id: String = row.get("user_id");
                queue.push(require_record(&mut tx, &user_id).await?);
            }
            tx.commit().await?;
            Ok::<_, Error>(queue)
        })
        .await
    }

    async fn get(&self, user_id: &str) -> Result<Option<HandoffRecord>> {
        timed("get", async {
            let mut tx = self.pool.begin().await?;
            let record = load_record(&mut tx, user_id).await?;
            tx.commit().await?;
            Ok::<_, Error>(record)
        })
        .await
    }
}

/// Column values for one [`HandoffState`].
struct StateColumns {
    state: &'static str,
    agent_id: Option<String>,
    agent_identity: Option<String>,
    queued_at: Option<i64>,
}

impl StateColumns {
    fn from_state(state: &HandoffState) -> Result<Self> {
        Ok(match state {
            HandoffState::Bot => Self {
                state: StateKind::Bot.as_db_str(),
                agent_id: None,
                agent_identity: None,
                queued_at: None,
            },
            HandoffState::Queued { queued_at } => Self {
                state: StateKind::Queued.as_db_str(),
                agent_id: None,
                agent_identity: None,
                queued_at: Some(queued_at.timestamp_millis()),
            },
            HandoffState::WithAgent { agent } => Self {
                state: StateKind::WithAgent.as_db_str(),
                agent_id: Some(agent.key().to_string()),
                agent_identity: Some(agent.to_json()?),
                queued_at: None,
            },
        })
    }
}

async fn timed<T>(operation: &'static str, op: impl Future<Output = Result<T>>) -> Result<T> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();
    let result = op.await;
    #[cfg(feature = "metrics")]
    histogram!(
        store_metrics::OPERATION_DURATION_SECONDS,
        labels::BACKEND => "sqlite",
        labels::OPERATION => operation
    )
    .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        debug!(operation, error = %e, "sqlite store operation failed");
    }
    result
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn pairing_conflict(err: sqlx::Error, agent_id: Option<&str>) -> Error {
    if let (sqlx::Error::Database(db), Some(agent_id)) = (&err, agent_id)
        && db.is_unique_violation()
    {
        return Error::agent_already_paired(agent_id);
    }
    Error::Sqlx(err)
}

async fn insert_if_missing(
    conn: &mut SqliteConnection,
    identity: &ConversationIdentity,
) -> Result<()> {
    let now = now_ms();
    let result = sqlx::query(
        "INSERT INTO handoff_users (user_id, identity, state, created_at, updated_at)
         VALUES (?, ?, 'bot', ?, ?)
         ON CONFLICT(user_id) DO NOTHING",
    )
    .bind(identity.key())
    .bind(identity.to_json()?)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 1 {
        debug!(user_id = identity.key(), "creating handoff record");
        #[cfg(feature = "metrics")]
        counter!(store_metrics::RECORDS_CREATED_TOTAL, labels::BACKEND => "sqlite").increment(1);
    }
    Ok(())
}

async fn insert_message(
    conn: &mut SqliteConnection,
    user_id: &str,
    sender: &str,
    text: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO handoff_messages (user_id, sender, text, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(sender)
    .bind(text)
    .bind(now_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn next_queue_seq(conn: &mut SqliteConnection) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(queue_seq), 0) + 1 AS seq FROM handoff_users")
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get("seq"))
}

async fn paired_user_id(
    conn: &mut SqliteConnection,
    agent: &ConversationIdentity,
) -> Result<Option<String>> {
    let row = sqlx::query("SELECT user_id FROM handoff_users WHERE agent_id = ?")
        .bind(agent.key())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.get("user_id")))
}

async fn require_record(conn: &mut SqliteConnection, user_id: &str) -> Result<HandoffRecord> {
    load_record(conn, user_id)
        .await?
        .ok_or_else(|| Error::corrupt(user_id, "row vanished inside its own transaction"))
}

async fn load_record(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<HandoffRecord>> {
    let Some(row) = sqlx::query(
        "SELECT identity, state, agent_identity, queued_at, created_at, updated_at
         FROM handoff_users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let identity = ConversationIdentity::from_json(row.get("identity"))?;
    let state_str: String = row.get("state");
    let state = match StateKind::from_db_str(&state_str) {
        Some(StateKind::Bot) => HandoffState::Bot,
        Some(StateKind::Queued) => {
            let ms = row
                .get::<Option<i64>, _>("queued_at")
                .ok_or_else(|| Error::corrupt(user_id, "queued without queued_at"))?;
            HandoffState::Queued {
                queued_at: from_ms(user_id, ms)?,
            }
        },
        Some(StateKind::WithAgent) => {
            let raw = row
                .get::<Option<String>, _>("agent_identity")
                .ok_or_else(|| Error::corrupt(user_id, "paired without agent_identity"))?;
            HandoffState::WithAgent {
                agent: ConversationIdentity::from_json(&raw)?,
            }
        },
        None => return Err(Error::corrupt(user_id, format!("unknown state {state_str:?}"))),
    };

    let messages = sqlx::query(
        "SELECT sender, text FROM handoff_messages WHERE user_id = ? ORDER BY id DESC",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|r| TranscriptMessage::new(r.get::<String, _>("sender"), r.get::<String, _>("text")))
    .collect();

    Ok(Some(HandoffRecord {
        identity,
        state,
        messages,
        created_at: from_ms(user_id, row.get("created_at"))?,
        updated_at: from_ms(user_id, row.get("updated_at"))?,
    }))
}

fn from_ms(user_id: &str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::corrupt(user_id, format!("timestamp out of range: {ms}")))
}
