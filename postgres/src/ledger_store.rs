//! Production [`LedgerStore`] backed by `PostgreSQL`.
//!
//! Four tables hold the ledger: `allocations`, `allocation_line_items`,
//! `redemption_entries` and `pending_redemptions`. Every operation with a
//! check-then-act hazard is a single conditional statement or a short
//! transaction holding a row lock:
//!
//! - `transition_allocation` is one `UPDATE ... WHERE status = ANY(allowed)`,
//!   so of two racing transitions exactly one matches the row
//! - `record_entry` takes `FOR UPDATE` on the allocation row, sums the
//!   participant's ledger and inserts, all in one transaction
//! - `confirm_intent` locks the allocation row, compare-and-swaps the intent
//!   row to `completed` and writes the ledger entry in the same transaction;
//!   a failed balance check rolls both back and the intent stays pending
//!
//! Every writer takes the allocation row lock before touching any intent
//! row, so transactions never wait on each other in opposite orders.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, types::Uuid};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use voucher_core::allocation::{AllocationPatch, StatusChange, Transition};
use voucher_core::error::LedgerError;
use voucher_core::ledger::{Balance, validate_redeemable, validate_within_remaining};
use voucher_core::store::{ConfirmedRedemption, LedgerStore};
use voucher_core::token::IntentToken;
use voucher_core::types::{
    ActorId, Allocation, AllocationId, AllocationStatus, EntryId, EventId, IntentStatus, ItemId,
    LineItem, ParticipantId, PendingRedemption, RedemptionEntry, TenantId,
};

/// Ordered, idempotent DDL statements for the ledger schema.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS allocations (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL,
        tenant_id UUID NOT NULL,
        voucher_quota_per_participant BIGINT NOT NULL,
        notes TEXT,
        status TEXT NOT NULL,
        created_by UUID NOT NULL,
        approved_by UUID,
        created_at TIMESTAMPTZ NOT NULL,
        approved_at TIMESTAMPTZ
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_allocations_event
        ON allocations (event_id, created_at DESC)
    ",
    r"
    CREATE TABLE IF NOT EXISTS allocation_line_items (
        allocation_id UUID NOT NULL REFERENCES allocations (id) ON DELETE CASCADE,
        position BIGINT NOT NULL,
        item_id UUID NOT NULL,
        quantity_per_participant BIGINT NOT NULL,
        PRIMARY KEY (allocation_id, position)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS redemption_entries (
        id UUID PRIMARY KEY,
        seq BIGSERIAL,
        allocation_id UUID NOT NULL REFERENCES allocations (id),
        participant_id UUID NOT NULL,
        quantity BIGINT NOT NULL,
        actor UUID NOT NULL,
        note TEXT,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_entries_participant
        ON redemption_entries (allocation_id, participant_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS pending_redemptions (
        token TEXT PRIMARY KEY,
        allocation_id UUID NOT NULL REFERENCES allocations (id) ON DELETE CASCADE,
        participant_id UUID NOT NULL,
        quantity BIGINT NOT NULL,
        notes TEXT,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        processed_by UUID,
        processed_at TIMESTAMPTZ
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_pending_redemptions_sweep
        ON pending_redemptions (status, created_at)
    ",
];

/// Create the ledger schema when it does not exist yet.
///
/// Safe to run on every startup; each statement is idempotent.
///
/// # Errors
///
/// Returns [`LedgerError::Storage`] when a statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), LedgerError> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
    }
    tracing::info!("Ledger schema ready");
    Ok(())
}

/// `PostgreSQL`-backed implementation of [`LedgerStore`].
///
/// Holds a connection pool; build one store per pool and share it behind an
/// `Arc`, or build additional stores over a cloned pool.
///
/// # Example
///
/// ```no_run
/// use voucher_postgres::{PostgresLedgerStore, run_migrations};
///
/// # async fn example() -> Result<(), voucher_core::error::LedgerError> {
/// let store = PostgresLedgerStore::connect("postgres://localhost/vouchers").await?;
/// run_migrations(store.pool()).await?;
/// # Ok(())
/// # }
/// ```
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Connect to the database and build a store over a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Storage`] when the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Build a store over an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load the ordered line items of one allocation.
    async fn fetch_line_items(
        conn: &mut sqlx::PgConnection,
        id: AllocationId,
    ) -> Result<Vec<LineItem>, LedgerError> {
        let rows = sqlx::query(
            r"
            SELECT item_id, quantity_per_participant
            FROM allocation_line_items
            WHERE allocation_id = $1
            ORDER BY position ASC
            ",
        )
        .bind(*id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                LineItem::new(
                    ItemId::from_uuid(row.get("item_id")),
                    row.get("quantity_per_participant"),
                )
            })
            .collect())
    }

    /// Replace the line-item rows of one allocation within a transaction.
    async fn insert_line_items(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: AllocationId,
        line_items: &[LineItem],
    ) -> Result<(), LedgerError> {
        for (position, item) in line_items.iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)] // Line-item lists are tiny, i64 is safe
            let position = position as i64;
            sqlx::query(
                r"
                INSERT INTO allocation_line_items (allocation_id, position, item_id, quantity_per_participant)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(*id.as_uuid())
            .bind(position)
            .bind(*item.item_id.as_uuid())
            .bind(item.quantity_per_participant)
            .execute(&mut **tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Lock one allocation row and return its quota and status.
    async fn lock_allocation(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: AllocationId,
    ) -> Result<(i64, AllocationStatus), LedgerError> {
        let row = sqlx::query(
            r"
            SELECT voucher_quota_per_participant, status
            FROM allocations
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?
        .ok_or(LedgerError::AllocationNotFound { id })?;

        let status: String = row.get("status");
        Ok((
            row.get("voucher_quota_per_participant"),
            parse_allocation_status(&status)?,
        ))
    }

    /// Sum one participant's signed ledger quantities.
    async fn fetch_net(
        conn: &mut sqlx::PgConnection,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Result<i64, LedgerError> {
        let (net,): (i64,) = sqlx::query_as(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM redemption_entries
            WHERE allocation_id = $1 AND participant_id = $2
            ",
        )
        .bind(*allocation_id.as_uuid())
        .bind(*participant_id.as_uuid())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(net)
    }

    /// Append one entry row within a transaction.
    async fn insert_entry_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry: &RedemptionEntry,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r"
            INSERT INTO redemption_entries (id, allocation_id, participant_id, quantity, actor, note, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.allocation_id.as_uuid())
        .bind(*entry.participant_id.as_uuid())
        .bind(entry.quantity)
        .bind(*entry.actor.as_uuid())
        .bind(entry.note.as_deref())
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fail with `AllocationNotFound` unless the allocation row exists.
    async fn ensure_allocation_exists(&self, id: AllocationId) -> Result<(), LedgerError> {
        let row = sqlx::query("SELECT 1 FROM allocations WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        if row.is_some() {
            Ok(())
        } else {
            Err(LedgerError::AllocationNotFound { id })
        }
    }

    /// Convert a database row plus its line items to an `Allocation`.
    fn row_to_allocation(
        row: &sqlx::postgres::PgRow,
        line_items: Vec<LineItem>,
    ) -> Result<Allocation, LedgerError> {
        let status: String = row.get("status");
        Ok(Allocation {
            id: AllocationId::from_uuid(row.get("id")),
            event_id: EventId::from_uuid(row.get("event_id")),
            tenant_id: TenantId::from_uuid(row.get("tenant_id")),
            line_items,
            voucher_quota_per_participant: row.get("voucher_quota_per_participant"),
            notes: row.get("notes"),
            status: parse_allocation_status(&status)?,
            created_by: ActorId::from_uuid(row.get("created_by")),
            approved_by: row
                .get::<Option<Uuid>, _>("approved_by")
                .map(ActorId::from_uuid),
            created_at: row.get("created_at"),
            approved_at: row.get("approved_at"),
        })
    }

    /// Convert a database row to a `RedemptionEntry`.
    fn row_to_entry(row: &sqlx::postgres::PgRow) -> RedemptionEntry {
        RedemptionEntry {
            id: EntryId::from_uuid(row.get("id")),
            allocation_id: AllocationId::from_uuid(row.get("allocation_id")),
            participant_id: ParticipantId::from_uuid(row.get("participant_id")),
            quantity: row.get("quantity"),
            actor: ActorId::from_uuid(row.get("actor")),
            note: row.get("note"),
            recorded_at: row.get("recorded_at"),
        }
    }

    /// Convert a database row to a `PendingRedemption`.
    fn row_to_intent(row: &sqlx::postgres::PgRow) -> Result<PendingRedemption, LedgerError> {
        let status: String = row.get("status");
        Ok(PendingRedemption {
            token: IntentToken::from_string(row.get("token")),
            allocation_id: AllocationId::from_uuid(row.get("allocation_id")),
            participant_id: ParticipantId::from_uuid(row.get("participant_id")),
            quantity: row.get("quantity"),
            notes: row.get("notes"),
            status: parse_intent_status(&status)?,
            created_at: row.get("created_at"),
            processed_by: row
                .get::<Option<Uuid>, _>("processed_by")
                .map(ActorId::from_uuid),
            processed_at: row.get("processed_at"),
        })
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn insert_allocation(
        &self,
        allocation: Allocation,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO allocations (
                    id, event_id, tenant_id, voucher_quota_per_participant, notes,
                    status, created_by, approved_by, created_at, approved_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(*allocation.id.as_uuid())
            .bind(*allocation.event_id.as_uuid())
            .bind(*allocation.tenant_id.as_uuid())
            .bind(allocation.voucher_quota_per_participant)
            .bind(allocation.notes.as_deref())
            .bind(allocation.status.as_str())
            .bind(*allocation.created_by.as_uuid())
            .bind(allocation.approved_by.map(|a| *a.as_uuid()))
            .bind(allocation.created_at)
            .bind(allocation.approved_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            Self::insert_line_items(&mut tx, allocation.id, &allocation.line_items).await?;

            tx.commit()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            tracing::info!(
                allocation_id = %allocation.id,
                event_id = %allocation.event_id,
                status = allocation.status.as_str(),
                "Allocation inserted"
            );

            Ok(allocation)
        })
    }

    fn allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Allocation>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let row = sqlx::query(
                r"
                SELECT id, event_id, tenant_id, voucher_quota_per_participant, notes,
                       status, created_by, approved_by, created_at, approved_at
                FROM allocations
                WHERE id = $1
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            match row {
                None => Ok(None),
                Some(row) => {
                    let line_items = Self::fetch_line_items(&mut *conn, id).await?;
                    Self::row_to_allocation(&row, line_items).map(Some)
                }
            }
        })
    }

    fn allocations_for_event(
        &self,
        event_id: EventId,
        status: Option<AllocationStatus>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Allocation>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let rows = sqlx::query(
                r"
                SELECT id, event_id, tenant_id, voucher_quota_per_participant, notes,
                       status, created_by, approved_by, created_at, approved_at
                FROM allocations
                WHERE event_id = $1 AND ($2::TEXT IS NULL OR status = $2)
                ORDER BY created_at DESC
                ",
            )
            .bind(*event_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let mut allocations = Vec::with_capacity(rows.len());
            for row in &rows {
                let id = AllocationId::from_uuid(row.get("id"));
                let line_items = Self::fetch_line_items(&mut *conn, id).await?;
                allocations.push(Self::row_to_allocation(row, line_items)?);
            }
            Ok(allocations)
        })
    }

    fn update_allocation(
        &self,
        id: AllocationId,
        patch: AllocationPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let row = sqlx::query(
                r"
                SELECT id, event_id, tenant_id, voucher_quota_per_participant, notes,
                       status, created_by, approved_by, created_at, approved_at
                FROM allocations
                WHERE id = $1
                FOR UPDATE
                ",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or(LedgerError::AllocationNotFound { id })?;

            let line_items = Self::fetch_line_items(&mut *tx, id).await?;
            let mut allocation = Self::row_to_allocation(&row, line_items)?;

            // Editability and the content invariant are checked against the
            // row as persisted, under its lock.
            patch.check(&allocation)?;
            patch.apply(&mut allocation);

            sqlx::query(
                r"
                UPDATE allocations
                SET voucher_quota_per_participant = $2, notes = $3
                WHERE id = $1
                ",
            )
            .bind(*id.as_uuid())
            .bind(allocation.voucher_quota_per_participant)
            .bind(allocation.notes.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            if patch.line_items.is_some() {
                sqlx::query("DELETE FROM allocation_line_items WHERE allocation_id = $1")
                    .bind(*id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
                Self::insert_line_items(&mut tx, id, &allocation.line_items).await?;
            }

            tx.commit()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            tracing::info!(allocation_id = %id, "Allocation contents updated");
            Ok(allocation)
        })
    }

    fn transition_allocation(
        &self,
        id: AllocationId,
        transition: Transition,
        change: StatusChange,
    ) -> Pin<Box<dyn Future<Output = Result<Allocation, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let sources: Vec<String> = transition
                .allowed_sources()
                .iter()
                .map(|status| status.as_str().to_string())
                .collect();

            // One conditional update is the whole compare-and-swap: the
            // allowed sources are the WHERE clause, the change is the SET.
            let row = sqlx::query(
                r"
                UPDATE allocations
                SET status = $2,
                    approved_by = CASE WHEN $3 THEN NULL ELSE COALESCE($4, approved_by) END,
                    approved_at = CASE WHEN $3 THEN NULL ELSE COALESCE($5, approved_at) END,
                    notes = CASE
                        WHEN $6::TEXT IS NULL THEN notes
                        WHEN notes IS NULL OR notes = '' THEN $6
                        ELSE notes || E'\n' || $6
                    END
                WHERE id = $1 AND status = ANY($7)
                RETURNING id, event_id, tenant_id, voucher_quota_per_participant, notes,
                          status, created_by, approved_by, created_at, approved_at
                ",
            )
            .bind(*id.as_uuid())
            .bind(change.to.as_str())
            .bind(change.clear_approver)
            .bind(change.approver.map(|a| *a.as_uuid()))
            .bind(change.decided_at)
            .bind(change.append_note.as_deref())
            .bind(sources)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            match row {
                Some(row) => {
                    let line_items = Self::fetch_line_items(&mut *conn, id).await?;
                    let allocation = Self::row_to_allocation(&row, line_items)?;
                    tracing::info!(
                        allocation_id = %id,
                        action = transition.verb(),
                        status = allocation.status.as_str(),
                        "Allocation transitioned"
                    );
                    metrics::counter!("ledger.allocations.transitioned", "action" => transition.verb())
                        .increment(1);
                    Ok(allocation)
                }
                None => {
                    // The update missed: report the status a concurrent
                    // winner left behind, or not-found for an unknown id.
                    let current: Option<(String,)> =
                        sqlx::query_as("SELECT status FROM allocations WHERE id = $1")
                            .bind(*id.as_uuid())
                            .fetch_optional(&mut *conn)
                            .await
                            .map_err(|e| LedgerError::Storage(e.to_string()))?;
                    match current {
                        None => Err(LedgerError::AllocationNotFound { id }),
                        Some((status,)) => {
                            Err(transition.stale_error(parse_allocation_status(&status)?))
                        }
                    }
                }
            }
        })
    }

    fn delete_allocation(
        &self,
        id: AllocationId,
    ) -> Pin<Box<dyn Future<Output = Result<(), LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            // Lock the row so a racing ledger write serializes with the
            // emptiness check below.
            let row = sqlx::query("SELECT id FROM allocations WHERE id = $1 FOR UPDATE")
                .bind(*id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
            if row.is_none() {
                return Err(LedgerError::AllocationNotFound { id });
            }

            let (entries,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM redemption_entries WHERE allocation_id = $1")
                    .bind(*id.as_uuid())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
            if entries > 0 {
                return Err(LedgerError::LedgerNotEmpty { entries });
            }

            // Line items and pending intents cascade with the row.
            sqlx::query("DELETE FROM allocations WHERE id = $1")
                .bind(*id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            tracing::info!(allocation_id = %id, "Allocation deleted");
            Ok(())
        })
    }

    fn record_entry(
        &self,
        entry: RedemptionEntry,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            // The row lock serializes every writer touching this allocation,
            // so the sum below cannot go stale before the insert commits.
            let (quota, status) = Self::lock_allocation(&mut tx, entry.allocation_id).await?;
            validate_redeemable(status)?;

            let net = Self::fetch_net(&mut *tx, entry.allocation_id, entry.participant_id).await?;
            // Only positive quantities are capped; reassignments always fit.
            if entry.quantity > 0 {
                validate_within_remaining(&Balance::from_net(quota, net), entry.quantity)?;
            }

            Self::insert_entry_row(&mut tx, &entry).await?;
            tx.commit()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let balance = Balance::from_net(quota, net + entry.quantity);
            let kind = if entry.quantity > 0 { "redeem" } else { "reassign" };
            tracing::info!(
                allocation_id = %entry.allocation_id,
                participant_id = %entry.participant_id,
                quantity = entry.quantity,
                remaining = balance.remaining,
                "Ledger entry recorded"
            );
            metrics::counter!("ledger.entries.recorded", "kind" => kind).increment(1);
            observe_write_duration("record_entry", started);
            Ok(balance)
        })
    }

    fn entries(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RedemptionEntry>, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            self.ensure_allocation_exists(allocation_id).await?;

            let rows = sqlx::query(
                r"
                SELECT id, allocation_id, participant_id, quantity, actor, note, recorded_at
                FROM redemption_entries
                WHERE allocation_id = $1 AND participant_id = $2
                ORDER BY seq DESC
                ",
            )
            .bind(*allocation_id.as_uuid())
            .bind(*participant_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_entry).collect())
        })
    }

    fn balance(
        &self,
        allocation_id: AllocationId,
        participant_id: ParticipantId,
    ) -> Pin<Box<dyn Future<Output = Result<Balance, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let row =
                sqlx::query("SELECT voucher_quota_per_participant FROM allocations WHERE id = $1")
                    .bind(*allocation_id.as_uuid())
                    .fetch_optional(&mut *conn)
                    .await
                    .map_err(|e| LedgerError::Storage(e.to_string()))?
                    .ok_or(LedgerError::AllocationNotFound { id: allocation_id })?;
            let quota: i64 = row.get("voucher_quota_per_participant");

            let net = Self::fetch_net(&mut *conn, allocation_id, participant_id).await?;
            Ok(Balance::from_net(quota, net))
        })
    }

    fn insert_intent(
        &self,
        intent: PendingRedemption,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO pending_redemptions (
                    token, allocation_id, participant_id, quantity, notes,
                    status, created_at, processed_by, processed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(intent.token.as_str())
            .bind(*intent.allocation_id.as_uuid())
            .bind(*intent.participant_id.as_uuid())
            .bind(intent.quantity)
            .bind(intent.notes.as_deref())
            .bind(intent.status.as_str())
            .bind(intent.created_at)
            .bind(intent.processed_by.map(|a| *a.as_uuid()))
            .bind(intent.processed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            // The token itself is a bearer secret and stays out of the logs.
            tracing::info!(
                allocation_id = %intent.allocation_id,
                participant_id = %intent.participant_id,
                quantity = intent.quantity,
                "Redemption intent issued"
            );
            Ok(intent)
        })
    }

    fn intent(
        &self,
        token: &IntentToken,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PendingRedemption>, LedgerError>> + Send + '_>>
    {
        let token = token.clone();
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT token, allocation_id, participant_id, quantity, notes,
                       status, created_at, processed_by, processed_at
                FROM pending_redemptions
                WHERE token = $1
                ",
            )
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            row.as_ref().map(Self::row_to_intent).transpose()
        })
    }

    fn confirm_intent(
        &self,
        token: &IntentToken,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<ConfirmedRedemption, LedgerError>> + Send + '_>> {
        let token = token.clone();
        Box::pin(async move {
            let started = Instant::now();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            // Resolve the target allocation before touching the intent row:
            // the allocation lock must come first, in the same order every
            // other writer takes it.
            let target: Option<(Uuid,)> = sqlx::query_as(
                "SELECT allocation_id FROM pending_redemptions WHERE token = $1 AND status = 'pending'",
            )
            .bind(token.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
            let Some((allocation,)) = target else {
                return Err(LedgerError::IntentNotFound);
            };
            let allocation_id = AllocationId::from_uuid(allocation);

            // A vanished allocation means the intent cascaded away with it.
            let (quota, status) = match Self::lock_allocation(&mut tx, allocation_id).await {
                Err(LedgerError::AllocationNotFound { .. }) => {
                    return Err(LedgerError::IntentNotFound);
                }
                other => other?,
            };
            validate_redeemable(status)?;

            // The status condition makes confirm single-use: the second of
            // two racing confirms matches zero rows. Unknown and resolved
            // tokens report identically.
            let row = sqlx::query(
                r"
                UPDATE pending_redemptions
                SET status = 'completed', processed_by = $2, processed_at = $3
                WHERE token = $1 AND status = 'pending'
                RETURNING token, allocation_id, participant_id, quantity, notes,
                          status, created_at, processed_by, processed_at
                ",
            )
            .bind(token.as_str())
            .bind(*actor.as_uuid())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or(LedgerError::IntentNotFound)?;
            let intent = Self::row_to_intent(&row)?;

            let net = Self::fetch_net(&mut *tx, intent.allocation_id, intent.participant_id).await?;
            // On failure the transaction rolls back and the intent stays
            // pending for a retry or cancel.
            validate_within_remaining(&Balance::from_net(quota, net), intent.quantity)?;

            let entry = RedemptionEntry::new(
                EntryId::new(),
                intent.allocation_id,
                intent.participant_id,
                intent.quantity,
                actor,
                intent.notes.clone(),
                now,
            );
            Self::insert_entry_row(&mut tx, &entry).await?;

            tx.commit()
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let balance = Balance::from_net(quota, net + intent.quantity);
            tracing::info!(
                allocation_id = %intent.allocation_id,
                participant_id = %intent.participant_id,
                quantity = intent.quantity,
                remaining = balance.remaining,
                "Redemption intent confirmed"
            );
            metrics::counter!("ledger.intents.confirmed").increment(1);
            observe_write_duration("confirm_intent", started);

            Ok(ConfirmedRedemption {
                intent,
                entry,
                balance,
            })
        })
    }

    fn resolve_intent(
        &self,
        token: &IntentToken,
        to: IntentStatus,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<PendingRedemption, LedgerError>> + Send + '_>> {
        let token = token.clone();
        Box::pin(async move {
            if !matches!(to, IntentStatus::Cancelled | IntentStatus::Expired) {
                return Err(LedgerError::Storage(format!(
                    "resolve_intent cannot target status '{to}'"
                )));
            }

            let row = sqlx::query(
                r"
                UPDATE pending_redemptions
                SET status = $2, processed_by = $3, processed_at = $4
                WHERE token = $1 AND status = 'pending'
                RETURNING token, allocation_id, participant_id, quantity, notes,
                          status, created_at, processed_by, processed_at
                ",
            )
            .bind(token.as_str())
            .bind(to.as_str())
            .bind(*actor.as_uuid())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or(LedgerError::IntentNotFound)?;

            let intent = Self::row_to_intent(&row)?;
            tracing::info!(
                allocation_id = %intent.allocation_id,
                status = to.as_str(),
                "Redemption intent resolved"
            );
            Ok(intent)
        })
    }

    fn expire_stale_intents(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, LedgerError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE pending_redemptions
                SET status = 'expired', processed_at = $2
                WHERE status = 'pending' AND created_at < $1
                ",
            )
            .bind(cutoff)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

            let expired = result.rows_affected();
            if expired > 0 {
                tracing::info!(count = expired, "Expired stale redemption intents");
                metrics::counter!("ledger.intents.expired").increment(expired);
            }
            Ok(expired)
        })
    }
}

/// Record how long a committed ledger write took, labeled by operation.
fn observe_write_duration(operation: &'static str, started: Instant) {
    metrics::histogram!("ledger.write.duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Parse a stored allocation status, rejecting unknown values.
fn parse_allocation_status(value: &str) -> Result<AllocationStatus, LedgerError> {
    AllocationStatus::parse(value)
        .ok_or_else(|| LedgerError::Storage(format!("Invalid allocation status: {value}")))
}

/// Parse a stored intent status, rejecting unknown values.
fn parse_intent_status(value: &str) -> Result<IntentStatus, LedgerError> {
    IntentStatus::parse(value)
        .ok_or_else(|| LedgerError::Storage(format!("Invalid intent status: {value}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn allocation_status_parsing() {
        for status in [
            AllocationStatus::Open,
            AllocationStatus::Draft,
            AllocationStatus::Pending,
            AllocationStatus::Approved,
            AllocationStatus::Rejected,
        ] {
            let parsed =
                parse_allocation_status(status.as_str()).expect("valid status should parse");
            assert_eq!(parsed, status);
        }
        assert!(parse_allocation_status("invalid").is_err());
    }

    #[test]
    fn intent_status_parsing() {
        for status in [
            IntentStatus::Pending,
            IntentStatus::Completed,
            IntentStatus::Expired,
            IntentStatus::Cancelled,
        ] {
            let parsed = parse_intent_status(status.as_str()).expect("valid status should parse");
            assert_eq!(parsed, status);
        }
        assert!(parse_intent_status("invalid").is_err());
    }

    #[derive(Default)]
    struct CapturingRecorder {
        histograms: std::sync::Arc<std::sync::Mutex<Vec<(String, String, f64)>>>,
    }

    struct CapturedHistogram {
        name: String,
        operation: String,
        sink: std::sync::Arc<std::sync::Mutex<Vec<(String, String, f64)>>>,
    }

    impl metrics::HistogramFn for CapturedHistogram {
        fn record(&self, value: f64) {
            self.sink
                .lock()
                .unwrap()
                .push((self.name.clone(), self.operation.clone(), value));
        }
    }

    impl metrics::Recorder for CapturingRecorder {
        fn describe_counter(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }
        fn describe_gauge(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }
        fn describe_histogram(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }
        fn register_counter(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Counter {
            metrics::Counter::noop()
        }
        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::noop()
        }
        fn register_histogram(
            &self,
            key: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Histogram {
            let operation = key
                .labels()
                .find(|label| label.key() == "operation")
                .map(|label| label.value().to_string())
                .unwrap_or_default();
            metrics::Histogram::from_arc(std::sync::Arc::new(CapturedHistogram {
                name: key.name().to_string(),
                operation,
                sink: self.histograms.clone(),
            }))
        }
    }

    #[test]
    fn ledger_writes_record_a_duration_histogram() {
        let recorder = CapturingRecorder::default();
        let histograms = recorder.histograms.clone();

        metrics::with_local_recorder(&recorder, || {
            observe_write_duration("record_entry", Instant::now());
            observe_write_duration("confirm_intent", Instant::now());
        });

        let recorded = histograms.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        for (name, _, seconds) in recorded.iter() {
            assert_eq!(name, "ledger.write.duration_seconds");
            assert!(*seconds >= 0.0);
        }
        let operations: Vec<&str> = recorded.iter().map(|(_, op, _)| op.as_str()).collect();
        assert_eq!(operations, vec!["record_entry", "confirm_intent"]);
    }

    #[test]
    fn schema_statements_are_idempotent() {
        for statement in SCHEMA {
            let trimmed = statement.trim_start();
            assert!(
                trimmed.starts_with("CREATE TABLE IF NOT EXISTS")
                    || trimmed.starts_with("CREATE INDEX IF NOT EXISTS"),
                "schema statement must be idempotent: {statement}"
            );
        }
    }
}
