//! Borrowings repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Borrowing, BorrowKind, BorrowingStatus, CommitmentFee, CommitmentFeeStatus, Fine,
        FineStatus, MembershipSnapshot,
    },
};

/// Store seam for borrowing records.
///
/// Updates are conditional on the record's `version` (optimistic
/// concurrency): a concurrent sweep transition and a concurrent return on
/// the same borrowing cannot both apply. The loser gets `Conflict` and
/// retries the whole operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BorrowingsRepository: Send + Sync {
    async fn create(&self, borrowing: &Borrowing) -> AppResult<()>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Borrowing>;

    /// Open (Active or Overdue) borrowings for a borrower.
    async fn find_active_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>>;

    /// Full borrowing history for a borrower, newest first.
    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>>;

    /// All open borrowings, soonest due first.
    async fn find_open(&self) -> AppResult<Vec<Borrowing>>;

    /// Active borrowings due in `(start, end]` whose due-soon reminder has
    /// not been emitted yet.
    async fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>>;

    /// Active borrowings whose due date has passed as of `now`.
    async fn find_overdue_as_of(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>>;

    /// Borrowings with a refund still owed back after a failed gateway call.
    async fn find_refund_pending(&self) -> AppResult<Vec<Borrowing>>;

    /// Returned borrowings whose stock release has not been applied yet.
    async fn find_release_pending(&self) -> AppResult<Vec<Borrowing>>;

    /// Persist the record if `borrowing.version` still matches the stored
    /// row, bumping the version. Returns the record with the new version.
    async fn update(&self, borrowing: &Borrowing) -> AppResult<Borrowing>;
}

/// Flat row shape of the `borrowings` table
#[derive(Debug, FromRow)]
struct BorrowingRow {
    id: Uuid,
    book_id: Uuid,
    user_id: Uuid,
    librarian_id: Option<Uuid>,
    borrow_kind: i16,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    status: i16,
    commitment_amount: i64,
    commitment_status: i16,
    commitment_paid_at: Option<DateTime<Utc>>,
    commitment_settled_at: Option<DateTime<Utc>>,
    commitment_reference: Option<String>,
    refund_due: i64,
    fine_amount: i64,
    fine_per_day: i64,
    fine_status: i16,
    fine_paid_at: Option<DateTime<Utc>>,
    is_member: bool,
    extended_period: bool,
    reduced_fine: bool,
    due_soon_notified: bool,
    release_pending: bool,
    notes: String,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BorrowingRow> for Borrowing {
    type Error = AppError;

    fn try_from(row: BorrowingRow) -> Result<Self, Self::Error> {
        Ok(Borrowing {
            id: row.id,
            book_id: row.book_id,
            user_id: row.user_id,
            librarian_id: row.librarian_id,
            borrow_kind: BorrowKind::try_from(row.borrow_kind)?,
            borrowed_at: row.borrowed_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
            status: BorrowingStatus::try_from(row.status)?,
            commitment_fee: CommitmentFee {
                amount: row.commitment_amount,
                status: CommitmentFeeStatus::try_from(row.commitment_status)?,
                paid_at: row.commitment_paid_at,
                settled_at: row.commitment_settled_at,
                gateway_reference: row.commitment_reference,
                refund_due: row.refund_due,
            },
            fine: Fine {
                amount: row.fine_amount,
                per_day: row.fine_per_day,
                status: FineStatus::try_from(row.fine_status)?,
                paid_at: row.fine_paid_at,
            },
            membership: MembershipSnapshot {
                is_member: row.is_member,
                extended_period: row.extended_period,
                reduced_fine: row.reduced_fine,
            },
            due_soon_notified: row.due_soon_notified,
            release_pending: row.release_pending,
            notes: row.notes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgBorrowingsRepository {
    pool: Pool<Postgres>,
}

impl PgBorrowingsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, query: &str, binds: Vec<BindValue>) -> AppResult<Vec<Borrowing>> {
        let mut q = sqlx::query_as::<_, BorrowingRow>(query);
        for bind in binds {
            q = match bind {
                BindValue::Uuid(v) => q.bind(v),
                BindValue::Timestamp(v) => q.bind(v),
            };
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Borrowing::try_from).collect()
    }
}

enum BindValue {
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

#[async_trait]
impl BorrowingsRepository for PgBorrowingsRepository {
    async fn create(&self, b: &Borrowing) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO borrowings (
                id, book_id, user_id, librarian_id, borrow_kind,
                borrowed_at, due_at, returned_at, status,
                commitment_amount, commitment_status, commitment_paid_at,
                commitment_settled_at, commitment_reference, refund_due,
                fine_amount, fine_per_day, fine_status, fine_paid_at,
                is_member, extended_period, reduced_fine,
                due_soon_notified, release_pending, notes, version, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
            )
            "#,
        )
        .bind(b.id)
        .bind(b.book_id)
        .bind(b.user_id)
        .bind(b.librarian_id)
        .bind(i16::from(b.borrow_kind))
        .bind(b.borrowed_at)
        .bind(b.due_at)
        .bind(b.returned_at)
        .bind(i16::from(b.status))
        .bind(b.commitment_fee.amount)
        .bind(i16::from(b.commitment_fee.status))
        .bind(b.commitment_fee.paid_at)
        .bind(b.commitment_fee.settled_at)
        .bind(&b.commitment_fee.gateway_reference)
        .bind(b.commitment_fee.refund_due)
        .bind(b.fine.amount)
        .bind(b.fine.per_day)
        .bind(i16::from(b.fine.status))
        .bind(b.fine.paid_at)
        .bind(b.membership.is_member)
        .bind(b.membership.extended_period)
        .bind(b.membership.reduced_fine)
        .bind(b.due_soon_notified)
        .bind(b.release_pending)
        .bind(&b.notes)
        .bind(b.version)
        .bind(b.created_at)
        .bind(b.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Borrowing> {
        let row = sqlx::query_as::<_, BorrowingRow>("SELECT * FROM borrowings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Borrowing with id {} not found", id)))?;

        Borrowing::try_from(row)
    }

    async fn find_active_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE user_id = $1 AND status IN (0, 1) ORDER BY due_at",
            vec![BindValue::Uuid(user_id)],
        )
        .await
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE user_id = $1 ORDER BY borrowed_at DESC",
            vec![BindValue::Uuid(user_id)],
        )
        .await
    }

    async fn find_open(&self) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE status IN (0, 1) ORDER BY due_at",
            vec![],
        )
        .await
    }

    async fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings \
             WHERE status = 0 AND due_at > $1 AND due_at <= $2 AND NOT due_soon_notified \
             ORDER BY due_at",
            vec![BindValue::Timestamp(start), BindValue::Timestamp(end)],
        )
        .await
    }

    async fn find_overdue_as_of(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE status = 0 AND due_at < $1 ORDER BY due_at",
            vec![BindValue::Timestamp(now)],
        )
        .await
    }

    async fn find_refund_pending(&self) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE refund_due > 0 ORDER BY updated_at",
            vec![],
        )
        .await
    }

    async fn find_release_pending(&self) -> AppResult<Vec<Borrowing>> {
        self.fetch_many(
            "SELECT * FROM borrowings WHERE release_pending ORDER BY updated_at",
            vec![],
        )
        .await
    }

    async fn update(&self, b: &Borrowing) -> AppResult<Borrowing> {
        let result = sqlx::query(
            r#"
            UPDATE borrowings SET
                librarian_id = $3,
                returned_at = $4,
                status = $5,
                commitment_status = $6,
                commitment_paid_at = $7,
                commitment_settled_at = $8,
                commitment_reference = $9,
                refund_due = $10,
                fine_amount = $11,
                fine_status = $12,
                fine_paid_at = $13,
                due_soon_notified = $14,
                release_pending = $15,
                notes = $16,
                version = version + 1,
                updated_at = $17
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(b.id)
        .bind(b.version)
        .bind(b.librarian_id)
        .bind(b.returned_at)
        .bind(i16::from(b.status))
        .bind(i16::from(b.commitment_fee.status))
        .bind(b.commitment_fee.paid_at)
        .bind(b.commitment_fee.settled_at)
        .bind(&b.commitment_fee.gateway_reference)
        .bind(b.commitment_fee.refund_due)
        .bind(b.fine.amount)
        .bind(i16::from(b.fine.status))
        .bind(b.fine.paid_at)
        .bind(b.due_soon_notified)
        .bind(b.release_pending)
        .bind(&b.notes)
        .bind(b.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM borrowings WHERE id = $1)")
                    .bind(b.id)
                    .fetch_one(&self.pool)
                    .await?;
            return if exists {
                Err(AppError::Conflict(format!(
                    "Borrowing {} was modified concurrently (stale version {})",
                    b.id, b.version
                )))
            } else {
                Err(AppError::NotFound(format!(
                    "Borrowing with id {} not found",
                    b.id
                )))
            };
        }

        let mut updated = b.clone();
        updated.version += 1;
        Ok(updated)
    }
}
