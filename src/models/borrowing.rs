//! Borrowing (loan) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// BorrowKind
// ---------------------------------------------------------------------------

/// The two borrow kinds. Only `TakeHome` reserves physical stock and gets a
/// multi-day due window; `ReadInPlace` holds the book for an hour without
/// touching the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum BorrowKind {
    #[serde(rename = "Baca di Tempat")]
    ReadInPlace = 0,
    #[serde(rename = "Bawa Pulang")]
    TakeHome = 1,
}

impl BorrowKind {
    /// Whether this kind takes a copy out of circulation.
    pub fn reserves_stock(&self) -> bool {
        matches!(self, BorrowKind::TakeHome)
    }
}

impl TryFrom<i16> for BorrowKind {
    type Error = AppError;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(BorrowKind::ReadInPlace),
            1 => Ok(BorrowKind::TakeHome),
            other => Err(AppError::Integrity(format!(
                "unknown borrow kind code {other}"
            ))),
        }
    }
}

impl From<BorrowKind> for i16 {
    fn from(k: BorrowKind) -> Self {
        k as i16
    }
}

impl std::fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BorrowKind::ReadInPlace => "Baca di Tempat",
            BorrowKind::TakeHome => "Bawa Pulang",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// BorrowingStatus
// ---------------------------------------------------------------------------

/// Borrowing state machine:
/// `Active -> {Overdue, Returned, Lost}`, `Overdue -> {Returned, Lost}`.
/// `Returned` and `Lost` are terminal. Exactly one of Active/Overdue carries
/// "book is out" semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum BorrowingStatus {
    Active = 0,
    Overdue = 1,
    Returned = 2,
    Lost = 3,
}

impl BorrowingStatus {
    /// Whether the physical copy is still out with the borrower.
    pub fn is_open(&self) -> bool {
        matches!(self, BorrowingStatus::Active | BorrowingStatus::Overdue)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl TryFrom<i16> for BorrowingStatus {
    type Error = AppError;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(BorrowingStatus::Active),
            1 => Ok(BorrowingStatus::Overdue),
            2 => Ok(BorrowingStatus::Returned),
            3 => Ok(BorrowingStatus::Lost),
            other => Err(AppError::Integrity(format!(
                "unknown borrowing status code {other}"
            ))),
        }
    }
}

impl From<BorrowingStatus> for i16 {
    fn from(s: BorrowingStatus) -> Self {
        s as i16
    }
}

// ---------------------------------------------------------------------------
// Commitment fee
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum CommitmentFeeStatus {
    Pending = 0,
    Paid = 1,
    Refunded = 2,
    Forfeited = 3,
}

impl TryFrom<i16> for CommitmentFeeStatus {
    type Error = AppError;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(CommitmentFeeStatus::Pending),
            1 => Ok(CommitmentFeeStatus::Paid),
            2 => Ok(CommitmentFeeStatus::Refunded),
            3 => Ok(CommitmentFeeStatus::Forfeited),
            other => Err(AppError::Integrity(format!(
                "unknown commitment fee status code {other}"
            ))),
        }
    }
}

impl From<CommitmentFeeStatus> for i16 {
    fn from(s: CommitmentFeeStatus) -> Self {
        s as i16
    }
}

/// Refundable deposit charged at borrow time. On late return it is applied
/// against the fine first; whatever exceeds the fine goes back to the
/// borrower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentFee {
    /// Amount in rupiah minor units (Rp 25.000 default).
    pub amount: i64,
    pub status: CommitmentFeeStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Gateway charge reference, required for refunds.
    pub gateway_reference: Option<String>,
    /// Amount still owed back to the borrower after a failed refund call.
    /// Zero means nothing pending. Re-driven by `retry_pending_refunds`,
    /// never silently dropped.
    pub refund_due: i64,
}

impl CommitmentFee {
    pub fn pending(amount: i64) -> Self {
        Self {
            amount,
            status: CommitmentFeeStatus::Pending,
            paid_at: None,
            settled_at: None,
            gateway_reference: None,
            refund_due: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Fine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum FineStatus {
    None = 0,
    Pending = 1,
    Paid = 2,
}

impl TryFrom<i16> for FineStatus {
    type Error = AppError;

    fn try_from(v: i16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(FineStatus::None),
            1 => Ok(FineStatus::Pending),
            2 => Ok(FineStatus::Paid),
            other => Err(AppError::Integrity(format!(
                "unknown fine status code {other}"
            ))),
        }
    }
}

impl From<FineStatus> for i16 {
    fn from(s: FineStatus) -> Self {
        s as i16
    }
}

/// Late-return penalty, accrued per overdue day and capped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fine {
    pub amount: i64,
    /// Effective daily rate for this borrowing (discount already applied).
    pub per_day: i64,
    pub status: FineStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Fine {
    pub fn none(per_day: i64) -> Self {
        Self {
            amount: 0,
            per_day,
            status: FineStatus::None,
            paid_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Membership snapshot
// ---------------------------------------------------------------------------

/// Borrower benefits captured once at borrow time.
///
/// Never recomputed from live membership status: an open borrowing keeps the
/// rules it was created under, so fine math stays reproducible even when the
/// borrower's membership changes mid-loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub is_member: bool,
    pub extended_period: bool,
    pub reduced_fine: bool,
}

impl From<&crate::models::User> for MembershipSnapshot {
    fn from(user: &crate::models::User) -> Self {
        Self {
            is_member: user.is_member,
            extended_period: user.extended_period,
            reduced_fine: user.reduced_fine,
        }
    }
}

// ---------------------------------------------------------------------------
// Borrowing
// ---------------------------------------------------------------------------

/// One borrow transaction, kept forever for audit/history.
///
/// `due_at` is computed once at creation from the borrow kind and the
/// membership snapshot, and is immutable afterward. `version` is the
/// optimistic-concurrency token checked on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Borrowing {
    pub id: Uuid,
    pub book_id: Uuid,
    pub user_id: Uuid,
    /// Staff member who processed the transaction, if any.
    pub librarian_id: Option<Uuid>,
    pub borrow_kind: BorrowKind,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: BorrowingStatus,
    pub commitment_fee: CommitmentFee,
    pub fine: Fine,
    pub membership: MembershipSnapshot,
    /// Set when the due-soon reminder has been emitted, so re-running the
    /// sweep does not re-send it.
    pub due_soon_notified: bool,
    /// Set when a returned take-home copy still owes a stock release (the
    /// release call failed after the record flipped to Returned). Re-driven
    /// by the sweep worker, never silently dropped.
    pub release_pending: bool,
    pub notes: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Borrowing {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Whether the borrowing reserved a physical copy that must be released
    /// on return.
    pub fn holds_stock(&self) -> bool {
        self.borrow_kind == BorrowKind::TakeHome
    }
}

/// Borrow request as the service receives it.
#[derive(Debug, Clone, Deserialize)]
pub struct BorrowBook {
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub borrow_kind: BorrowKind,
    pub librarian_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}
