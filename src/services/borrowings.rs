//! Borrowing lifecycle service
//!
//! Orchestrates the loan state machine: creation (with stock reservation),
//! fee settlement, returns, lost-book handling and the periodic overdue
//! sweep. All clock inputs are passed in by the caller so behavior stays
//! reproducible.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        borrowing::BorrowBook, Borrowing, BorrowingStatus, CommitmentFee, CommitmentFeeStatus,
        Fine, FineStatus, MembershipSnapshot,
    },
    repository::Repository,
    services::{
        fees::{BorrowEstimate, FeeSchedule},
        gateway::{ChargePurpose, PaymentGateway},
        notify::NotificationSink,
    },
};

/// Outcome counters for one sweep run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepSummary {
    pub due_soon_notified: usize,
    pub marked_overdue: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct BorrowingsService {
    repository: Repository,
    fees: FeeSchedule,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSink>,
}

impl BorrowingsService {
    pub fn new(
        repository: Repository,
        fees: FeeSchedule,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            fees,
            gateway,
            notifier,
        }
    }

    /// Create a borrowing.
    ///
    /// Take-home borrows reserve a physical copy first and record the
    /// borrowing second; the store offers no multi-document transaction, so
    /// a failure on the second step triggers a compensating release of the
    /// reservation.
    pub async fn borrow_book(&self, cmd: BorrowBook, now: DateTime<Utc>) -> AppResult<Borrowing> {
        let user = self.repository.users.get_by_id(cmd.user_id).await?;
        let membership = MembershipSnapshot::from(&user);

        let active = self
            .repository
            .borrowings
            .find_active_by_user(cmd.user_id)
            .await?;
        let limit = if membership.is_member {
            self.fees.policy().member_loan_limit
        } else {
            self.fees.policy().non_member_loan_limit
        };
        if active.len() >= limit {
            return Err(AppError::BorrowLimitExceeded {
                current: active.len(),
                max: limit,
            });
        }

        if cmd.borrow_kind.reserves_stock() {
            self.repository.books.reserve_one(cmd.book_id).await?;
        } else {
            // no copy leaves the building, but the book must exist
            self.repository.books.get_by_id(cmd.book_id).await?;
        }

        let borrowing = Borrowing {
            id: Uuid::new_v4(),
            book_id: cmd.book_id,
            user_id: cmd.user_id,
            librarian_id: cmd.librarian_id,
            borrow_kind: cmd.borrow_kind,
            borrowed_at: now,
            due_at: self.fees.due_at(cmd.borrow_kind, membership.extended_period, now),
            returned_at: None,
            status: BorrowingStatus::Active,
            commitment_fee: CommitmentFee::pending(self.fees.commitment_fee()),
            fine: Fine::none(self.fees.fine_per_day(membership.reduced_fine)),
            membership,
            due_soon_notified: false,
            release_pending: false,
            notes: cmd.notes.unwrap_or_default(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.repository.borrowings.create(&borrowing).await {
            if borrowing.holds_stock() {
                if let Err(release_err) = self.repository.books.release_one(cmd.book_id).await {
                    tracing::error!(
                        book_id = %cmd.book_id,
                        "failed to roll back stock reservation: {}",
                        release_err
                    );
                }
            }
            return Err(err);
        }

        tracing::info!(
            borrowing_id = %borrowing.id,
            book_id = %borrowing.book_id,
            user_id = %borrowing.user_id,
            kind = %borrowing.borrow_kind,
            due_at = %borrowing.due_at,
            "borrowing created"
        );

        Ok(borrowing)
    }

    /// Cost preview for a prospective borrow, before any state changes.
    pub async fn estimate_borrow_cost(
        &self,
        user_id: Uuid,
        kind: crate::models::BorrowKind,
        now: DateTime<Utc>,
    ) -> AppResult<BorrowEstimate> {
        let user = self.repository.users.get_by_id(user_id).await?;
        Ok(self
            .fees
            .estimate(kind, user.extended_period, user.reduced_fine, now))
    }

    pub async fn get_borrowing(&self, id: Uuid) -> AppResult<Borrowing> {
        self.repository.borrowings.get_by_id(id).await
    }

    /// Full borrowing history for a borrower.
    pub async fn my_borrowings(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>> {
        // Verify user exists
        self.repository.users.get_by_id(user_id).await?;
        self.repository.borrowings.find_by_user(user_id).await
    }

    /// All open (Active/Overdue) borrowings, soonest due first.
    pub async fn active_borrowings(&self) -> AppResult<Vec<Borrowing>> {
        self.repository.borrowings.find_open().await
    }

    /// Settle the commitment fee through the payment gateway.
    ///
    /// Callable only while the borrowing is open; paying twice is an
    /// integrity signal, not a business rejection. Does not change the loan
    /// status itself.
    pub async fn pay_commitment_fee(&self, id: Uuid) -> AppResult<Borrowing> {
        let mut b = self.repository.borrowings.get_by_id(id).await?;

        if !b.status.is_open() {
            return Err(AppError::BusinessRule(
                "Cannot settle fees on a closed borrowing".to_string(),
            ));
        }
        if b.commitment_fee.status != CommitmentFeeStatus::Pending {
            return Err(AppError::Integrity(format!(
                "Commitment fee for borrowing {} already settled",
                id
            )));
        }

        // the (purpose, id) key stays stable across a Conflict retry, so the
        // gateway deduplicates a repeated charge
        let outcome = self
            .gateway
            .charge(b.id, ChargePurpose::Commitment, b.commitment_fee.amount)
            .await?;

        let now = Utc::now();
        b.commitment_fee.status = CommitmentFeeStatus::Paid;
        b.commitment_fee.paid_at = Some(now);
        b.commitment_fee.gateway_reference = Some(outcome.reference);
        b.updated_at = now;
        self.repository.borrowings.update(&b).await
    }

    /// Settle a pending fine through the payment gateway.
    ///
    /// Allowed whenever a fine is pending, including the forfeiture
    /// remainder left on an already-returned borrowing.
    pub async fn pay_fine(&self, id: Uuid) -> AppResult<Borrowing> {
        let mut b = self.repository.borrowings.get_by_id(id).await?;

        match b.fine.status {
            FineStatus::Pending => {}
            FineStatus::Paid => {
                return Err(AppError::Integrity(format!(
                    "Fine for borrowing {} already paid",
                    id
                )));
            }
            FineStatus::None => {
                return Err(AppError::BusinessRule(format!(
                    "No fine due for borrowing {}",
                    id
                )));
            }
        }

        self.gateway
            .charge(b.id, ChargePurpose::Fine, b.fine.amount)
            .await?;

        let now = Utc::now();
        b.fine.status = FineStatus::Paid;
        b.fine.paid_at = Some(now);
        b.updated_at = now;
        self.repository.borrowings.update(&b).await
    }

    /// Process a return.
    ///
    /// Idempotent: returning an already-returned borrowing is a no-op
    /// success, since clients double-submit. The fine is recomputed from the
    /// actual return time (not the last sweep time), stock is released for
    /// take-home borrows, and the commitment fee is settled against the
    /// fine.
    ///
    /// Side effects with external collaborators run only after the single
    /// version-checked write that records them as owed: the refund amount
    /// lands in `refund_due` and the stock release in `release_pending`
    /// before the gateway or the stock counter is touched. A Conflict
    /// retry therefore repeats no side effect, and a transient failure
    /// leaves a persisted marker the sweep worker re-drives.
    pub async fn return_book(&self, id: Uuid, returned_at: DateTime<Utc>) -> AppResult<Borrowing> {
        let mut b = self.repository.borrowings.get_by_id(id).await?;

        match b.status {
            BorrowingStatus::Returned => {
                // no-op success, but a retry may still owe a parked
                // release or refund from the first attempt
                let b = self.drive_stock_release(b).await;
                return Ok(self.drive_refund(b).await);
            }
            BorrowingStatus::Lost => {
                return Err(AppError::BusinessRule(format!(
                    "Borrowing {} was marked lost and cannot be returned",
                    id
                )));
            }
            BorrowingStatus::Active | BorrowingStatus::Overdue => {}
        }

        let fine_amount = self
            .fees
            .fine(b.due_at, returned_at, b.membership.reduced_fine);
        b.fine.amount = fine_amount;
        b.returned_at = Some(returned_at);
        b.status = BorrowingStatus::Returned;
        b.release_pending = b.holds_stock();
        b.updated_at = returned_at;

        if fine_amount == 0 {
            b.fine.status = FineStatus::None;
            if b.commitment_fee.status == CommitmentFeeStatus::Paid {
                // stays Paid until the refund goes through
                b.commitment_fee.refund_due = b.commitment_fee.amount;
            }
        } else if b.commitment_fee.status == CommitmentFeeStatus::Paid {
            // the deposit is applied against the fine first
            let fee = b.commitment_fee.amount;
            b.commitment_fee.status = CommitmentFeeStatus::Forfeited;
            b.commitment_fee.settled_at = Some(returned_at);
            if fee >= fine_amount {
                b.fine.status = FineStatus::Paid;
                b.fine.paid_at = Some(returned_at);
                let excess = fee - fine_amount;
                if excess > 0 {
                    b.commitment_fee.refund_due = excess;
                }
            } else {
                b.fine.amount = fine_amount - fee;
                b.fine.status = FineStatus::Pending;
            }
        } else {
            b.fine.status = FineStatus::Pending;
        }

        let mut updated = self.repository.borrowings.update(&b).await?;
        updated = self.drive_stock_release(updated).await;
        updated = self.drive_refund(updated).await;

        tracing::info!(
            borrowing_id = %updated.id,
            fine = updated.fine.amount,
            commitment = ?updated.commitment_fee.status,
            "return processed"
        );

        Ok(updated)
    }

    /// Mark a borrowing lost. An explicit librarian action, never inferred
    /// from lateness. The copy is gone, so stock is not released; a paid
    /// commitment fee is forfeited.
    pub async fn mark_lost(&self, id: Uuid, librarian_id: Uuid) -> AppResult<Borrowing> {
        let mut b = self.repository.borrowings.get_by_id(id).await?;

        match b.status {
            BorrowingStatus::Lost => return Ok(b),
            BorrowingStatus::Returned => {
                return Err(AppError::BusinessRule(format!(
                    "Borrowing {} was already returned",
                    id
                )));
            }
            BorrowingStatus::Active | BorrowingStatus::Overdue => {}
        }

        let now = Utc::now();
        b.status = BorrowingStatus::Lost;
        b.librarian_id = Some(librarian_id);
        if b.commitment_fee.status == CommitmentFeeStatus::Paid {
            b.commitment_fee.status = CommitmentFeeStatus::Forfeited;
            b.commitment_fee.settled_at = Some(now);
        }
        b.updated_at = now;
        self.repository.borrowings.update(&b).await
    }

    /// One sweep pass: remind borrowers whose loans fall due within a day,
    /// then transition past-due Active loans to Overdue with their fine.
    ///
    /// Idempotent: an already-Overdue loan is neither re-transitioned nor
    /// re-notified, and due-soon reminders are flagged on the record.
    /// Per-loan failures are logged and skipped, never fatal to the batch.
    pub async fn run_overdue_sweep(&self, now: DateTime<Utc>) -> AppResult<SweepSummary> {
        let mut summary = SweepSummary::default();

        match self
            .repository
            .borrowings
            .find_due_between(now, now + Duration::days(1))
            .await
        {
            Ok(due_soon) => {
                for b in due_soon {
                    match self.remind_due_soon(b, now).await {
                        Ok(()) => summary.due_soon_notified += 1,
                        Err(err) => {
                            tracing::warn!("sweep: due-soon reminder skipped: {}", err);
                            summary.skipped += 1;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!("sweep: due-soon query failed: {}", err);
            }
        }

        match self.repository.borrowings.find_overdue_as_of(now).await {
            Ok(overdue) => {
                for b in overdue {
                    let id = b.id;
                    match self.transition_overdue(b, now).await {
                        Ok(updated) => {
                            summary.marked_overdue += 1;
                            self.emit_overdue_notice(&updated).await;
                        }
                        Err(err) => {
                            tracing::warn!(borrowing_id = %id, "sweep: skipping borrowing: {}", err);
                            summary.skipped += 1;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::error!("sweep: overdue query failed: {}", err);
            }
        }

        tracing::info!(
            due_soon = summary.due_soon_notified,
            overdue = summary.marked_overdue,
            skipped = summary.skipped,
            "overdue sweep finished"
        );

        Ok(summary)
    }

    /// Re-drive refunds that failed at return time. Success clears the
    /// pending amount; a commitment still in Paid state becomes Refunded.
    pub async fn retry_pending_refunds(&self) -> AppResult<usize> {
        let pending = self.repository.borrowings.find_refund_pending().await?;
        let mut settled = 0;

        for b in pending {
            let driven = self.drive_refund(b).await;
            if driven.commitment_fee.refund_due == 0 {
                settled += 1;
            }
        }

        Ok(settled)
    }

    /// Re-drive stock releases that failed after a return was recorded.
    pub async fn retry_pending_releases(&self) -> AppResult<usize> {
        let pending = self.repository.borrowings.find_release_pending().await?;
        let mut released = 0;

        for b in pending {
            let driven = self.drive_stock_release(b).await;
            if !driven.release_pending {
                released += 1;
            }
        }

        Ok(released)
    }

    /// Pay out `refund_due` through the gateway and clear it. The owed
    /// amount was persisted before this runs, so a failure here just leaves
    /// the marker for the next retry pass.
    async fn drive_refund(&self, mut b: Borrowing) -> Borrowing {
        if b.commitment_fee.refund_due == 0 {
            return b;
        }

        let amount = b.commitment_fee.refund_due;
        let reference = b
            .commitment_fee
            .gateway_reference
            .clone()
            .unwrap_or_default();

        match self.gateway.refund(b.id, &reference, amount).await {
            Ok(()) => {
                let now = Utc::now();
                b.commitment_fee.refund_due = 0;
                if b.commitment_fee.status == CommitmentFeeStatus::Paid {
                    b.commitment_fee.status = CommitmentFeeStatus::Refunded;
                }
                b.commitment_fee.settled_at = Some(now);
                b.updated_at = now;
                match self.repository.borrowings.update(&b).await {
                    Ok(updated) => updated,
                    Err(err) => {
                        tracing::warn!(borrowing_id = %b.id, "refund sent but not recorded: {}", err);
                        b
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    borrowing_id = %b.id,
                    amount,
                    "refund failed, marker kept for retry: {}",
                    err
                );
                b
            }
        }
    }

    /// Apply a pending stock release and clear the marker. A release call
    /// refused with `Integrity` means the copy is already back on the
    /// counter; the marker is cleared loudly instead of retrying forever.
    async fn drive_stock_release(&self, mut b: Borrowing) -> Borrowing {
        if !b.release_pending {
            return b;
        }

        match self.repository.books.release_one(b.book_id).await {
            Ok(()) => {}
            Err(AppError::Integrity(msg)) => {
                tracing::error!(
                    borrowing_id = %b.id,
                    book_id = %b.book_id,
                    "stock already at total, clearing release marker: {}",
                    msg
                );
            }
            Err(err) => {
                tracing::warn!(
                    borrowing_id = %b.id,
                    book_id = %b.book_id,
                    "stock release failed, marker kept for retry: {}",
                    err
                );
                return b;
            }
        }

        b.release_pending = false;
        b.updated_at = Utc::now();
        match self.repository.borrowings.update(&b).await {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(borrowing_id = %b.id, "release done but marker not cleared: {}", err);
                b
            }
        }
    }

    async fn remind_due_soon(&self, mut b: Borrowing, now: DateTime<Utc>) -> AppResult<()> {
        let user = self.repository.users.get_by_id(b.user_id).await?;
        let book = self.repository.books.get_by_id(b.book_id).await?;
        self.notifier.notify_due_soon(&b, &user, &book).await?;

        b.due_soon_notified = true;
        b.updated_at = now;
        self.repository.borrowings.update(&b).await?;
        Ok(())
    }

    async fn transition_overdue(
        &self,
        mut b: Borrowing,
        now: DateTime<Utc>,
    ) -> AppResult<Borrowing> {
        // the query only returns Active loans, but a concurrent return may
        // have closed this one since; the version check below settles it
        if b.status != BorrowingStatus::Active {
            return Err(AppError::Conflict(format!(
                "Borrowing {} is no longer active",
                b.id
            )));
        }

        let amount = self.fees.fine(b.due_at, now, b.membership.reduced_fine);
        b.fine.amount = amount;
        b.fine.status = if amount > 0 {
            FineStatus::Pending
        } else {
            FineStatus::None
        };
        b.status = BorrowingStatus::Overdue;
        b.updated_at = now;
        self.repository.borrowings.update(&b).await
    }

    async fn emit_overdue_notice(&self, b: &Borrowing) {
        let user = match self.repository.users.get_by_id(b.user_id).await {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(borrowing_id = %b.id, "overdue notice: borrower lookup failed: {}", err);
                return;
            }
        };
        let book = match self.repository.books.get_by_id(b.book_id).await {
            Ok(book) => book,
            Err(err) => {
                tracing::warn!(borrowing_id = %b.id, "overdue notice: book lookup failed: {}", err);
                return;
            }
        };
        if let Err(err) = self.notifier.notify_overdue(b, &user, &book).await {
            tracing::warn!(borrowing_id = %b.id, "failed to deliver overdue notice: {}", err);
        }
    }
}
