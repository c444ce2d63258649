//! Fee schedule: due dates, commitment fees and fine calculation
//!
//! Pure functions over the configured loan policy. No state, no I/O.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{config::LoanPolicyConfig, models::BorrowKind};

const DAY_MS: i64 = 86_400_000;

/// Cost preview returned before a borrow is committed.
#[derive(Debug, Clone, Serialize)]
pub struct BorrowEstimate {
    pub due_at: DateTime<Utc>,
    pub commitment_fee: i64,
    pub fine_per_day: i64,
    pub max_fine: i64,
    /// Returned in full when the book comes back on time.
    pub refund_if_on_time: i64,
}

#[derive(Debug, Clone)]
pub struct FeeSchedule {
    policy: LoanPolicyConfig,
}

impl FeeSchedule {
    pub fn new(policy: LoanPolicyConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LoanPolicyConfig {
        &self.policy
    }

    /// Due date for a borrowing starting at `borrowed_at`.
    ///
    /// Read-in-place holds the book for one hour. Take-home runs 14 days
    /// (21 with the extended-period benefit), normalized to the end of the
    /// resulting day so a morning borrow and an evening borrow share the
    /// same deadline.
    pub fn due_at(
        &self,
        kind: BorrowKind,
        extended_period: bool,
        borrowed_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match kind {
            BorrowKind::ReadInPlace => {
                borrowed_at + Duration::hours(self.policy.read_in_place_hours)
            }
            BorrowKind::TakeHome => {
                let days = if extended_period {
                    self.policy.member_take_home_days
                } else {
                    self.policy.take_home_days
                };
                end_of_day(borrowed_at + Duration::days(days))
            }
        }
    }

    /// Commitment fee charged at borrow time, member-independent.
    pub fn commitment_fee(&self) -> i64 {
        self.policy.commitment_fee
    }

    /// Effective daily fine rate, with the member discount applied.
    pub fn fine_per_day(&self, reduced_fine: bool) -> i64 {
        if reduced_fine {
            let rate = self.policy.fine_per_day as f64 * (1.0 - self.policy.member_fine_discount);
            rate.round() as i64
        } else {
            self.policy.fine_per_day
        }
    }

    /// Fine owed when a borrowing due at `due_at` settles at `settled_at`.
    ///
    /// Any fraction of a day late counts as a full day (ceiling, never
    /// floor). Capped at the configured maximum.
    pub fn fine(
        &self,
        due_at: DateTime<Utc>,
        settled_at: DateTime<Utc>,
        reduced_fine: bool,
    ) -> i64 {
        let late_ms = (settled_at - due_at).num_milliseconds();
        if late_ms <= 0 {
            return 0;
        }
        let overdue_days = (late_ms + DAY_MS - 1) / DAY_MS;
        let fine = overdue_days * self.fine_per_day(reduced_fine);
        fine.min(self.policy.max_fine)
    }

    /// Fee structure preview shown before borrowing.
    pub fn estimate(
        &self,
        kind: BorrowKind,
        extended_period: bool,
        reduced_fine: bool,
        borrowed_at: DateTime<Utc>,
    ) -> BorrowEstimate {
        BorrowEstimate {
            due_at: self.due_at(kind, extended_period, borrowed_at),
            commitment_fee: self.commitment_fee(),
            fine_per_day: self.fine_per_day(reduced_fine),
            max_fine: self.policy.max_fine,
            refund_if_on_time: self.commitment_fee(),
        }
    }
}

/// Clamp a timestamp to 23:59:59.999 of its UTC day.
fn end_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| ts.naive_utc())
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn schedule() -> FeeSchedule {
        FeeSchedule::new(LoanPolicyConfig::default())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn eod(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 999)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn read_in_place_due_one_hour_later() {
        let due = schedule().due_at(BorrowKind::ReadInPlace, false, at(2024, 1, 1, 10, 0));
        assert_eq!(due, at(2024, 1, 1, 11, 0));
        // membership does not change the reading window
        let member_due = schedule().due_at(BorrowKind::ReadInPlace, true, at(2024, 1, 1, 10, 0));
        assert_eq!(member_due, due);
    }

    #[test]
    fn take_home_due_is_end_of_day_fourteen_days_out() {
        let due = schedule().due_at(BorrowKind::TakeHome, false, at(2024, 1, 1, 10, 0));
        assert_eq!(due, eod(2024, 1, 15));
    }

    #[test]
    fn extended_period_adds_a_week() {
        let due = schedule().due_at(BorrowKind::TakeHome, true, at(2024, 1, 1, 10, 0));
        assert_eq!(due, eod(2024, 1, 22));
    }

    #[test]
    fn due_date_is_deterministic_for_same_inputs() {
        let s = schedule();
        let borrowed = at(2024, 3, 7, 16, 45);
        assert_eq!(
            s.due_at(BorrowKind::TakeHome, false, borrowed),
            s.due_at(BorrowKind::TakeHome, false, borrowed)
        );
    }

    #[test]
    fn no_fine_on_time() {
        let due = eod(2024, 1, 15);
        assert_eq!(schedule().fine(due, due, false), 0);
        assert_eq!(schedule().fine(due, due - Duration::hours(3), false), 0);
    }

    #[test]
    fn fractional_day_counts_as_full_day() {
        let due = eod(2024, 1, 15);
        // one hour late is one full day
        assert_eq!(schedule().fine(due, due + Duration::hours(1), false), 5_000);
        // 25 hours late rounds up to two days
        assert_eq!(
            schedule().fine(due, due + Duration::hours(25), false),
            10_000
        );
    }

    #[test]
    fn fine_is_capped() {
        let due = eod(2024, 1, 15);
        let fine = schedule().fine(due, due + Duration::days(100), false);
        assert_eq!(fine, 100_000);
    }

    #[test]
    fn member_fine_is_half_of_non_member() {
        let s = schedule();
        let due = eod(2024, 1, 15);
        let settled = due + Duration::days(3);
        assert_eq!(s.fine(due, settled, true) * 2, s.fine(due, settled, false));
    }

    #[test]
    fn commitment_fee_is_member_independent() {
        assert_eq!(schedule().commitment_fee(), 25_000);
    }

    #[test]
    fn estimate_previews_fee_structure() {
        let est = schedule().estimate(BorrowKind::TakeHome, true, true, at(2024, 1, 1, 10, 0));
        assert_eq!(est.due_at, eod(2024, 1, 22));
        assert_eq!(est.commitment_fee, 25_000);
        assert_eq!(est.fine_per_day, 2_500);
        assert_eq!(est.refund_if_on_time, 25_000);
    }
}
