//! Borrower projection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Borrower as the loan core sees it.
///
/// Authentication and account management live elsewhere; this projection
/// carries only what borrowing decisions need. The benefit flags are read
/// once at borrow time into a [`MembershipSnapshot`](super::MembershipSnapshot)
/// and never consulted again for an open borrowing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_member: bool,
    /// Member benefit: 21-day take-home window instead of 14.
    pub extended_period: bool,
    /// Member benefit: daily fine at half rate.
    pub reduced_fine: bool,
    pub created_at: DateTime<Utc>,
}
