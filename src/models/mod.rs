//! Data models for the Naratama borrowing core

pub mod book;
pub mod borrowing;
pub mod user;

// Re-export commonly used types
pub use book::Book;
pub use borrowing::{
    Borrowing, BorrowKind, BorrowingStatus, CommitmentFee, CommitmentFeeStatus, Fine, FineStatus,
    MembershipSnapshot,
};
pub use user::User;
