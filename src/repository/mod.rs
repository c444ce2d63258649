//! Repository layer for database operations
//!
//! Each store concern is a trait so the service layer stays agnostic of the
//! persistence technology; the shipped implementations run on Postgres.

pub mod books;
pub mod borrowings;
pub mod users;

use std::sync::Arc;

use sqlx::{Pool, Postgres};

pub use books::BooksRepository;
pub use borrowings::BorrowingsRepository;
pub use users::UsersRepository;

/// Main repository struct bundling the store seams
#[derive(Clone)]
pub struct Repository {
    pub books: Arc<dyn BooksRepository>,
    pub users: Arc<dyn UsersRepository>,
    pub borrowings: Arc<dyn BorrowingsRepository>,
}

impl Repository {
    /// Create a repository backed by the given Postgres pool
    pub fn postgres(pool: Pool<Postgres>) -> Self {
        Self {
            books: Arc::new(books::PgBooksRepository::new(pool.clone())),
            users: Arc::new(users::PgUsersRepository::new(pool.clone())),
            borrowings: Arc::new(borrowings::PgBorrowingsRepository::new(pool)),
        }
    }

    /// Assemble a repository from arbitrary implementations (tests, fakes)
    pub fn new(
        books: Arc<dyn BooksRepository>,
        users: Arc<dyn UsersRepository>,
        borrowings: Arc<dyn BorrowingsRepository>,
    ) -> Self {
        Self {
            books,
            users,
            borrowings,
        }
    }
}
