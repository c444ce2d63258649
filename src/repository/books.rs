//! Books repository with the stock-consistency contract

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{book::CreateBook, Book},
};

/// Store seam for catalog items and their stock counters.
///
/// The per-book counter is the only contended shared resource in the core:
/// `reserve_one` and `release_one` must each be a single conditional atomic
/// update so calls for the same book serialize with no lost updates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BooksRepository: Send + Sync {
    async fn create(&self, book: &CreateBook) -> AppResult<Book>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Book>;

    /// Atomically decrement `available_stock` if any copy is left.
    /// Two simultaneous calls for the last copy must not both succeed;
    /// the loser gets `OutOfStock`.
    async fn reserve_one(&self, id: Uuid) -> AppResult<()>;

    /// Guarded increment of `available_stock`. Refusing to exceed
    /// `total_stock` is an `Integrity` signal (double-release bug upstream),
    /// never a silent clamp.
    async fn release_one(&self, id: Uuid) -> AppResult<()>;

    /// Delete a catalog item. Blocked while active borrowings reference it.
    async fn delete(&self, id: Uuid) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgBooksRepository {
    pool: Pool<Postgres>,
}

impl PgBooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl BooksRepository for PgBooksRepository {
    async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        if book.total_stock < 1 {
            return Err(AppError::Validation(
                "total_stock must be at least 1".to_string(),
            ));
        }

        let created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (id, title, author, isbn, total_stock, available_stock)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(book.total_stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    async fn reserve_one(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET available_stock = available_stock - 1, updated_at = NOW()
            WHERE id = $1 AND available_stock > 0
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        if self.exists(id).await? {
            Err(AppError::OutOfStock(format!(
                "No copies of book {} available",
                id
            )))
        } else {
            Err(AppError::NotFound(format!("Book with id {} not found", id)))
        }
    }

    async fn release_one(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE books
            SET available_stock = available_stock + 1, updated_at = NOW()
            WHERE id = $1 AND available_stock < total_stock
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        if self.exists(id).await? {
            Err(AppError::Integrity(format!(
                "Release would push book {} above its total stock",
                id
            )))
        } else {
            Err(AppError::NotFound(format!("Book with id {} not found", id)))
        }
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM borrowings WHERE book_id = $1 AND status IN (0, 1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        if active > 0 {
            return Err(AppError::BusinessRule(format!(
                "Book {} still has {} active borrowing(s)",
                id, active
            )));
        }

        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", id)));
        }

        Ok(())
    }
}
