//! In-memory fakes shared by the integration tests.
//!
//! The fakes honor the same contracts as the Postgres implementations:
//! conditional stock counters and version-checked borrowing updates. A
//! `Mutex` per table gives the serialized behavior the SQL statements get
//! from the database.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use naratama_server::{
    config::LoanPolicyConfig,
    error::{AppError, AppResult},
    models::{book::CreateBook, Book, Borrowing, User},
    repository::{BooksRepository, BorrowingsRepository, Repository, UsersRepository},
    services::{ChargeOutcome, ChargePurpose, NotificationSink, PaymentGateway, Services},
};

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBooks {
    books: Mutex<HashMap<Uuid, Book>>,
    /// Simulates a transient store failure on `release_one`.
    pub fail_releases: AtomicBool,
}

impl InMemoryBooks {
    pub fn seed(&self, title: &str, total_stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.books.lock().unwrap().insert(
            id,
            Book {
                id,
                title: title.to_string(),
                author: "Tere Liye".to_string(),
                isbn: String::new(),
                total_stock,
                available_stock: total_stock,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub fn available(&self, id: Uuid) -> i32 {
        self.books.lock().unwrap()[&id].available_stock
    }
}

#[async_trait]
impl BooksRepository for InMemoryBooks {
    async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        if book.total_stock < 1 {
            return Err(AppError::Validation(
                "total_stock must be at least 1".to_string(),
            ));
        }
        let id = Uuid::new_v4();
        let now = Utc::now();
        let created = Book {
            id,
            title: book.title.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            total_stock: book.total_stock,
            available_stock: book.total_stock,
            created_at: now,
            updated_at: now,
        };
        self.books.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Book> {
        self.books
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    async fn reserve_one(&self, id: Uuid) -> AppResult<()> {
        let mut books = self.books.lock().unwrap();
        let book = books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;
        if book.available_stock == 0 {
            return Err(AppError::OutOfStock(format!(
                "No copies of book {} available",
                id
            )));
        }
        book.available_stock -= 1;
        Ok(())
    }

    async fn release_one(&self, id: Uuid) -> AppResult<()> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(AppError::Internal("store write failed".to_string()));
        }
        let mut books = self.books.lock().unwrap();
        let book = books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;
        if book.available_stock >= book.total_stock {
            return Err(AppError::Integrity(format!(
                "Release would push book {} above its total stock",
                id
            )));
        }
        book.available_stock += 1;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> AppResult<()> {
        self.books
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryUsers {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUsers {
    pub fn seed(&self, name: &str, is_member: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.users.lock().unwrap().insert(
            id,
            User {
                id,
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                is_member,
                extended_period: is_member,
                reduced_fine: is_member,
                created_at: Utc::now(),
            },
        );
        id
    }
}

#[async_trait]
impl UsersRepository for InMemoryUsers {
    async fn get_by_id(&self, id: Uuid) -> AppResult<User> {
        self.users
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }
}

// ---------------------------------------------------------------------------
// Borrowings
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBorrowings {
    rows: Mutex<HashMap<Uuid, Borrowing>>,
    pub fail_create: AtomicBool,
}

impl InMemoryBorrowings {
    pub fn get(&self, id: Uuid) -> Borrowing {
        self.rows.lock().unwrap()[&id].clone()
    }

    fn filtered(&self, pred: impl Fn(&Borrowing) -> bool) -> Vec<Borrowing> {
        let mut out: Vec<Borrowing> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|b| pred(b))
            .cloned()
            .collect();
        out.sort_by_key(|b| b.due_at);
        out
    }
}

#[async_trait]
impl BorrowingsRepository for InMemoryBorrowings {
    async fn create(&self, borrowing: &Borrowing) -> AppResult<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Internal("store write failed".to_string()));
        }
        self.rows
            .lock()
            .unwrap()
            .insert(borrowing.id, borrowing.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Borrowing> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Borrowing with id {} not found", id)))
    }

    async fn find_active_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| b.user_id == user_id && b.status.is_open()))
    }

    async fn find_by_user(&self, user_id: Uuid) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| b.user_id == user_id))
    }

    async fn find_open(&self) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| b.status.is_open()))
    }

    async fn find_due_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| {
            b.status == naratama_server::models::BorrowingStatus::Active
                && b.due_at > start
                && b.due_at <= end
                && !b.due_soon_notified
        }))
    }

    async fn find_overdue_as_of(&self, now: DateTime<Utc>) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| {
            b.status == naratama_server::models::BorrowingStatus::Active && b.due_at < now
        }))
    }

    async fn find_refund_pending(&self) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| b.commitment_fee.refund_due > 0))
    }

    async fn find_release_pending(&self) -> AppResult<Vec<Borrowing>> {
        Ok(self.filtered(|b| b.release_pending))
    }

    async fn update(&self, borrowing: &Borrowing) -> AppResult<Borrowing> {
        let mut rows = self.rows.lock().unwrap();
        let stored = rows.get(&borrowing.id).ok_or_else(|| {
            AppError::NotFound(format!("Borrowing with id {} not found", borrowing.id))
        })?;
        if stored.version != borrowing.version {
            return Err(AppError::Conflict(format!(
                "Borrowing {} was modified concurrently (stale version {})",
                borrowing.id, borrowing.version
            )));
        }
        let mut updated = borrowing.clone();
        updated.version += 1;
        rows.insert(updated.id, updated.clone());
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Gateway and notifier
// ---------------------------------------------------------------------------

/// Gateway double that deduplicates charges by their idempotency key, the
/// way a real gateway treats a replay.
#[derive(Default)]
pub struct FakeGateway {
    pub charges: Mutex<Vec<(String, i64)>>,
    pub refunds: Mutex<Vec<(Uuid, i64)>>,
    pub fail_refunds: AtomicBool,
}

impl FakeGateway {
    pub fn refunded_total(&self, borrowing_id: Uuid) -> i64 {
        self.refunds
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == borrowing_id)
            .map(|(_, amount)| amount)
            .sum()
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(
        &self,
        borrowing_id: Uuid,
        purpose: ChargePurpose,
        amount: i64,
    ) -> AppResult<ChargeOutcome> {
        let key = format!("{}-{}", purpose, borrowing_id);
        let mut charges = self.charges.lock().unwrap();
        if !charges.iter().any(|(k, _)| *k == key) {
            charges.push((key.clone(), amount));
        }
        Ok(ChargeOutcome { reference: key })
    }

    async fn refund(&self, borrowing_id: Uuid, _reference: &str, amount: i64) -> AppResult<()> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(AppError::Gateway("refund endpoint unavailable".to_string()));
        }
        self.refunds.lock().unwrap().push((borrowing_id, amount));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub due_soon: Mutex<Vec<Uuid>>,
    pub overdue: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_due_soon(&self, borrowing: &Borrowing, _: &User, _: &Book) -> AppResult<()> {
        self.due_soon.lock().unwrap().push(borrowing.id);
        Ok(())
    }

    async fn notify_overdue(&self, borrowing: &Borrowing, _: &User, _: &Book) -> AppResult<()> {
        self.overdue.lock().unwrap().push(borrowing.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestWorld {
    pub books: Arc<InMemoryBooks>,
    pub users: Arc<InMemoryUsers>,
    pub borrowings: Arc<InMemoryBorrowings>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl TestWorld {
    pub fn new() -> Self {
        let books = Arc::new(InMemoryBooks::default());
        let users = Arc::new(InMemoryUsers::default());
        let borrowings = Arc::new(InMemoryBorrowings::default());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let services = Services::new(
            Repository::new(books.clone(), users.clone(), borrowings.clone()),
            LoanPolicyConfig::default(),
            gateway.clone(),
            notifier.clone(),
        );

        Self {
            books,
            users,
            borrowings,
            gateway,
            notifier,
            services,
        }
    }
}
