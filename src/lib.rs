//! Naratama Borrowing Core
//!
//! Borrowing lifecycle engine for the Naratama library: stock-safe borrow
//! creation, commitment fee and fine settlement, returns, lost-book handling
//! and the periodic overdue sweep.

pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
