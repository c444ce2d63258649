//! Business logic services

pub mod borrowings;
pub mod catalog;
pub mod fees;
pub mod gateway;
pub mod notify;

use std::sync::Arc;

use crate::{config::LoanPolicyConfig, repository::Repository};

pub use borrowings::{BorrowingsService, SweepSummary};
pub use catalog::CatalogService;
pub use fees::{BorrowEstimate, FeeSchedule};
pub use gateway::{ChargeOutcome, ChargePurpose, HttpPaymentGateway, PaymentGateway};
pub use notify::{EmailNotifier, NoopNotifier, NotificationSink};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: CatalogService,
    pub borrowings: BorrowingsService,
}

impl Services {
    /// Create all services with the given repository and collaborators
    pub fn new(
        repository: Repository,
        policy: LoanPolicyConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            catalog: CatalogService::new(repository.clone()),
            borrowings: BorrowingsService::new(
                repository,
                FeeSchedule::new(policy),
                gateway,
                notifier,
            ),
        }
    }
}
