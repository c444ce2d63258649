//! Payment gateway adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    error::{AppError, AppResult},
};

/// Successful charge, with the gateway's reference for later refunds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub reference: String,
}

/// What a charge settles. Together with the borrowing id it forms the
/// idempotency key for the gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargePurpose {
    Commitment,
    Fine,
}

impl std::fmt::Display for ChargePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ChargePurpose::Commitment => "commitment",
            ChargePurpose::Fine => "fine",
        };
        write!(f, "{}", label)
    }
}

/// Charging and refunding, keyed by borrowing id.
///
/// The core only needs succeeded/failed signals; webhook payload shapes and
/// order-id conventions stay behind the implementation. Failures map to
/// `AppError::Gateway` and are retriable.
///
/// A replay of the same `(purpose, borrowing_id)` charge key must return
/// the original outcome instead of charging again, so a version-conflict
/// retry of the calling operation cannot double-charge.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        borrowing_id: Uuid,
        purpose: ChargePurpose,
        amount: i64,
    ) -> AppResult<ChargeOutcome>;

    async fn refund(&self, borrowing_id: Uuid, reference: &str, amount: i64) -> AppResult<()>;
}

/// HTTP gateway client posting JSON charge/refund requests.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build gateway client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(
        &self,
        borrowing_id: Uuid,
        purpose: ChargePurpose,
        amount: i64,
    ) -> AppResult<ChargeOutcome> {
        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .json(&json!({
                "borrowing_id": borrowing_id,
                "amount": amount,
                "idempotency_key": format!("{}-{}", purpose, borrowing_id),
            }))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("charge request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "charge rejected with status {}",
                response.status()
            )));
        }

        response
            .json::<ChargeOutcome>()
            .await
            .map_err(|e| AppError::Gateway(format!("invalid charge response: {}", e)))
    }

    async fn refund(&self, borrowing_id: Uuid, reference: &str, amount: i64) -> AppResult<()> {
        let response = self
            .client
            .post(format!("{}/refunds", self.base_url))
            .json(&json!({
                "borrowing_id": borrowing_id,
                "reference": reference,
                "amount": amount,
            }))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("refund request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "refund rejected with status {}",
                response.status()
            )));
        }

        Ok(())
    }
}
