use async_trait::async_trait;
use common::error::{AppError, Res};
use serde::Serialize;
use stripe::{
    Client, CreatePaymentIntent, Currency, PaymentIntent, PaymentIntentStatus, PaymentMethodId,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeReason {
    Subscribe,
    Renewal,
    Upgrade,
}

impl ChargeReason {
    fn as_str(&self) -> &'static str {
        match self {
            ChargeReason::Subscribe => "subscription",
            ChargeReason::Renewal => "renewal",
            ChargeReason::Upgrade => "plan upgrade",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method_id: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
    pub reason: ChargeReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeReceipt {
    pub reference: String,
    pub amount: i64,
    pub currency: String,
}

/// Takes money for a plan. A declined charge is `AppError::PaymentRequired`;
/// anything else is a provider or transport failure.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, req: ChargeRequest) -> Res<ChargeReceipt>;
}

/// Confirms a Stripe PaymentIntent against a saved payment method.
pub struct StripePayments {
    client: Client,
}

impl StripePayments {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PaymentGateway for StripePayments {
    async fn charge(&self, req: ChargeRequest) -> Res<ChargeReceipt> {
        let currency = req
            .currency
            .parse::<Currency>()
            .map_err(|_| AppError::Validation(format!("Unsupported currency: {}", req.currency)))?;
        let payment_method = req.payment_method_id.parse::<PaymentMethodId>().map_err(|e| {
            AppError::Validation(format!(
                "Invalid payment method id: {}. {}",
                req.payment_method_id, e
            ))
        })?;

        let description = format!("{} of plan {}", req.reason.as_str(), req.plan_id);
        let mut metadata = stripe::Metadata::new();
        metadata.insert("subscriber_id".to_string(), req.subscriber_id.to_string());
        metadata.insert("plan_id".to_string(), req.plan_id.to_string());

        let mut params = CreatePaymentIntent::new(req.amount, currency);
        params.payment_method = Some(payment_method);
        params.confirm = Some(true);
        params.description = Some(description.as_str());
        params.metadata = Some(metadata);

        let intent = PaymentIntent::create(&self.client, params)
            .await
            .map_err(|e| match e {
                stripe::StripeError::Stripe(err) if err.http_status == 402 => {
                    AppError::PaymentRequired(
                        err.message
                            .unwrap_or_else(|| "Card was declined".to_string()),
                    )
                }
                other => AppError::from(other),
            })?;

        match intent.status {
            PaymentIntentStatus::Succeeded | PaymentIntentStatus::Processing => {
                log::info!(
                    "Charged {} {} to subscriber {} ({})",
                    req.amount,
                    req.currency,
                    req.subscriber_id,
                    intent.id
                );
                Ok(ChargeReceipt {
                    reference: intent.id.to_string(),
                    amount: req.amount,
                    currency: req.currency,
                })
            }
            status => Err(AppError::PaymentRequired(format!(
                "Payment {} ended in status {}",
                intent.id, status
            ))),
        }
    }
}

/// Gateway for development and tests: every charge succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllPayments;

#[async_trait]
impl PaymentGateway for AcceptAllPayments {
    async fn charge(&self, req: ChargeRequest) -> Res<ChargeReceipt> {
        log::debug!(
            "Accepting {} of {} {} for subscriber {}",
            req.reason.as_str(),
            req.amount,
            req.currency,
            req.subscriber_id
        );
        Ok(ChargeReceipt {
            reference: format!("local_{}", Uuid::new_v4().simple()),
            amount: req.amount,
            currency: req.currency,
        })
    }
}
