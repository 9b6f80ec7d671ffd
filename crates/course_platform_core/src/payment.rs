//! crates/course_platform_core/src/payment.rs
//!
//! The payment gateway port and the integer minor-unit arithmetic used to talk to it.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::CourseId;

/// Minor units per major unit for every currency the platform charges in.
const MINOR_UNIT_EXPONENT: u32 = 2;

//=========================================================================================
// Gateway Error
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Charge amount must be positive, got {0}")]
    InvalidAmount(i64),
    /// Transport, authentication or timeout failure talking to the provider.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment session not found: {0}")]
    NotFound(String),
    #[error("Payment session is not completed (status: {status})")]
    NotCompleted { status: String },
}

//=========================================================================================
// Gateway Data Types
//=========================================================================================

/// Opaque identifiers echoed back by the provider so a verified session can be
/// matched to the learner and course that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub learner_id: Uuid,
    pub course_id: CourseId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub product_name: String,
    pub product_description: String,
    pub correlation: Correlation,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

/// A provider-hosted checkout session the learner is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Completed,
    Pending,
    Expired,
}

/// The provider's authoritative view of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    pub session_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: SessionStatus,
    pub transaction_id: String,
    /// `None` when the provider returned no correlation metadata.
    pub correlation: Option<Correlation>,
}

//=========================================================================================
// Gateway Port
//=========================================================================================

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session on the provider.
    async fn create_session(&self, request: CheckoutRequest) -> Result<SessionHandle, GatewayError>;

    /// Fetches a session from the provider and succeeds only if it is paid.
    /// Each call may contact the provider.
    async fn verify_session(&self, session_id: &str) -> Result<VerifiedPayment, GatewayError>;
}

//=========================================================================================
// Minor Units
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount {0} is not positive")]
    NotPositive(Decimal),
    #[error("amount {0} has more precision than the currency's minor unit")]
    Inexact(Decimal),
    #[error("amount {0} does not fit in minor units")]
    Overflow(Decimal),
}

/// Converts a decimal amount into integer minor units (e.g. 199.99 -> 19999).
///
/// Refuses amounts that are not positive or that would lose a fraction of a minor unit.
pub fn to_minor_units(amount: Decimal) -> Result<i64, AmountError> {
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive(amount));
    }
    let scaled = amount
        .checked_mul(Decimal::from(10_i64.pow(MINOR_UNIT_EXPONENT)))
        .ok_or(AmountError::Overflow(amount))?;
    if !scaled.fract().is_zero() {
        return Err(AmountError::Inexact(amount));
    }
    scaled.to_i64().ok_or(AmountError::Overflow(amount))
}

pub fn from_minor_units(amount_minor: i64) -> Decimal {
    Decimal::new(amount_minor, MINOR_UNIT_EXPONENT)
}
