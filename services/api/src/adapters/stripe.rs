//! services/api/src/adapters/stripe.rs
//!
//! The Stripe Checkout implementation of the `PaymentGateway` port. Sessions are
//! created with a form-encoded POST and verified by fetching them back, so the
//! provider stays the single source of truth for whether money moved.

use async_trait::async_trait;
use course_platform_core::payment::{
    CheckoutRequest, Correlation, GatewayError, PaymentGateway, SessionHandle, SessionStatus,
    VerifiedPayment,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    /// Builds a gateway whose every call is bounded by `timeout`.
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent("course-platform/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    /// A bare id, or an object when the caller asked Stripe to expand it.
    payment_intent: Option<serde_json::Value>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl StripeSession {
    fn session_status(&self) -> SessionStatus {
        match (self.status.as_deref(), self.payment_status.as_deref()) {
            (Some("complete"), Some("paid")) => SessionStatus::Completed,
            (Some("expired"), _) => SessionStatus::Expired,
            _ => SessionStatus::Pending,
        }
    }

    fn correlation(&self) -> Option<Correlation> {
        let learner_id = self
            .metadata
            .get("learner_id")
            .or(self.client_reference_id.as_ref())
            .and_then(|id| Uuid::parse_str(id).ok())?;
        let course_id = self.metadata.get("course_id")?.parse().ok()?;
        Some(Correlation {
            learner_id,
            course_id,
        })
    }

    fn transaction_id(&self) -> Option<String> {
        match self.payment_intent.as_ref()? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Object(intent) => intent
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string),
            _ => None,
        }
    }

    fn into_verified(self) -> VerifiedPayment {
        let status = self.session_status();
        let correlation = self.correlation();
        let transaction_id = self.transaction_id().unwrap_or_default();
        VerifiedPayment {
            amount_minor: self.amount_total.unwrap_or(0),
            currency: self.currency.unwrap_or_default(),
            session_id: self.id,
            status,
            transaction_id,
            correlation,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn checkout_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("mode", "payment".to_string()),
        ("payment_method_types[]", "card".to_string()),
        (
            "line_items[0][price_data][currency]",
            request.currency.to_lowercase(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            request.amount_minor.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            request.product_name.clone(),
        ),
        ("line_items[0][quantity]", "1".to_string()),
        (
            "client_reference_id",
            request.correlation.learner_id.to_string(),
        ),
        (
            "metadata[learner_id]",
            request.correlation.learner_id.to_string(),
        ),
        (
            "metadata[course_id]",
            request.correlation.course_id.to_string(),
        ),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
    ];
    // Stripe rejects an empty description.
    if !request.product_description.trim().is_empty() {
        form.push((
            "line_items[0][price_data][product_data][description]",
            request.product_description.clone(),
        ));
    }
    if let Some(email) = &request.customer_email {
        form.push(("customer_email", email.clone()));
    }
    form
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Unavailable("request to Stripe timed out".to_string())
    } else {
        GatewayError::Unavailable(format!("request to Stripe failed: {}", e))
    }
}

/// Turns a non-success response into a gateway error, keeping Stripe's message for the logs.
async fn error_from_response(response: reqwest::Response, session_id: Option<&str>) -> GatewayError {
    let status = response.status();
    let detail = response
        .json::<StripeErrorBody>()
        .await
        .ok()
        .map(|body| {
            format!(
                "{} ({})",
                body.error.message.unwrap_or_default(),
                body.error.kind.unwrap_or_default()
            )
        })
        .unwrap_or_default();

    match (status, session_id) {
        (StatusCode::NOT_FOUND, Some(id)) => GatewayError::NotFound(id.to_string()),
        _ => GatewayError::Unavailable(format!("Stripe returned {}: {}", status, detail)),
    }
}

//=========================================================================================
// `PaymentGateway` Trait Implementation
//=========================================================================================

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(&self, request: CheckoutRequest) -> Result<SessionHandle, GatewayError> {
        if request.amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(request.amount_minor));
        }

        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(&request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response, None).await);
        }

        let session = response
            .json::<StripeSession>()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("unreadable Stripe session: {}", e)))?;
        info!(
            "Created checkout session {} for course {}",
            session.id, request.correlation.course_id
        );
        Ok(SessionHandle {
            id: session.id,
            url: session.url,
        })
    }

    async fn verify_session(&self, session_id: &str) -> Result<VerifiedPayment, GatewayError> {
        if session_id.is_empty()
            || !session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(GatewayError::NotFound(session_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(error_from_response(response, Some(session_id)).await);
        }

        let session = response
            .json::<StripeSession>()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("unreadable Stripe session: {}", e)))?;
        let raw_status = format!(
            "{}/{}",
            session.status.as_deref().unwrap_or("unknown"),
            session.payment_status.as_deref().unwrap_or("unknown")
        );
        debug!("Session {} is {}", session.id, raw_status);

        let verified = session.into_verified();
        if verified.status != SessionStatus::Completed {
            return Err(GatewayError::NotCompleted { status: raw_status });
        }
        Ok(verified)
    }
}
