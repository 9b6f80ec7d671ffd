//! services/api/src/web/enroll.rs
//!
//! Handlers for enrolling, the checkout round trip with the payment gateway and
//! enrollment status changes. All of them act for the learner placed in the
//! request extensions by `require_learner`.

use crate::web::{
    rest::{error_reply, CourseResponse, ErrorReply, ErrorResponse},
    state::AppState,
};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
};
use chrono::{DateTime, Utc};
use course_platform_core::{
    CourseId, Enrollment, EnrollmentError, EnrollmentResult, EnrollmentStatus, Learner,
    PaymentDetails, PaymentStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    pub redirect_url: String,
    pub already_enrolled: bool,
}

/// A hosted checkout session the client should send the learner to.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutSessionResponse {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub course: CourseResponse,
    pub total_amount: Decimal,
    pub currency: String,
    pub publishable_key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub payment_id: String,
    pub paid_at: DateTime<Utc>,
}

impl From<PaymentDetails> for PaymentResponse {
    fn from(payment: PaymentDetails) -> Self {
        Self {
            status: payment.status,
            amount: payment.amount,
            payment_id: payment.payment_id,
            paid_at: payment.paid_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollmentResponse {
    pub id: i64,
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment: Option<PaymentResponse>,
}

impl From<Enrollment> for EnrollmentResponse {
    fn from(enrollment: Enrollment) -> Self {
        Self {
            id: enrollment.id,
            course_id: enrollment.course_id,
            status: enrollment.status,
            enrolled_at: enrollment.enrolled_at,
            completed_at: enrollment.completed_at,
            payment: enrollment.payment.map(Into::into),
        }
    }
}

/// The result of the learner returning from (or abandoning) checkout.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentOutcomeResponse {
    pub success: bool,
    pub message: String,
    pub redirect_url: String,
    pub already_enrolled: bool,
    pub enrollment: Option<EnrollmentResponse>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentQuery {
    /// The course being bought. Kept as text so a bad value redirects instead of failing.
    pub course_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentSuccessQuery {
    /// The gateway's checkout session ID.
    pub session_id: Option<String>,
    pub course_id: Option<String>,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn course_url(course_id: CourseId) -> String {
    format!("/courses/{}", course_id)
}

fn parse_course_id(raw: Option<&str>) -> Option<CourseId> {
    raw.and_then(|v| v.trim().parse().ok())
}

fn with_redirect(reply: ErrorReply, redirect_url: String) -> ErrorReply {
    let (status, Json(mut body)) = reply;
    body.redirect_url = Some(redirect_url);
    (status, Json(body))
}

/// Maps a workflow failure onto a status code and a learner-facing message.
/// Gateway and storage details are logged here and never returned.
fn enrollment_error_reply(e: EnrollmentError, course_id: CourseId) -> ErrorReply {
    let back_to_course = course_url(course_id);
    match e {
        EnrollmentError::NotFound(detail) => {
            warn!("Enrollment target missing: {}", detail);
            with_redirect(
                error_reply(StatusCode::NOT_FOUND, "Course not found"),
                "/courses".to_string(),
            )
        }
        EnrollmentError::AlreadyEnrolled(_) => with_redirect(
            error_reply(
                StatusCode::BAD_REQUEST,
                "You are already enrolled in this course",
            ),
            back_to_course,
        ),
        EnrollmentError::PaymentRequired(id) => with_redirect(
            error_reply(StatusCode::PAYMENT_REQUIRED, "This course requires payment"),
            format!("/payment?course_id={}", id),
        ),
        EnrollmentError::InvalidAmount(_) => with_redirect(
            error_reply(
                StatusCode::BAD_REQUEST,
                "This course cannot be purchased at the moment",
            ),
            back_to_course,
        ),
        EnrollmentError::GatewayUnavailable => with_redirect(
            error_reply(
                StatusCode::SERVICE_UNAVAILABLE,
                "Payment service is unavailable, please try again later",
            ),
            back_to_course,
        ),
        EnrollmentError::InvalidSession => with_redirect(
            error_reply(StatusCode::BAD_REQUEST, "Payment could not be verified"),
            back_to_course,
        ),
        EnrollmentError::NotCompleted(status) => {
            info!("Payment for course {} not completed: {}", course_id, status);
            with_redirect(
                error_reply(
                    StatusCode::PAYMENT_REQUIRED,
                    "Payment has not been completed",
                ),
                back_to_course,
            )
        }
        EnrollmentError::InvalidTransition(e) => {
            with_redirect(error_reply(StatusCode::CONFLICT, e.to_string()), back_to_course)
        }
        EnrollmentError::Storage(e) => {
            error!("Enrollment storage failure on course {}: {:?}", course_id, e);
            with_redirect(
                error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
                back_to_course,
            )
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Enroll in a free course.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/enroll",
    params(
        ("course_id" = i64, Path, description = "The course ID."),
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Enrolled, or already enrolled", body = EnrollResponse),
        (status = 401, description = "Missing learner"),
        (status = 402, description = "The course must be bought", body = ErrorResponse),
        (status = 404, description = "No such published course", body = ErrorResponse)
    )
)]
pub async fn enroll_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Path(course_id): Path<i64>,
) -> Result<Json<EnrollResponse>, ErrorReply> {
    let result = app_state
        .workflow
        .enroll_free(&learner, course_id)
        .await
        .map_err(|e| enrollment_error_reply(e, course_id))?;

    let message = match result {
        EnrollmentResult::Enrolled(_) => "Successfully enrolled in the course",
        EnrollmentResult::AlreadyEnrolled(_) => "You are already enrolled in this course",
    };
    Ok(Json(EnrollResponse {
        success: true,
        message: message.to_string(),
        redirect_url: course_url(course_id),
        already_enrolled: !result.is_new(),
    }))
}

/// What the payment page shows before checkout.
///
/// Redirects (303) to the catalog when the course is missing or unpublished and
/// to the course page when the learner is already enrolled.
#[utoipa::path(
    get,
    path = "/payment",
    params(
        PaymentQuery,
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Payment details", body = PaymentIntentResponse),
        (status = 303, description = "Nothing to pay for")
    )
)]
pub async fn payment_page_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Query(query): Query<PaymentQuery>,
) -> Response {
    let Some(course_id) = parse_course_id(query.course_id.as_deref()) else {
        return Redirect::to("/courses").into_response();
    };

    match app_state.workflow.payment_intent(&learner, course_id).await {
        Ok(intent) => Json(PaymentIntentResponse {
            course: intent.course.into(),
            total_amount: intent.total_amount,
            currency: app_state.workflow.settings().currency.clone(),
            publishable_key: intent.publishable_key,
        })
        .into_response(),
        Err(EnrollmentError::NotFound(_)) => Redirect::to("/courses").into_response(),
        Err(EnrollmentError::AlreadyEnrolled(_)) => {
            Redirect::to(&course_url(course_id)).into_response()
        }
        Err(e) => enrollment_error_reply(e, course_id).into_response(),
    }
}

/// Open a hosted checkout session for a paid course.
#[utoipa::path(
    post,
    path = "/checkout-session/{course_id}",
    params(
        ("course_id" = i64, Path, description = "The course ID."),
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Checkout session created", body = CheckoutSessionResponse),
        (status = 400, description = "Already enrolled or unpayable amount", body = ErrorResponse),
        (status = 404, description = "No such published course", body = ErrorResponse),
        (status = 405, description = "Only POST is allowed"),
        (status = 503, description = "Payment gateway unavailable", body = ErrorResponse)
    )
)]
pub async fn checkout_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Path(course_id): Path<i64>,
) -> Result<Json<CheckoutSessionResponse>, ErrorReply> {
    let handle = app_state
        .workflow
        .begin_paid_enrollment(&learner, course_id)
        .await
        .map_err(|e| enrollment_error_reply(e, course_id))?;
    Ok(Json(CheckoutSessionResponse {
        id: handle.id,
        url: handle.url,
    }))
}

/// The gateway's return URL after a successful checkout.
#[utoipa::path(
    get,
    path = "/payment/success",
    params(
        PaymentSuccessQuery,
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Enrollment confirmed", body = PaymentOutcomeResponse),
        (status = 400, description = "Session missing or not verifiable", body = ErrorResponse),
        (status = 402, description = "Payment not completed", body = ErrorResponse),
        (status = 503, description = "Payment gateway unavailable", body = ErrorResponse)
    )
)]
pub async fn payment_success_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Query(query): Query<PaymentSuccessQuery>,
) -> Result<Json<PaymentOutcomeResponse>, ErrorReply> {
    let course_id = parse_course_id(query.course_id.as_deref()).ok_or_else(|| {
        with_redirect(
            error_reply(StatusCode::BAD_REQUEST, "Missing or invalid course"),
            "/courses".to_string(),
        )
    })?;
    let session_id = query
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            with_redirect(
                error_reply(StatusCode::BAD_REQUEST, "Missing payment session"),
                course_url(course_id),
            )
        })?;

    let result = app_state
        .workflow
        .confirm_paid_enrollment(&learner, session_id, course_id)
        .await
        .map_err(|e| enrollment_error_reply(e, course_id))?;

    let already_enrolled = !result.is_new();
    let message = if already_enrolled {
        "You are already enrolled in this course"
    } else {
        "Payment successful! You are now enrolled in the course"
    };
    let enrollment = match result {
        EnrollmentResult::Enrolled(e) | EnrollmentResult::AlreadyEnrolled(e) => e,
    };
    Ok(Json(PaymentOutcomeResponse {
        success: true,
        message: message.to_string(),
        redirect_url: course_url(course_id),
        already_enrolled,
        enrollment: Some(enrollment.into()),
    }))
}

/// The gateway's return URL when the learner abandons checkout. Nothing changes.
#[utoipa::path(
    get,
    path = "/payment/cancel",
    params(PaymentQuery),
    responses((status = 200, description = "Checkout cancelled", body = PaymentOutcomeResponse))
)]
pub async fn payment_cancel_handler(Query(query): Query<PaymentQuery>) -> Json<PaymentOutcomeResponse> {
    let redirect_url = parse_course_id(query.course_id.as_deref())
        .map(course_url)
        .unwrap_or_else(|| "/courses".to_string());
    Json(PaymentOutcomeResponse {
        success: false,
        message: "Payment was cancelled. You have not been charged.".to_string(),
        redirect_url,
        already_enrolled: false,
        enrollment: None,
    })
}

/// The learner's enrollments, newest first.
#[utoipa::path(
    get,
    path = "/me/enrollments",
    params(("x-user-id" = uuid::Uuid, Header, description = "The learner.")),
    responses((status = 200, description = "Enrollments", body = [EnrollmentResponse]))
)]
pub async fn my_enrollments_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
) -> Result<Json<Vec<EnrollmentResponse>>, ErrorReply> {
    let enrollments = app_state
        .workflow
        .learner_enrollments(learner.id)
        .await
        .map_err(|e| {
            error!("Failed to list enrollments for {}: {:?}", learner.id, e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        })?;
    Ok(Json(enrollments.into_iter().map(Into::into).collect()))
}

/// Mark the learner's enrollment as completed.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/complete",
    params(
        ("course_id" = i64, Path, description = "The course ID."),
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Enrollment completed", body = EnrollmentResponse),
        (status = 404, description = "Not enrolled", body = ErrorResponse),
        (status = 409, description = "Enrollment was dropped", body = ErrorResponse)
    )
)]
pub async fn complete_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Path(course_id): Path<i64>,
) -> Result<Json<EnrollmentResponse>, ErrorReply> {
    let enrollment = app_state
        .workflow
        .complete_enrollment(learner.id, course_id)
        .await
        .map_err(|e| enrollment_error_reply(e, course_id))?;
    Ok(Json(enrollment.into()))
}

/// Drop the learner's enrollment.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/drop",
    params(
        ("course_id" = i64, Path, description = "The course ID."),
        ("x-user-id" = uuid::Uuid, Header, description = "The learner.")
    ),
    responses(
        (status = 200, description = "Enrollment dropped", body = EnrollmentResponse),
        (status = 404, description = "Not enrolled", body = ErrorResponse),
        (status = 409, description = "Enrollment was completed", body = ErrorResponse)
    )
)]
pub async fn drop_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(learner): Extension<Learner>,
    Path(course_id): Path<i64>,
) -> Result<Json<EnrollmentResponse>, ErrorReply> {
    let enrollment = app_state
        .workflow
        .drop_enrollment(learner.id, course_id)
        .await
        .map_err(|e| enrollment_error_reply(e, course_id))?;
    Ok(Json(enrollment.into()))
}
