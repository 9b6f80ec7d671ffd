//! crates/course_platform_core/src/workflow.rs
//!
//! The enrollment workflow: decides how a learner becomes enrolled in a course and
//! keeps the enrollment ledger consistent with the outcome of any payment.
//!
//! Every operation is safe to repeat. Duplicate form submits, replayed gateway
//! callbacks and back-button reloads all resolve to the same single ledger row.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    Course, CourseId, Enrollment, EnrollmentStatus, InvalidTransition, Learner, NewEnrollment,
    PaymentDetails, PaymentStatus,
};
use crate::payment::{
    from_minor_units, to_minor_units, CheckoutRequest, Correlation, GatewayError, PaymentGateway,
    SessionHandle, SessionStatus,
};
use crate::ports::{CatalogRepository, EnrollmentLedger, LedgerWrite, PortError};

const PRODUCT_DESCRIPTION_MAX: usize = 200;

//=========================================================================================
// Results and Errors
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Learner is already enrolled in course {0}")]
    AlreadyEnrolled(CourseId),
    #[error("Course {0} requires payment")]
    PaymentRequired(CourseId),
    #[error("Course {0} has no valid charge amount")]
    InvalidAmount(CourseId),
    #[error("Payment gateway unavailable")]
    GatewayUnavailable,
    #[error("Payment session could not be verified")]
    InvalidSession,
    #[error("Payment session is not completed (status: {0})")]
    NotCompleted(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("Storage error: {0}")]
    Storage(#[from] PortError),
}

/// The outcome of an enrollment request that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollmentResult {
    Enrolled(Enrollment),
    /// The pair was already in the ledger; nothing new was written.
    AlreadyEnrolled(Enrollment),
}

impl EnrollmentResult {
    pub fn enrollment(&self) -> &Enrollment {
        match self {
            EnrollmentResult::Enrolled(e) | EnrollmentResult::AlreadyEnrolled(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, EnrollmentResult::Enrolled(_))
    }
}

impl From<LedgerWrite> for EnrollmentResult {
    fn from(write: LedgerWrite) -> Self {
        match write {
            LedgerWrite::Created { enrollment, .. } => EnrollmentResult::Enrolled(enrollment),
            LedgerWrite::Existing(enrollment) => EnrollmentResult::AlreadyEnrolled(enrollment),
        }
    }
}

/// What the payment page needs to show before the learner checks out.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub course: Course,
    pub total_amount: Decimal,
    pub publishable_key: Option<String>,
}

//=========================================================================================
// Checkout Settings
//=========================================================================================

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// ISO currency code sent to the gateway, e.g. `inr`.
    pub currency: String,
    /// Externally reachable base URL the gateway redirects back to.
    pub public_base_url: String,
    pub publishable_key: Option<String>,
}

impl CheckoutSettings {
    fn base(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    /// The gateway substitutes `{CHECKOUT_SESSION_ID}` when redirecting.
    pub fn success_url(&self, course_id: CourseId) -> String {
        format!(
            "{}/payment/success?session_id={{CHECKOUT_SESSION_ID}}&course_id={}",
            self.base(),
            course_id
        )
    }

    pub fn cancel_url(&self, course_id: CourseId) -> String {
        format!("{}/payment/cancel?course_id={}", self.base(), course_id)
    }
}

//=========================================================================================
// The Workflow
//=========================================================================================

#[derive(Clone)]
pub struct EnrollmentWorkflow {
    catalog: Arc<dyn CatalogRepository>,
    ledger: Arc<dyn EnrollmentLedger>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CheckoutSettings,
}

impl EnrollmentWorkflow {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        ledger: Arc<dyn EnrollmentLedger>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            catalog,
            ledger,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Enrolls a learner directly. Only free courses take this path; an existing
    /// enrollment is reported as `AlreadyEnrolled` regardless of price.
    pub async fn enroll_free(
        &self,
        learner: &Learner,
        course_id: CourseId,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        let course = self.published_course(course_id).await?;

        if let Some(existing) = self.ledger.find_enrollment(learner.id, course.id).await? {
            info!("Learner {} already enrolled in course {}", learner.id, course.id);
            return Ok(EnrollmentResult::AlreadyEnrolled(existing));
        }
        if !course.is_free() {
            return Err(EnrollmentError::PaymentRequired(course.id));
        }

        let write = self
            .record(NewEnrollment {
                learner_id: learner.id,
                course_id: course.id,
                enrolled_at: Utc::now(),
                payment: None,
            })
            .await?;
        Ok(write.into())
    }

    /// Opens a gateway checkout session for a paid course.
    pub async fn begin_paid_enrollment(
        &self,
        learner: &Learner,
        course_id: CourseId,
    ) -> Result<SessionHandle, EnrollmentError> {
        let course = self.published_course(course_id).await?;

        if self
            .ledger
            .find_enrollment(learner.id, course.id)
            .await?
            .is_some()
        {
            return Err(EnrollmentError::AlreadyEnrolled(course.id));
        }

        let amount_minor = to_minor_units(course.charge_amount()).map_err(|e| {
            error!("Refusing checkout for course {}: {}", course.id, e);
            EnrollmentError::InvalidAmount(course.id)
        })?;

        let request = CheckoutRequest {
            amount_minor,
            currency: self.settings.currency.clone(),
            product_name: course.title.clone(),
            product_description: course
                .description
                .chars()
                .take(PRODUCT_DESCRIPTION_MAX)
                .collect(),
            correlation: Correlation {
                learner_id: learner.id,
                course_id: course.id,
            },
            customer_email: learner.email.clone(),
            success_url: self.settings.success_url(course.id),
            cancel_url: self.settings.cancel_url(course.id),
        };

        let handle = self
            .gateway
            .create_session(request)
            .await
            .map_err(|e| map_gateway_error(&e, course.id))?;
        info!(
            "Created checkout session {} for learner {} on course {} ({} minor units)",
            handle.id, learner.id, course.id, amount_minor
        );
        Ok(handle)
    }

    /// Handles the gateway's return callback. The amount and completion state come
    /// from the gateway, never from the caller.
    pub async fn confirm_paid_enrollment(
        &self,
        learner: &Learner,
        session_id: &str,
        course_id: CourseId,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        let course = self.published_course(course_id).await?;

        let payment = self
            .gateway
            .verify_session(session_id)
            .await
            .map_err(|e| map_gateway_error(&e, course.id))?;

        if payment.status != SessionStatus::Completed {
            return Err(EnrollmentError::NotCompleted(format!("{:?}", payment.status)));
        }
        let expected = Correlation {
            learner_id: learner.id,
            course_id: course.id,
        };
        if payment.correlation != Some(expected) {
            warn!(
                "Session {} does not belong to learner {} and course {}",
                session_id, learner.id, course.id
            );
            return Err(EnrollmentError::InvalidSession);
        }
        if payment.amount_minor <= 0
            || !payment.currency.eq_ignore_ascii_case(&self.settings.currency)
        {
            warn!(
                "Session {} reported unusable amount {} {}",
                session_id, payment.amount_minor, payment.currency
            );
            return Err(EnrollmentError::InvalidSession);
        }

        if let Some(existing) = self.ledger.find_enrollment(learner.id, course.id).await? {
            info!(
                "Replayed confirmation for session {}; learner {} already enrolled",
                session_id, learner.id
            );
            return Ok(EnrollmentResult::AlreadyEnrolled(existing));
        }

        let now = Utc::now();
        let write = self
            .record(NewEnrollment {
                learner_id: learner.id,
                course_id: course.id,
                enrolled_at: now,
                payment: Some(PaymentDetails {
                    status: PaymentStatus::Completed,
                    amount: from_minor_units(payment.amount_minor),
                    payment_id: payment.transaction_id,
                    paid_at: now,
                }),
            })
            .await?;
        Ok(write.into())
    }

    /// Loads what the payment page shows for a course the learner may still buy.
    pub async fn payment_intent(
        &self,
        learner: &Learner,
        course_id: CourseId,
    ) -> Result<PaymentIntent, EnrollmentError> {
        let course = self.published_course(course_id).await?;
        if self
            .ledger
            .find_enrollment(learner.id, course.id)
            .await?
            .is_some()
        {
            return Err(EnrollmentError::AlreadyEnrolled(course.id));
        }
        Ok(PaymentIntent {
            total_amount: course.charge_amount(),
            publishable_key: self.settings.publishable_key.clone(),
            course,
        })
    }

    pub async fn complete_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        self.transition(learner_id, course_id, EnrollmentStatus::Completed)
            .await
    }

    pub async fn drop_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> Result<Enrollment, EnrollmentError> {
        self.transition(learner_id, course_id, EnrollmentStatus::Dropped)
            .await
    }

    /// Rewrites a course's enrolled counter from the ledger.
    pub async fn repair_enrolled_count(&self, course_id: CourseId) -> Result<u32, EnrollmentError> {
        let count = self
            .ledger
            .recount_active(course_id)
            .await
            .map_err(not_found_or_storage)?;
        info!("Course {} enrolled counter recomputed to {}", course_id, count);
        Ok(count)
    }

    pub async fn learner_enrollments(
        &self,
        learner_id: Uuid,
    ) -> Result<Vec<Enrollment>, EnrollmentError> {
        Ok(self.ledger.enrollments_for_learner(learner_id).await?)
    }

    //-------------------------------------------------------------------------------------

    async fn published_course(&self, course_id: CourseId) -> Result<Course, EnrollmentError> {
        match self.catalog.get_course(course_id).await {
            Ok(course) if course.is_published => Ok(course),
            Ok(_) | Err(PortError::NotFound(_)) => Err(EnrollmentError::NotFound(format!(
                "Course {} not found or not available for enrollment",
                course_id
            ))),
            Err(e) => Err(EnrollmentError::Storage(e)),
        }
    }

    async fn record(&self, enrollment: NewEnrollment) -> Result<LedgerWrite, EnrollmentError> {
        let learner_id = enrollment.learner_id;
        let write = self
            .ledger
            .record_enrollment(enrollment)
            .await
            .map_err(not_found_or_storage)?;
        match &write {
            LedgerWrite::Created {
                enrollment,
                active_count,
            } => info!(
                "Enrolled learner {} in course {}; {} active",
                learner_id, enrollment.course_id, active_count
            ),
            LedgerWrite::Existing(enrollment) => info!(
                "Concurrent enrollment of learner {} in course {} resolved to existing row",
                learner_id, enrollment.course_id
            ),
        }
        Ok(write)
    }

    async fn transition(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        target: EnrollmentStatus,
    ) -> Result<Enrollment, EnrollmentError> {
        let mut enrollment = self
            .ledger
            .find_enrollment(learner_id, course_id)
            .await?
            .ok_or_else(|| {
                EnrollmentError::NotFound(format!(
                    "Learner {} is not enrolled in course {}",
                    learner_id, course_id
                ))
            })?;

        let expected = enrollment.status;
        if !enrollment.transition_to(target, Utc::now())? {
            return Ok(enrollment);
        }
        let saved = match self
            .ledger
            .update_status(
                learner_id,
                course_id,
                expected,
                enrollment.status,
                enrollment.completed_at,
            )
            .await
        {
            Ok(saved) => saved,
            Err(PortError::Conflict(msg)) => {
                warn!("Status change lost a race: {}", msg);
                return self.settle_lost_transition(learner_id, course_id, target).await;
            }
            Err(PortError::NotFound(msg)) => return Err(EnrollmentError::NotFound(msg)),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Enrollment of learner {} in course {} is now {}",
            learner_id, course_id, saved.status
        );
        Ok(saved)
    }

    /// Another writer changed the status between our read and write. Re-reads the row
    /// and judges the requested transition against what is stored now.
    async fn settle_lost_transition(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        target: EnrollmentStatus,
    ) -> Result<Enrollment, EnrollmentError> {
        let current = self
            .ledger
            .find_enrollment(learner_id, course_id)
            .await?
            .ok_or_else(|| {
                EnrollmentError::NotFound(format!(
                    "Learner {} is not enrolled in course {}",
                    learner_id, course_id
                ))
            })?;
        if current.status == target {
            return Ok(current);
        }
        Err(InvalidTransition {
            from: current.status,
            to: target,
        }
        .into())
    }
}

fn not_found_or_storage(e: PortError) -> EnrollmentError {
    match e {
        PortError::NotFound(msg) => EnrollmentError::NotFound(msg),
        other => EnrollmentError::Storage(other),
    }
}

/// Provider detail stays in the logs; callers only see the taxonomy kind.
fn map_gateway_error(e: &GatewayError, course_id: CourseId) -> EnrollmentError {
    match e {
        GatewayError::InvalidAmount(amount) => {
            error!("Gateway rejected amount {} for course {}", amount, course_id);
            EnrollmentError::InvalidAmount(course_id)
        }
        GatewayError::Unavailable(detail) => {
            error!("Payment gateway unavailable: {}", detail);
            EnrollmentError::GatewayUnavailable
        }
        GatewayError::NotFound(detail) => {
            warn!("Gateway has no such session: {}", detail);
            EnrollmentError::InvalidSession
        }
        GatewayError::NotCompleted { status } => EnrollmentError::NotCompleted(status.clone()),
    }
}
