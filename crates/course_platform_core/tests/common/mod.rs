#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_platform_core::{
    CatalogRepository, CheckoutRequest, CheckoutSettings, Correlation, Course, CourseCatalog,
    CourseId, CourseInput, CourseLevel, Enrollment, EnrollmentLedger, EnrollmentStats,
    EnrollmentStatus, EnrollmentWorkflow, GatewayError, InMemoryStore, LedgerWrite,
    NewEnrollment, PaymentGateway, PortResult, SessionHandle, SessionStatus, VerifiedPayment,
    VideoInput,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;
use uuid::Uuid;

/// A gateway double: records checkout requests and answers verification from a script.
#[derive(Default)]
pub struct ScriptedGateway {
    pub created: Mutex<Vec<CheckoutRequest>>,
    sessions: Mutex<HashMap<String, Result<VerifiedPayment, GatewayError>>>,
    pub verify_calls: Mutex<u32>,
    pub unavailable: Mutex<bool>,
}

impl ScriptedGateway {
    pub fn script(&self, session_id: &str, outcome: Result<VerifiedPayment, GatewayError>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), outcome);
    }

    pub fn script_paid(&self, session_id: &str, learner_id: Uuid, course_id: i64, amount_minor: i64) {
        self.script(
            session_id,
            Ok(VerifiedPayment {
                session_id: session_id.to_string(),
                amount_minor,
                currency: "inr".to_string(),
                status: SessionStatus::Completed,
                transaction_id: format!("pi_{}", session_id),
                correlation: Some(Correlation {
                    learner_id,
                    course_id,
                }),
            }),
        );
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_session(&self, request: CheckoutRequest) -> Result<SessionHandle, GatewayError> {
        if request.amount_minor <= 0 {
            return Err(GatewayError::InvalidAmount(request.amount_minor));
        }
        if *self.unavailable.lock().unwrap() {
            return Err(GatewayError::Unavailable("connection refused".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request);
        let id = format!("cs_test_{}", created.len());
        Ok(SessionHandle {
            url: Some(format!("https://checkout.example/{}", id)),
            id,
        })
    }

    async fn verify_session(&self, session_id: &str) -> Result<VerifiedPayment, GatewayError> {
        *self.verify_calls.lock().unwrap() += 1;
        if *self.unavailable.lock().unwrap() {
            return Err(GatewayError::Unavailable("timed out".to_string()));
        }
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::NotFound(session_id.to_string())))
    }
}

/// Wraps the in-memory ledger so that the first `readers` lookups all return before any
/// of them proceeds, forcing their follow-up writes to interleave.
pub struct LockstepLedger {
    inner: InMemoryStore,
    readers: usize,
    reads: AtomicUsize,
    barrier: Barrier,
}

impl LockstepLedger {
    pub fn new(inner: InMemoryStore, readers: usize) -> Self {
        Self {
            inner,
            readers,
            reads: AtomicUsize::new(0),
            barrier: Barrier::new(readers),
        }
    }
}

#[async_trait]
impl EnrollmentLedger for LockstepLedger {
    async fn find_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> PortResult<Option<Enrollment>> {
        let found = self.inner.find_enrollment(learner_id, course_id).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.readers {
            self.barrier.wait().await;
        }
        Ok(found)
    }

    async fn record_enrollment(&self, enrollment: NewEnrollment) -> PortResult<LedgerWrite> {
        self.inner.record_enrollment(enrollment).await
    }

    async fn update_status(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        expected: EnrollmentStatus,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PortResult<Enrollment> {
        self.inner
            .update_status(learner_id, course_id, expected, status, completed_at)
            .await
    }

    async fn recount_active(&self, course_id: CourseId) -> PortResult<u32> {
        self.inner.recount_active(course_id).await
    }

    async fn enrollment_stats(&self, course_id: CourseId) -> PortResult<EnrollmentStats> {
        self.inner.enrollment_stats(course_id).await
    }

    async fn enrollments_for_learner(&self, learner_id: Uuid) -> PortResult<Vec<Enrollment>> {
        self.inner.enrollments_for_learner(learner_id).await
    }
}

pub fn settings() -> CheckoutSettings {
    CheckoutSettings {
        currency: "inr".to_string(),
        public_base_url: "https://courses.example/".to_string(),
        publishable_key: Some("pk_test_123".to_string()),
    }
}

/// A workflow over `store` whose first two ledger lookups run in lockstep.
pub fn lockstep_workflow(store: &InMemoryStore) -> EnrollmentWorkflow {
    EnrollmentWorkflow::new(
        Arc::new(store.clone()),
        Arc::new(LockstepLedger::new(store.clone(), 2)),
        Arc::new(ScriptedGateway::default()),
        settings(),
    )
}

pub struct Harness {
    pub store: InMemoryStore,
    pub gateway: Arc<ScriptedGateway>,
    pub workflow: EnrollmentWorkflow,
    pub catalog: CourseCatalog,
}

pub fn harness() -> Harness {
    let store = InMemoryStore::new();
    let gateway = Arc::new(ScriptedGateway::default());
    let workflow = EnrollmentWorkflow::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        gateway.clone(),
        settings(),
    );
    let catalog = CourseCatalog::new(Arc::new(store.clone()), Arc::new(store.clone()));
    Harness {
        store,
        gateway,
        workflow,
        catalog,
    }
}

/// A course input that satisfies every publishing rule.
pub fn course_input(title: &str, price: Decimal) -> CourseInput {
    CourseInput {
        title: title.to_string(),
        short_description: "A short pitch".to_string(),
        description: format!("Everything about {}", title),
        what_youll_learn: "Lots".to_string(),
        requirements: "Curiosity".to_string(),
        instructor: "Ferris".to_string(),
        instructor_bio: "Crab".to_string(),
        level: CourseLevel::Beginner,
        category: "Programming".to_string(),
        is_published: true,
        is_featured: false,
        start_date: None,
        end_date: None,
        duration_weeks: Some(8),
        price,
        discount_price: None,
        thumbnail: Some("course_thumbnails/rust.png".to_string()),
        promo_video: None,
        videos: Vec::new(),
    }
}

pub fn video(title: &str, order: i32) -> VideoInput {
    VideoInput {
        id: None,
        title: title.to_string(),
        youtube_url: format!("https://www.youtube.com/watch?v={}", title),
        order,
        delete: false,
    }
}

/// Stores a course straight through the repository, bypassing validation.
pub async fn seed(store: &InMemoryStore, input: CourseInput) -> Course {
    let published_at = input.is_published.then(Utc::now);
    store.create_course(&input, published_at).await.unwrap()
}
