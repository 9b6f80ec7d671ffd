//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use course_platform_core::{
    CatalogRepository, CheckoutSettings, CourseCatalog, EnrollmentLedger, EnrollmentWorkflow,
    PaymentGateway,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub catalog: CourseCatalog,
    pub workflow: EnrollmentWorkflow,
}

impl AppState {
    /// Wires the core services onto one set of adapters.
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        ledger: Arc<dyn EnrollmentLedger>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            catalog: CourseCatalog::new(repository.clone(), ledger.clone()),
            workflow: EnrollmentWorkflow::new(repository, ledger, gateway, settings),
        }
    }
}
