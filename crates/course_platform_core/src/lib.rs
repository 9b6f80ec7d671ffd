pub mod authoring;
pub mod catalog;
pub mod domain;
pub mod memory;
pub mod payment;
pub mod ports;
pub mod workflow;

pub use authoring::{check_video_references, validate_course, CourseInput, VideoInput};
pub use catalog::{CatalogError, CourseCatalog, CourseDetail};
pub use domain::{
    Course, CourseFilter, CourseId, CourseLevel, CourseVideo, Enrollment, EnrollmentStats,
    EnrollmentStatus, Learner, NewEnrollment, PaymentDetails, PaymentStatus,
};
pub use memory::InMemoryStore;
pub use payment::{
    CheckoutRequest, Correlation, GatewayError, PaymentGateway, SessionHandle, SessionStatus,
    VerifiedPayment,
};
pub use ports::{CatalogRepository, EnrollmentLedger, LedgerWrite, PortError, PortResult};
pub use workflow::{
    CheckoutSettings, EnrollmentError, EnrollmentResult, EnrollmentWorkflow, PaymentIntent,
};
