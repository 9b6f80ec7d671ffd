//! crates/course_platform_core/src/ports.rs
//!
//! Defines the storage contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of a specific relational store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::authoring::CourseInput;
use crate::domain::{
    Course, CourseFilter, CourseId, CourseVideo, Enrollment, EnrollmentStats, EnrollmentStatus,
    NewEnrollment,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all storage port operations.
/// This abstracts away the specific errors from the underlying database driver.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting write: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Outcome of writing an enrollment to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    /// A new row was inserted; `active_count` is the course counter recomputed in the
    /// same transaction.
    Created {
        enrollment: Enrollment,
        active_count: u32,
    },
    /// The (learner, course) pair was already present; nothing was written.
    Existing(Enrollment),
}

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Newest first; ties keep insertion order.
    async fn list_courses(&self, filter: &CourseFilter) -> PortResult<Vec<Course>>;

    async fn get_course(&self, course_id: CourseId) -> PortResult<Course>;

    /// Videos of a course in display order.
    async fn list_videos(&self, course_id: CourseId) -> PortResult<Vec<CourseVideo>>;

    /// Published courses sharing `course`'s category, excluding `course` itself.
    async fn similar_courses(&self, course: &Course, limit: usize) -> PortResult<Vec<Course>>;

    /// Inserts a course and every video of `input` not flagged for deletion.
    async fn create_course(
        &self,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course>;

    /// Overwrites the editable fields of a course and applies the video changes:
    /// entries without an id are added, entries with an id are edited, or removed when
    /// flagged for deletion.
    async fn update_course(
        &self,
        course_id: CourseId,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course>;

    /// Removes a course together with its videos and enrollments.
    async fn delete_course(&self, course_id: CourseId) -> PortResult<()>;
}

#[async_trait]
pub trait EnrollmentLedger: Send + Sync {
    async fn find_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> PortResult<Option<Enrollment>>;

    /// Inserts an active enrollment and recomputes the course's active counter in one
    /// transaction. An existing row for the pair, including one that wins a concurrent
    /// race, is reported as `LedgerWrite::Existing`.
    async fn record_enrollment(&self, enrollment: NewEnrollment) -> PortResult<LedgerWrite>;

    /// Persists a status change and recomputes the course's active counter in one
    /// transaction. The write only applies while the stored status still equals
    /// `expected`; otherwise nothing changes and `PortError::Conflict` is returned.
    async fn update_status(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        expected: EnrollmentStatus,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PortResult<Enrollment>;

    /// Rewrites the course's counter from the live count of active enrollments.
    async fn recount_active(&self, course_id: CourseId) -> PortResult<u32>;

    async fn enrollment_stats(&self, course_id: CourseId) -> PortResult<EnrollmentStats>;

    /// Newest first.
    async fn enrollments_for_learner(&self, learner_id: Uuid) -> PortResult<Vec<Enrollment>>;
}
