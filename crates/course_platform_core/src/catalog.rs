//! crates/course_platform_core/src/catalog.rs
//!
//! The course catalog service: the read path used by the web surface and the
//! validated authoring path (create, update, delete).

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::authoring::{check_video_references, validate_course, CourseInput};
use crate::domain::{
    Course, CourseFilter, CourseId, CourseVideo, EnrollmentStats, EnrollmentStatus,
};
use crate::ports::{CatalogRepository, EnrollmentLedger, PortError};

const SIMILAR_COURSES_LIMIT: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Course {0} not found")]
    NotFound(CourseId),
    #[error("Course failed validation: {0}")]
    Validation(ValidationErrors),
    /// A concurrent edit changed the course's videos underneath this one.
    #[error("Conflicting edit: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(PortError),
}

impl CatalogError {
    fn from_port(e: PortError, course_id: CourseId) -> Self {
        match e {
            PortError::NotFound(_) => CatalogError::NotFound(course_id),
            PortError::Conflict(msg) => CatalogError::Conflict(msg),
            other => CatalogError::Storage(other),
        }
    }
}

/// Everything the course page shows.
#[derive(Debug, Clone)]
pub struct CourseDetail {
    pub course: Course,
    pub videos: Vec<CourseVideo>,
    pub stats: EnrollmentStats,
    /// Whether the viewing learner holds an active enrollment.
    pub is_enrolled: bool,
    pub similar: Vec<Course>,
}

#[derive(Clone)]
pub struct CourseCatalog {
    repository: Arc<dyn CatalogRepository>,
    ledger: Arc<dyn EnrollmentLedger>,
}

impl CourseCatalog {
    pub fn new(repository: Arc<dyn CatalogRepository>, ledger: Arc<dyn EnrollmentLedger>) -> Self {
        Self { repository, ledger }
    }

    pub async fn list_courses(&self, filter: &CourseFilter) -> Result<Vec<Course>, CatalogError> {
        self.repository
            .list_courses(filter)
            .await
            .map_err(CatalogError::Storage)
    }

    pub async fn get_course(&self, course_id: CourseId) -> Result<Course, CatalogError> {
        self.repository
            .get_course(course_id)
            .await
            .map_err(|e| CatalogError::from_port(e, course_id))
    }

    pub async fn course_detail(
        &self,
        course_id: CourseId,
        learner_id: Option<Uuid>,
    ) -> Result<CourseDetail, CatalogError> {
        let course = self.get_course(course_id).await?;
        let videos = self
            .repository
            .list_videos(course_id)
            .await
            .map_err(CatalogError::Storage)?;
        let stats = self
            .ledger
            .enrollment_stats(course_id)
            .await
            .map_err(CatalogError::Storage)?;
        let is_enrolled = match learner_id {
            Some(learner_id) => self
                .ledger
                .find_enrollment(learner_id, course_id)
                .await
                .map_err(CatalogError::Storage)?
                .is_some_and(|e| e.status == EnrollmentStatus::Active),
            None => false,
        };
        let similar = self
            .repository
            .similar_courses(&course, SIMILAR_COURSES_LIMIT)
            .await
            .map_err(CatalogError::Storage)?;

        Ok(CourseDetail {
            course,
            videos,
            stats,
            is_enrolled,
            similar,
        })
    }

    /// Validates and stores a new course with its videos.
    pub async fn create_course(
        &self,
        input: CourseInput,
        today: NaiveDate,
    ) -> Result<Course, CatalogError> {
        validate_course(&input, None, today).map_err(CatalogError::Validation)?;
        let published_at = input.is_published.then(Utc::now);
        let course = self
            .repository
            .create_course(&input, published_at)
            .await
            .map_err(CatalogError::Storage)?;
        info!("Created course {} '{}'", course.id, course.title);
        Ok(course)
    }

    /// Validates and applies an edit. `published_at` is stamped on first publish and
    /// kept afterwards.
    pub async fn update_course(
        &self,
        course_id: CourseId,
        input: CourseInput,
        today: NaiveDate,
    ) -> Result<Course, CatalogError> {
        let current = self.get_course(course_id).await?;
        validate_course(&input, Some(&current), today).map_err(CatalogError::Validation)?;
        let existing: Vec<_> = self
            .repository
            .list_videos(course_id)
            .await
            .map_err(CatalogError::Storage)?
            .iter()
            .map(|video| video.id)
            .collect();
        check_video_references(&input, &existing).map_err(CatalogError::Validation)?;
        let published_at = stamp_published_at(&current, &input, Utc::now());
        let course = self
            .repository
            .update_course(course_id, &input, published_at)
            .await
            .map_err(|e| CatalogError::from_port(e, course_id))?;
        info!("Updated course {}", course.id);
        Ok(course)
    }

    /// Deletes a course; its videos and enrollments go with it.
    pub async fn delete_course(&self, course_id: CourseId) -> Result<(), CatalogError> {
        self.repository
            .delete_course(course_id)
            .await
            .map_err(|e| CatalogError::from_port(e, course_id))?;
        info!("Deleted course {}", course_id);
        Ok(())
    }
}

fn stamp_published_at(
    current: &Course,
    input: &CourseInput,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match current.published_at {
        Some(at) => Some(at),
        None if input.is_published => Some(now),
        None => None,
    }
}
