//! crates/course_platform_core/src/memory.rs
//!
//! An in-memory implementation of the storage ports.
//!
//! All tables sit behind a single `RwLock`, so each ledger write, together with the
//! counter recomputation that follows it, happens atomically, the same guarantee a
//! database transaction gives the SQL adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::authoring::{CourseInput, VideoInput};
use crate::domain::{
    Course, CourseFilter, CourseId, CourseVideo, Enrollment, EnrollmentStats, EnrollmentStatus,
    NewEnrollment,
};
use crate::ports::{CatalogRepository, EnrollmentLedger, LedgerWrite, PortError, PortResult};

#[derive(Default)]
struct Tables {
    next_course_id: i64,
    next_video_id: i64,
    next_enrollment_id: i64,
    /// Keyed by id, so iteration follows insertion order.
    courses: BTreeMap<CourseId, Course>,
    videos: Vec<CourseVideo>,
    enrollments: Vec<Enrollment>,
}

impl Tables {
    fn course_mut(&mut self, course_id: CourseId) -> PortResult<&mut Course> {
        self.courses
            .get_mut(&course_id)
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))
    }

    fn push_video(&mut self, course_id: CourseId, input: &VideoInput, now: DateTime<Utc>) {
        self.next_video_id += 1;
        self.videos.push(CourseVideo {
            id: self.next_video_id,
            course_id,
            title: input.title.clone(),
            youtube_url: input.youtube_url.clone(),
            order: input.order.max(0) as u32,
            created_at: now,
            updated_at: now,
        });
    }

    fn recount(&mut self, course_id: CourseId) -> PortResult<u32> {
        let active = self
            .enrollments
            .iter()
            .filter(|e| e.course_id == course_id && e.status == EnrollmentStatus::Active)
            .count() as u32;
        let course = self.course_mut(course_id)?;
        course.students_enrolled = active;
        Ok(active)
    }
}

fn apply_input(course: &mut Course, input: &CourseInput) {
    course.title = input.title.trim().to_string();
    course.short_description = input.trimmed_short_description().to_string();
    course.description = input.description.clone();
    course.what_youll_learn = input.what_youll_learn.clone();
    course.requirements = input.requirements.clone();
    course.instructor = input.instructor.clone();
    course.instructor_bio = input.instructor_bio.clone();
    course.level = input.level;
    course.category = input.category.clone();
    course.is_published = input.is_published;
    course.is_featured = input.is_featured;
    course.start_date = input.start_date;
    course.end_date = input.end_date;
    course.duration_weeks = input.duration_weeks;
    course.price = input.price;
    course.discount_price = input.discount_price;
    course.thumbnail = input.thumbnail.clone();
    course.promo_video = input.promo_video.clone();
}

/// A thread-safe in-memory course catalog and enrollment ledger.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogRepository for InMemoryStore {
    async fn list_courses(&self, filter: &CourseFilter) -> PortResult<Vec<Course>> {
        let tables = self.tables.read().await;
        let mut courses: Vec<Course> = tables
            .courses
            .values()
            .filter(|course| filter.matches(course))
            .cloned()
            .collect();
        // Stable sort keeps id order among equal timestamps.
        courses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(courses)
    }

    async fn get_course(&self, course_id: CourseId) -> PortResult<Course> {
        let tables = self.tables.read().await;
        tables
            .courses
            .get(&course_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn list_videos(&self, course_id: CourseId) -> PortResult<Vec<CourseVideo>> {
        let tables = self.tables.read().await;
        let mut videos: Vec<CourseVideo> = tables
            .videos
            .iter()
            .filter(|v| v.course_id == course_id)
            .cloned()
            .collect();
        videos.sort_by(|a, b| (a.order, a.created_at, a.id).cmp(&(b.order, b.created_at, b.id)));
        Ok(videos)
    }

    async fn similar_courses(&self, course: &Course, limit: usize) -> PortResult<Vec<Course>> {
        let tables = self.tables.read().await;
        let mut similar: Vec<Course> = tables
            .courses
            .values()
            .filter(|c| c.is_published && c.category == course.category && c.id != course.id)
            .cloned()
            .collect();
        similar.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        similar.truncate(limit);
        Ok(similar)
    }

    async fn create_course(
        &self,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        tables.next_course_id += 1;
        let mut course = Course {
            id: tables.next_course_id,
            title: String::new(),
            short_description: String::new(),
            description: String::new(),
            what_youll_learn: String::new(),
            requirements: String::new(),
            instructor: String::new(),
            instructor_bio: String::new(),
            level: input.level,
            category: String::new(),
            is_published: false,
            is_featured: false,
            published_at,
            start_date: None,
            end_date: None,
            duration_weeks: None,
            price: Decimal::ZERO,
            discount_price: None,
            thumbnail: None,
            promo_video: None,
            students_enrolled: 0,
            average_rating: Decimal::ZERO,
            total_reviews: 0,
            created_at: now,
            updated_at: now,
        };
        apply_input(&mut course, input);

        for video in input.kept_videos() {
            tables.push_video(course.id, video, now);
        }
        tables.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn update_course(
        &self,
        course_id: CourseId,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        tables.course_mut(course_id)?;

        if let Some(video_id) = input
            .videos
            .iter()
            .filter_map(|change| change.id)
            .find(|&id| !tables.videos.iter().any(|v| v.id == id && v.course_id == course_id))
        {
            return Err(PortError::Conflict(format!(
                "Video {} is not part of course {}",
                video_id, course_id
            )));
        }

        for change in &input.videos {
            match change.id {
                Some(video_id) => {
                    let Some(position) = tables
                        .videos
                        .iter()
                        .position(|v| v.id == video_id && v.course_id == course_id)
                    else {
                        continue;
                    };
                    if change.delete {
                        tables.videos.remove(position);
                    } else {
                        let video = &mut tables.videos[position];
                        video.title = change.title.clone();
                        video.youtube_url = change.youtube_url.clone();
                        video.order = change.order.max(0) as u32;
                        video.updated_at = now;
                    }
                }
                None if !change.delete => tables.push_video(course_id, change, now),
                None => {}
            }
        }

        let course = tables.course_mut(course_id)?;
        apply_input(course, input);
        course.published_at = published_at;
        course.updated_at = now;
        Ok(course.clone())
    }

    async fn delete_course(&self, course_id: CourseId) -> PortResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .courses
            .remove(&course_id)
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        tables.videos.retain(|v| v.course_id != course_id);
        tables.enrollments.retain(|e| e.course_id != course_id);
        Ok(())
    }
}

#[async_trait]
impl EnrollmentLedger for InMemoryStore {
    async fn find_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> PortResult<Option<Enrollment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .enrollments
            .iter()
            .find(|e| e.learner_id == learner_id && e.course_id == course_id)
            .cloned())
    }

    async fn record_enrollment(&self, new: NewEnrollment) -> PortResult<LedgerWrite> {
        let mut tables = self.tables.write().await;
        tables.course_mut(new.course_id)?;

        if let Some(existing) = tables
            .enrollments
            .iter()
            .find(|e| e.learner_id == new.learner_id && e.course_id == new.course_id)
        {
            return Ok(LedgerWrite::Existing(existing.clone()));
        }

        tables.next_enrollment_id += 1;
        let enrollment = Enrollment {
            id: tables.next_enrollment_id,
            learner_id: new.learner_id,
            course_id: new.course_id,
            status: EnrollmentStatus::Active,
            enrolled_at: new.enrolled_at,
            completed_at: None,
            payment: new.payment,
        };
        tables.enrollments.push(enrollment.clone());
        let active_count = tables.recount(enrollment.course_id)?;
        Ok(LedgerWrite::Created {
            enrollment,
            active_count,
        })
    }

    async fn update_status(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        expected: EnrollmentStatus,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PortResult<Enrollment> {
        let mut tables = self.tables.write().await;
        let enrollment = tables
            .enrollments
            .iter_mut()
            .find(|e| e.learner_id == learner_id && e.course_id == course_id)
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "Enrollment of {} in course {} not found",
                    learner_id, course_id
                ))
            })?;
        if enrollment.status != expected {
            return Err(PortError::Conflict(format!(
                "Enrollment of {} in course {} is {}, not {}",
                learner_id, course_id, enrollment.status, expected
            )));
        }
        enrollment.status = status;
        enrollment.completed_at = completed_at;
        let updated = enrollment.clone();
        tables.recount(course_id)?;
        Ok(updated)
    }

    async fn recount_active(&self, course_id: CourseId) -> PortResult<u32> {
        let mut tables = self.tables.write().await;
        tables.recount(course_id)
    }

    async fn enrollment_stats(&self, course_id: CourseId) -> PortResult<EnrollmentStats> {
        let tables = self.tables.read().await;
        let mut stats = EnrollmentStats::default();
        for e in tables.enrollments.iter().filter(|e| e.course_id == course_id) {
            stats.total += 1;
            match e.status {
                EnrollmentStatus::Active => stats.active += 1,
                EnrollmentStatus::Completed => stats.completed += 1,
                EnrollmentStatus::Dropped => stats.dropped += 1,
            }
        }
        Ok(stats)
    }

    async fn enrollments_for_learner(&self, learner_id: Uuid) -> PortResult<Vec<Enrollment>> {
        let tables = self.tables.read().await;
        let mut enrollments: Vec<Enrollment> = tables
            .enrollments
            .iter()
            .filter(|e| e.learner_id == learner_id)
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| (b.enrolled_at, b.id).cmp(&(a.enrolled_at, a.id)));
        Ok(enrollments)
    }
}
