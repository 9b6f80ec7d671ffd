//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `CatalogRepository` and `EnrollmentLedger` ports from the `core` crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use course_platform_core::authoring::{CourseInput, VideoInput};
use course_platform_core::domain::{
    Course, CourseFilter, CourseId, CourseVideo, Enrollment, EnrollmentStats, EnrollmentStatus,
    NewEnrollment, PaymentDetails,
};
use course_platform_core::ports::{
    CatalogRepository, EnrollmentLedger, LedgerWrite, PortError, PortResult,
};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::warn;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const COURSE_COLUMNS: &str = "id, title, short_description, description, what_youll_learn, \
    requirements, instructor, instructor_bio, level, category, is_published, is_featured, \
    published_at, start_date, end_date, duration_weeks, price, discount_price, thumbnail, \
    promo_video, students_enrolled, average_rating, total_reviews, created_at, updated_at";

const VIDEO_COLUMNS: &str = "id, course_id, title, youtube_url, \"order\", created_at, updated_at";

const ENROLLMENT_COLUMNS: &str = "id, learner_id, course_id, status, enrolled_at, completed_at, \
    payment_status, payment_amount, payment_id, payment_date";

#[derive(FromRow)]
struct CourseRecord {
    id: i64,
    title: String,
    short_description: String,
    description: String,
    what_youll_learn: String,
    requirements: String,
    instructor: String,
    instructor_bio: String,
    level: String,
    category: String,
    is_published: bool,
    is_featured: bool,
    published_at: Option<DateTime<Utc>>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    duration_weeks: Option<i32>,
    price: Decimal,
    discount_price: Option<Decimal>,
    thumbnail: Option<String>,
    promo_video: Option<String>,
    students_enrolled: i32,
    average_rating: Decimal,
    total_reviews: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl CourseRecord {
    fn to_domain(self) -> PortResult<Course> {
        Ok(Course {
            id: self.id,
            title: self.title,
            short_description: self.short_description,
            description: self.description,
            what_youll_learn: self.what_youll_learn,
            requirements: self.requirements,
            instructor: self.instructor,
            instructor_bio: self.instructor_bio,
            level: self
                .level
                .parse()
                .map_err(|e| PortError::Unexpected(format!("course {}: {}", self.id, e)))?,
            category: self.category,
            is_published: self.is_published,
            is_featured: self.is_featured,
            published_at: self.published_at,
            start_date: self.start_date,
            end_date: self.end_date,
            duration_weeks: self.duration_weeks.map(|w| w.max(0) as u32),
            price: self.price,
            discount_price: self.discount_price,
            thumbnail: self.thumbnail,
            promo_video: self.promo_video,
            students_enrolled: self.students_enrolled.max(0) as u32,
            average_rating: self.average_rating,
            total_reviews: self.total_reviews.max(0) as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct VideoRecord {
    id: i64,
    course_id: i64,
    title: String,
    youtube_url: String,
    order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl VideoRecord {
    fn to_domain(self) -> CourseVideo {
        CourseVideo {
            id: self.id,
            course_id: self.course_id,
            title: self.title,
            youtube_url: self.youtube_url,
            order: self.order.max(0) as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct EnrollmentRecord {
    id: i64,
    learner_id: Uuid,
    course_id: i64,
    status: String,
    enrolled_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    payment_status: Option<String>,
    payment_amount: Option<Decimal>,
    payment_id: Option<String>,
    payment_date: Option<DateTime<Utc>>,
}
impl EnrollmentRecord {
    fn to_domain(self) -> PortResult<Enrollment> {
        let status = self
            .status
            .parse::<EnrollmentStatus>()
            .map_err(|e| PortError::Unexpected(format!("enrollment {}: {}", self.id, e)))?;

        let payment = match (
            self.payment_status,
            self.payment_amount,
            self.payment_id,
            self.payment_date,
        ) {
            (Some(status), Some(amount), Some(payment_id), Some(paid_at)) => {
                Some(PaymentDetails {
                    status: status.parse().map_err(|e| {
                        PortError::Unexpected(format!("enrollment {}: {}", self.id, e))
                    })?,
                    amount,
                    payment_id,
                    paid_at,
                })
            }
            _ => None,
        };

        Ok(Enrollment {
            id: self.id,
            learner_id: self.learner_id,
            course_id: self.course_id,
            status,
            enrolled_at: self.enrolled_at,
            completed_at: self.completed_at,
            payment,
        })
    }
}

#[derive(FromRow)]
struct StatsRecord {
    total: i64,
    active: i64,
    completed: i64,
    dropped: i64,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn course_not_found(course_id: CourseId) -> PortError {
    PortError::NotFound(format!("Course {} not found", course_id))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Escapes `LIKE` metacharacters so user text is matched literally.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn records_to_courses(records: Vec<CourseRecord>) -> PortResult<Vec<Course>> {
    records.into_iter().map(CourseRecord::to_domain).collect()
}

/// Rewrites the course's counter from the live count of active enrollments.
/// Runs on the caller's connection so it joins the caller's transaction.
async fn recount_in(conn: &mut PgConnection, course_id: CourseId) -> PortResult<u32> {
    let count = sqlx::query_scalar::<_, i32>(
        "UPDATE courses SET students_enrolled = \
             (SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'active') \
         WHERE id = $1 RETURNING students_enrolled",
    )
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unexpected)?
    .ok_or_else(|| course_not_found(course_id))?;
    Ok(count.max(0) as u32)
}

async fn insert_video(
    conn: &mut PgConnection,
    course_id: CourseId,
    video: &VideoInput,
) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO course_videos (course_id, title, youtube_url, \"order\") VALUES ($1, $2, $3, $4)",
    )
    .bind(course_id)
    .bind(&video.title)
    .bind(&video.youtube_url)
    .bind(video.order.max(0))
    .execute(&mut *conn)
    .await
    .map_err(unexpected)?;
    Ok(())
}

//=========================================================================================
// `CatalogRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl CatalogRepository for DbAdapter {
    async fn list_courses(&self, filter: &CourseFilter) -> PortResult<Vec<Course>> {
        let sql = format!(
            "SELECT {} FROM courses \
             WHERE ($1::text IS NULL OR title ILIKE $1 OR instructor ILIKE $1 \
                    OR category ILIKE $1 OR description ILIKE $1) \
               AND ($2::text IS NULL OR level = $2) \
               AND ($3::bool IS NULL OR is_published = $3) \
             ORDER BY created_at DESC, id ASC",
            COURSE_COLUMNS
        );
        let records = sqlx::query_as::<_, CourseRecord>(&sql)
            .bind(filter.search_term().map(like_pattern))
            .bind(filter.level.map(|level| level.as_str()))
            .bind(filter.published)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records_to_courses(records)
    }

    async fn get_course(&self, course_id: CourseId) -> PortResult<Course> {
        let sql = format!("SELECT {} FROM courses WHERE id = $1", COURSE_COLUMNS);
        sqlx::query_as::<_, CourseRecord>(&sql)
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| course_not_found(course_id))?
            .to_domain()
    }

    async fn list_videos(&self, course_id: CourseId) -> PortResult<Vec<CourseVideo>> {
        let sql = format!(
            "SELECT {} FROM course_videos WHERE course_id = $1 ORDER BY \"order\" ASC, created_at ASC, id ASC",
            VIDEO_COLUMNS
        );
        let records = sqlx::query_as::<_, VideoRecord>(&sql)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn similar_courses(&self, course: &Course, limit: usize) -> PortResult<Vec<Course>> {
        let sql = format!(
            "SELECT {} FROM courses WHERE is_published AND category = $1 AND id <> $2 \
             ORDER BY created_at DESC, id ASC LIMIT $3",
            COURSE_COLUMNS
        );
        let records = sqlx::query_as::<_, CourseRecord>(&sql)
            .bind(&course.category)
            .bind(course.id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records_to_courses(records)
    }

    async fn create_course(
        &self,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let sql = format!(
            "INSERT INTO courses (title, short_description, description, what_youll_learn, \
                 requirements, instructor, instructor_bio, level, category, is_published, \
                 is_featured, published_at, start_date, end_date, duration_weeks, price, \
                 discount_price, thumbnail, promo_video) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             RETURNING {}",
            COURSE_COLUMNS
        );
        let record = sqlx::query_as::<_, CourseRecord>(&sql)
            .bind(input.title.trim())
            .bind(input.trimmed_short_description())
            .bind(&input.description)
            .bind(&input.what_youll_learn)
            .bind(&input.requirements)
            .bind(&input.instructor)
            .bind(&input.instructor_bio)
            .bind(input.level.as_str())
            .bind(&input.category)
            .bind(input.is_published)
            .bind(input.is_featured)
            .bind(published_at)
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(input.duration_weeks.map(|w| w as i32))
            .bind(input.price)
            .bind(input.discount_price)
            .bind(&input.thumbnail)
            .bind(&input.promo_video)
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;

        for video in input.kept_videos() {
            insert_video(&mut tx, record.id, video).await?;
        }

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn update_course(
        &self,
        course_id: CourseId,
        input: &CourseInput,
        published_at: Option<DateTime<Utc>>,
    ) -> PortResult<Course> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let sql = format!(
            "UPDATE courses SET title = $2, short_description = $3, description = $4, \
                 what_youll_learn = $5, requirements = $6, instructor = $7, instructor_bio = $8, \
                 level = $9, category = $10, is_published = $11, is_featured = $12, \
                 published_at = $13, start_date = $14, end_date = $15, duration_weeks = $16, \
                 price = $17, discount_price = $18, thumbnail = $19, promo_video = $20, \
                 updated_at = now() \
             WHERE id = $1 RETURNING {}",
            COURSE_COLUMNS
        );
        let record = sqlx::query_as::<_, CourseRecord>(&sql)
            .bind(course_id)
            .bind(input.title.trim())
            .bind(input.trimmed_short_description())
            .bind(&input.description)
            .bind(&input.what_youll_learn)
            .bind(&input.requirements)
            .bind(&input.instructor)
            .bind(&input.instructor_bio)
            .bind(input.level.as_str())
            .bind(&input.category)
            .bind(input.is_published)
            .bind(input.is_featured)
            .bind(published_at)
            .bind(input.start_date)
            .bind(input.end_date)
            .bind(input.duration_weeks.map(|w| w as i32))
            .bind(input.price)
            .bind(input.discount_price)
            .bind(&input.thumbnail)
            .bind(&input.promo_video)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| course_not_found(course_id))?;

        let stored = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM course_videos WHERE course_id = $1 FOR UPDATE",
        )
        .bind(course_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unexpected)?;
        if let Some(video_id) = input
            .videos
            .iter()
            .filter_map(|change| change.id)
            .find(|id| !stored.contains(id))
        {
            return Err(PortError::Conflict(format!(
                "Video {} is not part of course {}",
                video_id, course_id
            )));
        }

        for change in &input.videos {
            match change.id {
                Some(video_id) => {
                    if change.delete {
                        sqlx::query("DELETE FROM course_videos WHERE id = $1 AND course_id = $2")
                            .bind(video_id)
                            .bind(course_id)
                            .execute(&mut *tx)
                            .await
                            .map_err(unexpected)?;
                    } else {
                        sqlx::query(
                            "UPDATE course_videos SET title = $3, youtube_url = $4, \"order\" = $5, \
                                 updated_at = now() \
                             WHERE id = $1 AND course_id = $2",
                        )
                        .bind(video_id)
                        .bind(course_id)
                        .bind(&change.title)
                        .bind(&change.youtube_url)
                        .bind(change.order.max(0))
                        .execute(&mut *tx)
                        .await
                        .map_err(unexpected)?;
                    }
                }
                None if !change.delete => insert_video(&mut tx, course_id, change).await?,
                None => {}
            }
        }

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn delete_course(&self, course_id: CourseId) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(course_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(course_not_found(course_id));
        }
        Ok(())
    }
}

//=========================================================================================
// `EnrollmentLedger` Trait Implementation
//=========================================================================================

#[async_trait]
impl EnrollmentLedger for DbAdapter {
    async fn find_enrollment(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
    ) -> PortResult<Option<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollments WHERE learner_id = $1 AND course_id = $2",
            ENROLLMENT_COLUMNS
        );
        sqlx::query_as::<_, EnrollmentRecord>(&sql)
            .bind(learner_id)
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .map(EnrollmentRecord::to_domain)
            .transpose()
    }

    async fn record_enrollment(&self, new: NewEnrollment) -> PortResult<LedgerWrite> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let sql = format!(
            "INSERT INTO enrollments (learner_id, course_id, status, enrolled_at, payment_status, \
                 payment_amount, payment_id, payment_date) \
             VALUES ($1, $2, 'active', $3, $4, $5, $6, $7) \
             ON CONFLICT (learner_id, course_id) DO NOTHING \
             RETURNING {}",
            ENROLLMENT_COLUMNS
        );
        let payment = new.payment.as_ref();
        let inserted = sqlx::query_as::<_, EnrollmentRecord>(&sql)
            .bind(new.learner_id)
            .bind(new.course_id)
            .bind(new.enrolled_at)
            .bind(payment.map(|p| p.status.as_str()))
            .bind(payment.map(|p| p.amount))
            .bind(payment.map(|p| p.payment_id.as_str()))
            .bind(payment.map(|p| p.paid_at))
            .fetch_optional(&mut *tx)
            .await;

        let inserted = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    "Unique violation enrolling {} in course {}; treating as existing",
                    new.learner_id, new.course_id
                );
                tx.rollback().await.map_err(unexpected)?;
                return self
                    .find_enrollment(new.learner_id, new.course_id)
                    .await?
                    .map(LedgerWrite::Existing)
                    .ok_or_else(|| PortError::Conflict("enrollment vanished".to_string()));
            }
            Err(e) if is_foreign_key_violation(&e) => return Err(course_not_found(new.course_id)),
            Err(e) => return Err(unexpected(e)),
        };

        let write = match inserted {
            Some(record) => {
                let active_count = recount_in(&mut tx, new.course_id).await?;
                LedgerWrite::Created {
                    enrollment: record.to_domain()?,
                    active_count,
                }
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM enrollments WHERE learner_id = $1 AND course_id = $2",
                    ENROLLMENT_COLUMNS
                );
                let existing = sqlx::query_as::<_, EnrollmentRecord>(&sql)
                    .bind(new.learner_id)
                    .bind(new.course_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(unexpected)?;
                LedgerWrite::Existing(existing.to_domain()?)
            }
        };

        tx.commit().await.map_err(unexpected)?;
        Ok(write)
    }

    async fn update_status(
        &self,
        learner_id: Uuid,
        course_id: CourseId,
        expected: EnrollmentStatus,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> PortResult<Enrollment> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let stored = sqlx::query_scalar::<_, String>(
            "SELECT status FROM enrollments WHERE learner_id = $1 AND course_id = $2 FOR UPDATE",
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::NotFound(format!(
                "Enrollment of {} in course {} not found",
                learner_id, course_id
            ))
        })?;
        if stored != expected.as_str() {
            return Err(PortError::Conflict(format!(
                "Enrollment of {} in course {} is {}, not {}",
                learner_id, course_id, stored, expected
            )));
        }

        let sql = format!(
            "UPDATE enrollments SET status = $3, completed_at = $4 \
             WHERE learner_id = $1 AND course_id = $2 AND status = $5 RETURNING {}",
            ENROLLMENT_COLUMNS
        );
        let record = sqlx::query_as::<_, EnrollmentRecord>(&sql)
            .bind(learner_id)
            .bind(course_id)
            .bind(status.as_str())
            .bind(completed_at)
            .bind(expected.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| {
                PortError::Conflict(format!(
                    "Enrollment of {} in course {} changed concurrently",
                    learner_id, course_id
                ))
            })?;
        recount_in(&mut tx, course_id).await?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn recount_active(&self, course_id: CourseId) -> PortResult<u32> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let count = recount_in(&mut tx, course_id).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(count)
    }

    async fn enrollment_stats(&self, course_id: CourseId) -> PortResult<EnrollmentStats> {
        let record = sqlx::query_as::<_, StatsRecord>(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = 'active') AS active, \
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed, \
                    COUNT(*) FILTER (WHERE status = 'dropped') AS dropped \
             FROM enrollments WHERE course_id = $1",
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(EnrollmentStats {
            total: record.total as u32,
            active: record.active as u32,
            completed: record.completed as u32,
            dropped: record.dropped as u32,
        })
    }

    async fn enrollments_for_learner(&self, learner_id: Uuid) -> PortResult<Vec<Enrollment>> {
        let sql = format!(
            "SELECT {} FROM enrollments WHERE learner_id = $1 ORDER BY enrolled_at DESC, id DESC",
            ENROLLMENT_COLUMNS
        );
        let records = sqlx::query_as::<_, EnrollmentRecord>(&sql)
            .bind(learner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        records.into_iter().map(EnrollmentRecord::to_domain).collect()
    }
}
