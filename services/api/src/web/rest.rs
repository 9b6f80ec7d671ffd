//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the course catalog endpoints, the shared
//! response payloads and the master definition for the OpenAPI specification.

use crate::web::{enroll, middleware::learner_from_headers, state::AppState};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use course_platform_core::{
    CatalogError, Course, CourseDetail, CourseFilter, CourseId, CourseInput, CourseLevel,
    CourseVideo, EnrollmentStats, EnrollmentStatus, PaymentStatus, VideoInput,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use validator::{ValidationErrors, ValidationErrorsKind};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_courses_handler,
        create_course_handler,
        course_detail_handler,
        update_course_handler,
        delete_course_handler,
        enroll::enroll_handler,
        enroll::payment_page_handler,
        enroll::checkout_session_handler,
        enroll::payment_success_handler,
        enroll::payment_cancel_handler,
        enroll::my_enrollments_handler,
        enroll::complete_handler,
        enroll::drop_handler,
    ),
    components(
        schemas(
            CourseInput, VideoInput, CourseLevel, EnrollmentStatus, PaymentStatus,
            EnrollmentStats, CourseResponse, VideoResponse, CourseDetailResponse, ErrorResponse,
            enroll::EnrollResponse, enroll::CheckoutSessionResponse,
            enroll::PaymentIntentResponse, enroll::EnrollmentResponse,
            enroll::PaymentResponse, enroll::PaymentOutcomeResponse,
        )
    ),
    tags(
        (name = "Course Platform API", description = "Course catalog, enrollment and checkout endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Shared Error Payload
//=========================================================================================

/// The body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Where the client should send the learner next, when there is an obvious place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Field-keyed validation messages; nested videos appear as `videos[0].youtube_url`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<String>>,
}

pub type ErrorReply = (StatusCode, Json<ErrorResponse>);

pub fn error_reply(status: StatusCode, message: impl Into<String>) -> ErrorReply {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            redirect_url: None,
            fields: BTreeMap::new(),
        }),
    )
}

fn flatten_errors(prefix: &str, errors: &ValidationErrors, out: &mut BTreeMap<String, Vec<String>>) {
    for (field, kind) in errors.errors() {
        let key = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.entry(key).or_default().extend(list.iter().map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                }))
            }
            ValidationErrorsKind::Struct(inner) => flatten_errors(&key, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten_errors(&format!("{}[{}]", key, index), inner, out);
                }
            }
        }
    }
}

fn catalog_error_reply(e: CatalogError) -> ErrorReply {
    match e {
        CatalogError::NotFound(id) => {
            error_reply(StatusCode::NOT_FOUND, format!("Course {} not found", id))
        }
        CatalogError::Validation(errors) => {
            let mut fields = BTreeMap::new();
            flatten_errors("", &errors, &mut fields);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    error: "Please correct the errors below.".to_string(),
                    redirect_url: None,
                    fields,
                }),
            )
        }
        CatalogError::Conflict(msg) => {
            warn!("Rejected course edit: {}", msg);
            error_reply(
                StatusCode::CONFLICT,
                "The course changed while you were editing it. Please reload and try again.",
            )
        }
        CatalogError::Storage(e) => {
            error!("Catalog storage failure: {:?}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

//=========================================================================================
// API Response and Query Structs
//=========================================================================================

/// A course as shown in listings and on its own page.
#[derive(Debug, Serialize, ToSchema)]
pub struct CourseResponse {
    pub id: CourseId,
    pub title: String,
    pub short_description: String,
    pub description: String,
    pub what_youll_learn: String,
    pub requirements: String,
    pub instructor: String,
    pub instructor_bio: String,
    pub level: CourseLevel,
    pub category: String,
    pub is_published: bool,
    pub is_featured: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_weeks: Option<u32>,
    pub duration_display: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub discount_percentage: u32,
    /// What the learner pays: the discount price when present, else the price.
    pub effective_price: Decimal,
    pub is_free: bool,
    pub thumbnail: Option<String>,
    pub promo_video: Option<String>,
    pub students_enrolled: u32,
    pub average_rating: Decimal,
    pub total_reviews: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Course> for CourseResponse {
    fn from(course: Course) -> Self {
        Self {
            duration_display: course.duration_display(),
            discount_percentage: course.discount_percentage(),
            effective_price: course.charge_amount(),
            is_free: course.is_free(),
            id: course.id,
            title: course.title,
            short_description: course.short_description,
            description: course.description,
            what_youll_learn: course.what_youll_learn,
            requirements: course.requirements,
            instructor: course.instructor,
            instructor_bio: course.instructor_bio,
            level: course.level,
            category: course.category,
            is_published: course.is_published,
            is_featured: course.is_featured,
            published_at: course.published_at,
            start_date: course.start_date,
            end_date: course.end_date,
            duration_weeks: course.duration_weeks,
            price: course.price,
            discount_price: course.discount_price,
            thumbnail: course.thumbnail,
            promo_video: course.promo_video,
            students_enrolled: course.students_enrolled,
            average_rating: course.average_rating,
            total_reviews: course.total_reviews,
            created_at: course.created_at,
            updated_at: course.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VideoResponse {
    pub id: i64,
    pub title: String,
    pub youtube_url: String,
    pub embed_url: String,
    pub order: u32,
}

impl From<CourseVideo> for VideoResponse {
    fn from(video: CourseVideo) -> Self {
        Self {
            embed_url: video.embed_url(),
            id: video.id,
            title: video.title,
            youtube_url: video.youtube_url,
            order: video.order,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseDetailResponse {
    pub course: CourseResponse,
    pub videos: Vec<VideoResponse>,
    pub stats: EnrollmentStats,
    pub is_enrolled: bool,
    pub similar_courses: Vec<CourseResponse>,
}

impl From<CourseDetail> for CourseDetailResponse {
    fn from(detail: CourseDetail) -> Self {
        Self {
            course: detail.course.into(),
            videos: detail.videos.into_iter().map(Into::into).collect(),
            stats: detail.stats,
            is_enrolled: detail.is_enrolled,
            similar_courses: detail.similar.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListCoursesQuery {
    /// Matched case-insensitively against title, instructor, category and description.
    pub search: Option<String>,
    /// `BEGINNER`, `INTERMEDIATE` or `ADVANCED`.
    pub level: Option<String>,
    pub published: Option<bool>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
pub async fn health_handler() -> &'static str {
    "ok"
}

/// List courses, newest first.
#[utoipa::path(
    get,
    path = "/courses",
    params(ListCoursesQuery),
    responses(
        (status = 200, description = "Matching courses", body = [CourseResponse]),
        (status = 400, description = "Unknown level", body = ErrorResponse)
    )
)]
pub async fn list_courses_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ListCoursesQuery>,
) -> Result<Json<Vec<CourseResponse>>, ErrorReply> {
    let level = match query.level.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        Some(raw) => Some(raw.parse::<CourseLevel>().map_err(|e| {
            error_reply(StatusCode::BAD_REQUEST, e.to_string())
        })?),
        None => None,
    };
    let filter = CourseFilter {
        text: query.search,
        level,
        published: query.published,
    };

    let courses = app_state
        .catalog
        .list_courses(&filter)
        .await
        .map_err(catalog_error_reply)?;
    Ok(Json(courses.into_iter().map(Into::into).collect()))
}

/// Create a course together with its videos.
#[utoipa::path(
    post,
    path = "/courses",
    request_body = CourseInput,
    responses(
        (status = 201, description = "Course created", body = CourseResponse),
        (status = 422, description = "Validation failed", body = ErrorResponse)
    )
)]
pub async fn create_course_handler(
    State(app_state): State<Arc<AppState>>,
    Json(input): Json<CourseInput>,
) -> Result<impl IntoResponse, ErrorReply> {
    let course = app_state
        .catalog
        .create_course(input, Utc::now().date_naive())
        .await
        .map_err(catalog_error_reply)?;
    Ok((StatusCode::CREATED, Json(CourseResponse::from(course))))
}

/// Show one course with its videos, enrollment stats and similar courses.
///
/// The `x-user-id` header is optional here; when present it drives `is_enrolled`.
#[utoipa::path(
    get,
    path = "/courses/{course_id}",
    params(
        ("course_id" = i64, Path, description = "The course ID."),
        ("x-user-id" = Option<uuid::Uuid>, Header, description = "The learner viewing the page.")
    ),
    responses(
        (status = 200, description = "Course detail", body = CourseDetailResponse),
        (status = 404, description = "No such course", body = ErrorResponse)
    )
)]
pub async fn course_detail_handler(
    State(app_state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<CourseDetailResponse>, ErrorReply> {
    let learner = learner_from_headers(&headers)
        .map_err(|status| error_reply(status, "Invalid x-user-id format"))?;
    let detail = app_state
        .catalog
        .course_detail(course_id, learner.map(|l| l.id))
        .await
        .map_err(catalog_error_reply)?;
    Ok(Json(detail.into()))
}

/// Update a course and apply its video changes.
#[utoipa::path(
    put,
    path = "/courses/{course_id}",
    params(("course_id" = i64, Path, description = "The course ID.")),
    request_body = CourseInput,
    responses(
        (status = 200, description = "Course updated", body = CourseResponse),
        (status = 404, description = "No such course", body = ErrorResponse),
        (status = 409, description = "Videos changed concurrently", body = ErrorResponse),
        (status = 422, description = "Validation failed, including unknown video ids", body = ErrorResponse)
    )
)]
pub async fn update_course_handler(
    State(app_state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
    Json(input): Json<CourseInput>,
) -> Result<Json<CourseResponse>, ErrorReply> {
    let course = app_state
        .catalog
        .update_course(course_id, input, Utc::now().date_naive())
        .await
        .map_err(catalog_error_reply)?;
    Ok(Json(course.into()))
}

/// Delete a course along with its videos and enrollments.
#[utoipa::path(
    delete,
    path = "/courses/{course_id}",
    params(("course_id" = i64, Path, description = "The course ID.")),
    responses(
        (status = 204, description = "Course deleted"),
        (status = 404, description = "No such course", body = ErrorResponse)
    )
)]
pub async fn delete_course_handler(
    State(app_state): State<Arc<AppState>>,
    Path(course_id): Path<i64>,
) -> Result<StatusCode, ErrorReply> {
    app_state
        .catalog
        .delete_course(course_id)
        .await
        .map_err(catalog_error_reply)?;
    Ok(StatusCode::NO_CONTENT)
}
