//! crates/course_platform_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or HTTP representation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type CourseId = i64;
pub type VideoId = i64;
pub type EnrollmentId = i64;

//=========================================================================================
// Learner
//=========================================================================================

/// The identity enrolling in a course, as asserted by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Learner {
    pub id: Uuid,
    pub email: Option<String>,
}

impl Learner {
    pub fn new(id: Uuid) -> Self {
        Self { id, email: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

//=========================================================================================
// Course
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseLevel {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseLevel::Beginner => "BEGINNER",
            CourseLevel::Intermediate => "INTERMEDIATE",
            CourseLevel::Advanced => "ADVANCED",
        }
    }
}

impl fmt::Display for CourseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseLevel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BEGINNER" => Ok(CourseLevel::Beginner),
            "INTERMEDIATE" => Ok(CourseLevel::Intermediate),
            "ADVANCED" => Ok(CourseLevel::Advanced),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);

/// Week counts a course may advertise as its duration.
pub const ALLOWED_DURATIONS_WEEKS: [u32; 6] = [4, 8, 12, 16, 24, 52];

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
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
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub thumbnail: Option<String>,
    pub promo_video: Option<String>,
    /// Derived: number of active enrollments. Only the ledger writes it.
    pub students_enrolled: u32,
    pub average_rating: Decimal,
    pub total_reviews: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    /// The amount a learner is charged: the discount price when set, else the base price.
    pub fn charge_amount(&self) -> Decimal {
        self.discount_price.unwrap_or(self.price)
    }

    pub fn is_free(&self) -> bool {
        self.charge_amount() <= Decimal::ZERO
    }

    pub fn discount_percentage(&self) -> u32 {
        match self.discount_price {
            Some(discount) if self.price > Decimal::ZERO => {
                ((self.price - discount) / self.price * Decimal::ONE_HUNDRED)
                    .trunc()
                    .to_u32()
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn duration_display(&self) -> String {
        match self.duration_weeks {
            None | Some(0) => "Self-paced".to_string(),
            Some(1) => "1 Week".to_string(),
            Some(weeks) if weeks < 12 => format!("{} Weeks", weeks),
            Some(12) => "3 Months".to_string(),
            Some(24) => "6 Months".to_string(),
            Some(52) => "1 Year".to_string(),
            Some(weeks) => format!("{} Weeks", weeks),
        }
    }
}

//=========================================================================================
// Course Videos
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CourseVideo {
    pub id: VideoId,
    pub course_id: CourseId,
    pub title: String,
    pub youtube_url: String,
    pub order: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseVideo {
    /// Converts a watch or short-link URL into the embeddable player URL.
    /// URLs that are not recognised are returned unchanged.
    pub fn embed_url(&self) -> String {
        let Ok(parsed) = url::Url::parse(&self.youtube_url) else {
            return self.youtube_url.clone();
        };
        let host = parsed.host_str().unwrap_or_default();

        let video_id = if host.ends_with("youtube.com") && parsed.path() == "/watch" {
            Some(
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_default(),
            )
        } else if host.ends_with("youtu.be") {
            Some(parsed.path().trim_start_matches('/').to_string())
        } else {
            None
        };

        match video_id {
            Some(id) => format!("https://www.youtube.com/embed/{}", id),
            None => self.youtube_url.clone(),
        }
    }
}

//=========================================================================================
// Enrollments
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "dropped" => Ok(EnrollmentStatus::Dropped),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Payment metadata recorded on an enrollment that was paid for.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub status: PaymentStatus,
    pub amount: Decimal,
    /// The gateway's transaction identifier.
    pub payment_id: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move an enrollment from {from} to {to}")]
pub struct InvalidTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub learner_id: Uuid,
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payment: Option<PaymentDetails>,
}

impl Enrollment {
    /// Moves the enrollment to `target`.
    ///
    /// Only `active -> completed` and `active -> dropped` change anything; asking for the
    /// status the enrollment already has is a no-op. Returns whether the record changed.
    pub fn transition_to(
        &mut self,
        target: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, InvalidTransition> {
        use EnrollmentStatus::*;
        match (self.status, target) {
            (from, to) if from == to => Ok(false),
            (Active, Completed) => {
                self.status = Completed;
                if self.completed_at.is_none() {
                    self.completed_at = Some(now);
                }
                Ok(true)
            }
            (Active, Dropped) => {
                self.status = Dropped;
                Ok(true)
            }
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

/// An enrollment about to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEnrollment {
    pub learner_id: Uuid,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
    pub payment: Option<PaymentDetails>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EnrollmentStats {
    pub total: u32,
    pub active: u32,
    pub completed: u32,
    pub dropped: u32,
}

//=========================================================================================
// Catalog Filters
//=========================================================================================

/// Filters for listing courses. `None` means "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseFilter {
    pub text: Option<String>,
    pub level: Option<CourseLevel>,
    pub published: Option<bool>,
}

impl CourseFilter {
    /// The trimmed search text, or `None` when it is absent or blank.
    pub fn search_term(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    pub fn matches(&self, course: &Course) -> bool {
        if let Some(level) = self.level {
            if course.level != level {
                return false;
            }
        }
        if let Some(published) = self.published {
            if course.is_published != published {
                return false;
            }
        }
        match self.search_term() {
            None => true,
            Some(term) => {
                let needle = term.to_lowercase();
                [
                    &course.title,
                    &course.instructor,
                    &course.category,
                    &course.description,
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            }
        }
    }
}
