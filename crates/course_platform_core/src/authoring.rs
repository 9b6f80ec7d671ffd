//! crates/course_platform_core/src/authoring.rs
//!
//! Author-submitted course and video payloads, and the rules a course must satisfy
//! before it is saved.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::{hash_map::Entry, BTreeMap};
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::domain::{Course, CourseLevel, VideoId, ALLOWED_DURATIONS_WEEKS};

const SHORT_DESCRIPTION_MAX: usize = 300;

fn default_instructor() -> String {
    "Your Name".to_string()
}

/// The editable fields of a course, plus its nested video changes.
#[derive(Debug, Clone, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CourseInput {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub what_youll_learn: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default = "default_instructor")]
    #[validate(length(max = 120))]
    pub instructor: String,
    #[serde(default)]
    pub instructor_bio: String,
    #[serde(default)]
    pub level: CourseLevel,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub category: String,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub is_featured: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_weeks: Option<u32>,
    #[serde(default)]
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    pub thumbnail: Option<String>,
    #[validate(url)]
    pub promo_video: Option<String>,
    /// Checked entry by entry in `validate_course`; entries flagged `delete` are skipped.
    #[serde(default)]
    pub videos: Vec<VideoInput>,
}

/// One entry of the nested video list. Without an `id` it adds a video; with an `id`
/// it edits that video, or removes it when `delete` is set.
#[derive(Debug, Clone, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VideoInput {
    pub id: Option<VideoId>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(custom(function = "validate_youtube_url"))]
    pub youtube_url: String,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub order: i32,
    #[serde(default)]
    pub delete: bool,
}

impl CourseInput {
    /// The short description as it will be stored.
    pub fn trimmed_short_description(&self) -> &str {
        self.short_description.trim()
    }

    /// Videos that survive the save, i.e. not flagged for deletion.
    pub fn kept_videos(&self) -> impl Iterator<Item = &VideoInput> {
        self.videos.iter().filter(|video| !video.delete)
    }
}

fn validate_youtube_url(url: &str) -> Result<(), ValidationError> {
    let host_ok = url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .map(|host| host.ends_with("youtube.com") || host.ends_with("youtu.be"))
        .unwrap_or(false);
    if host_ok {
        Ok(())
    } else {
        Err(error("youtube_url", "Please enter a valid YouTube URL"))
    }
}

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// Files per-entry errors under `videos`, keyed by position in the submitted list.
fn add_video_errors(errors: &mut ValidationErrors, items: BTreeMap<usize, Box<ValidationErrors>>) {
    if items.is_empty() {
        return;
    }
    match errors.errors_mut().entry(Cow::Borrowed("videos")) {
        Entry::Occupied(mut slot) => {
            if let ValidationErrorsKind::List(existing) = slot.get_mut() {
                existing.extend(items);
            } else {
                slot.insert(ValidationErrorsKind::List(items));
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(ValidationErrorsKind::List(items));
        }
    }
}

/// Checks that every video the input edits or deletes belongs to the course.
///
/// `existing` holds the ids of the course's stored videos.
pub fn check_video_references(
    input: &CourseInput,
    existing: &[VideoId],
) -> Result<(), ValidationErrors> {
    let mut unknown = BTreeMap::new();
    for (index, video) in input.videos.iter().enumerate() {
        let Some(id) = video.id else { continue };
        if !existing.contains(&id) {
            let mut entry = ValidationErrors::new();
            entry.add("id", error("unknown_video", "This video does not belong to the course."));
            unknown.insert(index, Box::new(entry));
        }
    }

    let mut errors = ValidationErrors::new();
    add_video_errors(&mut errors, unknown);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks `input` against the field rules and the cross-field rules.
///
/// `current` is the stored course when editing; `today` anchors the start-date rule.
pub fn validate_course(
    input: &CourseInput,
    current: Option<&Course>,
    today: NaiveDate,
) -> Result<(), ValidationErrors> {
    let mut errors = match input.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(errors) => errors,
    };

    let video_errors: BTreeMap<usize, Box<ValidationErrors>> = input
        .videos
        .iter()
        .enumerate()
        .filter(|(_, video)| !video.delete)
        .filter_map(|(index, video)| video.validate().err().map(|e| (index, Box::new(e))))
        .collect();
    add_video_errors(&mut errors, video_errors);

    if input.title.trim().is_empty() {
        errors.add("title", error("required", "Title is required."));
    }

    if input.trimmed_short_description().chars().count() > SHORT_DESCRIPTION_MAX {
        errors.add(
            "short_description",
            error("too_long", "Short description cannot exceed 300 characters."),
        );
    }

    if input.price < Decimal::ZERO {
        errors.add("price", error("negative", "Price cannot be negative."));
    }
    if input.price.normalize().scale() > 2 {
        errors.add("price", error("precision", "Price allows at most two decimal places."));
    }
    if let Some(discount) = input.discount_price {
        if discount < Decimal::ZERO {
            errors.add(
                "discount_price",
                error("negative", "Discount price cannot be negative."),
            );
        } else if discount >= input.price {
            errors.add(
                "discount_price",
                error(
                    "not_lower",
                    "Discount price must be lower than the regular price.",
                ),
            );
        }
        if discount.normalize().scale() > 2 {
            errors.add(
                "discount_price",
                error("precision", "Discount price allows at most two decimal places."),
            );
        }
    }

    let start_changed = current.is_none_or(|course| course.start_date != input.start_date);
    if let Some(start) = input.start_date {
        if start_changed && start < today {
            errors.add("start_date", error("in_past", "Start date cannot be in the past."));
        }
        if let Some(end) = input.end_date {
            if end < start {
                errors.add("end_date", error("before_start", "End date must be after start date."));
            }
        }
    }

    if let Some(weeks) = input.duration_weeks {
        if !ALLOWED_DURATIONS_WEEKS.contains(&weeks) {
            errors.add(
                "duration_weeks",
                error("unsupported", "Duration must be 4, 8, 12, 16, 24 or 52 weeks."),
            );
        }
    }

    let newly_published = input.is_published && !current.is_some_and(|c| c.is_published);
    if newly_published {
        check_publishable(input, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Fields a course must fill in the first time it is published.
fn check_publishable(input: &CourseInput, errors: &mut ValidationErrors) {
    let required: [(&'static str, bool); 7] = [
        ("short_description", input.trimmed_short_description().is_empty()),
        ("description", input.description.trim().is_empty()),
        ("what_youll_learn", input.what_youll_learn.trim().is_empty()),
        ("requirements", input.requirements.trim().is_empty()),
        ("instructor_bio", input.instructor_bio.trim().is_empty()),
        ("category", input.category.trim().is_empty()),
        (
            "thumbnail",
            input.thumbnail.as_deref().is_none_or(|t| t.trim().is_empty()),
        ),
    ];
    for (field, missing) in required {
        if missing {
            errors.add(
                field,
                error(
                    "required_to_publish",
                    "This field is required when publishing the course.",
                ),
            );
        }
    }
}
