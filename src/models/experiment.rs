// src/models/experiment.rs

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        question::{PublicQuestion, QuestionInput, TeacherQuestion, UpdateQuestionInput},
        submission::{AnswerView, SubmissionProgress},
    },
};

/// Column list matching `Experiment`'s `FromRow` layout.
pub const EXPERIMENT_COLUMNS: &str =
    "id, title, description, permission, deadline, created_at, updated_at";

/// Represents the 'experiments' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(rename = "experiment_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// 0 = submissions blocked after the deadline, 1 = late submissions allowed.
    pub permission: i16,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub fn allows_late_submission(&self) -> bool {
        self.permission == 1
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }

    pub fn status(&self, now: DateTime<Utc>) -> ExperimentStatus {
        if self.is_expired(now) {
            ExperimentStatus::Expired
        } else {
            ExperimentStatus::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Active,
    Expired,
}

/// `status` query filter for experiment lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Expired,
}

/// Query parameters for experiment lists.
#[derive(Debug, Deserialize)]
pub struct ExperimentListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: StatusFilter,
}

/// Row of a teacher's experiment list.
#[derive(Debug, Serialize)]
pub struct ExperimentSummary {
    pub experiment_id: Uuid,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: ExperimentStatus,
}

/// Full experiment as seen by teachers.
#[derive(Debug, Serialize)]
pub struct TeacherExperimentDetail {
    pub experiment_id: Uuid,
    pub title: String,
    pub description: String,
    pub permission: i16,
    pub deadline: DateTime<Utc>,
    pub student_ids: Vec<i64>,
    pub questions: Vec<TeacherQuestion>,
    pub created_at: DateTime<Utc>,
}

/// Row of a student's experiment list.
#[derive(Debug, Serialize)]
pub struct StudentExperimentSummary {
    pub experiment_id: Uuid,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub status: ExperimentStatus,
    pub submission_status: SubmissionProgress,
}

/// Experiment as seen by a student, with the answers of the latest attempt.
#[derive(Debug, Serialize)]
pub struct StudentExperimentDetail {
    pub experiment_id: Uuid,
    pub title: String,
    pub description: String,
    pub permission: i16,
    pub deadline: DateTime<Utc>,
    pub status: ExperimentStatus,
    pub submission_status: SubmissionProgress,
    pub total_score: i32,
    pub questions: Vec<PublicQuestion>,
    pub answers: Vec<AnswerView>,
}

/// Accepts RFC 3339 as well as the short forms the web client sends
/// (`2024-05-01T12:00`, `2024-05-01 12:00`, `2024-05-01`), read as UTC.
pub fn parse_flexible_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn flexible_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flexible_datetime(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid time format: {}", raw)))
}

fn flexible_datetime_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_flexible_datetime(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time format: {}", raw))),
    }
}

/// DTO for creating an experiment.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExperimentRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 10000))]
    pub description: String,
    #[validate(range(min = 0, max = 1, message = "permission must be 0 or 1"))]
    pub permission: i16,
    #[serde(deserialize_with = "flexible_datetime")]
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub student_ids: Vec<i64>,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[validate(nested)]
    pub questions: Vec<QuestionInput>,
}

impl CreateExperimentRequest {
    /// Checks what the derive cannot express: at least one question, each well formed.
    pub fn check_questions(&self) -> Result<(), AppError> {
        if self.questions.is_empty() {
            return Err(AppError::BadRequest(
                "An experiment needs at least one question".to_string(),
            ));
        }
        for question in &self.questions {
            question.spec.check()?;
        }
        Ok(())
    }
}

/// DTO for updating an experiment. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateExperimentRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "flexible_datetime_opt")]
    pub deadline: Option<DateTime<Utc>>,
    #[validate(range(min = 0, max = 1, message = "permission must be 0 or 1"))]
    pub permission: Option<i16>,
    #[serde(default)]
    #[validate(nested)]
    pub questions: Vec<UpdateQuestionInput>,
    #[serde(default)]
    pub remove_questions: Vec<Uuid>,
}
