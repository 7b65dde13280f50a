// src/models/submission.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

use crate::models::question::QuestionType;

/// Columns selected whenever a full `ExperimentSubmission` is loaded.
pub const SUBMISSION_COLUMNS: &str =
    "id, experiment_id, student_id, status, total_score, submitted_at, created_at, updated_at";

/// Columns selected whenever a full `QuestionSubmission` is loaded.
pub const QUESTION_SUBMISSION_COLUMNS: &str = "id, submission_id, question_id, type, perfect_score, \
     answer, code, language, score, feedback, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Submitted,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::InProgress => "in_progress",
            SubmissionStatus::Submitted => "submitted",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SubmissionStatus::InProgress),
            "submitted" => Ok(SubmissionStatus::Submitted),
            other => Err(format!("unknown submission status '{}'", other)),
        }
    }
}

/// Programming languages the judge accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    Java,
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" => Ok(Language::Python),
            other => Err(format!("unsupported language '{}'", other)),
        }
    }
}

/// A student's answer to one question, tagged by question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnswerPayload {
    Choice { answer: String },
    Blank { answer: String },
    Code { code: String, language: Language },
}

impl AnswerPayload {
    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerPayload::Choice { .. } => QuestionType::Choice,
            AnswerPayload::Blank { .. } => QuestionType::Blank,
            AnswerPayload::Code { .. } => QuestionType::Code,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            AnswerPayload::Choice { answer } | AnswerPayload::Blank { answer } => Some(answer),
            AnswerPayload::Code { .. } => None,
        }
    }

    pub fn code(&self) -> Option<(&str, Language)> {
        match self {
            AnswerPayload::Code { code, language } => Some((code, *language)),
            _ => None,
        }
    }
}

/// One entry of the `answers` array in save/submit requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_id: Uuid,
    #[serde(flatten)]
    pub payload: AnswerPayload,
}

/// Body of the save-answer and submit-experiment endpoints.
#[derive(Debug, Deserialize)]
pub struct AnswersRequest {
    pub answers: Vec<AnswerInput>,
}

/// An attempt: one row of `experiment_submissions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSubmission {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub student_id: i64,
    pub status: SubmissionStatus,
    pub total_score: i32,
    /// Provisional until the attempt is finalized.
    pub submitted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExperimentSubmission {
    pub fn new_attempt(experiment_id: Uuid, student_id: i64, now: DateTime<Utc>) -> Self {
        ExperimentSubmission {
            id: Uuid::new_v4(),
            experiment_id,
            student_id,
            status: SubmissionStatus::InProgress,
            total_score: 0,
            submitted_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == SubmissionStatus::Submitted
    }
}

/// One row of `question_submissions`, at most one per (submission, question).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionSubmission {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub question_id: Uuid,
    /// Copy of the question's type at answer time.
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Copy of the question's score at answer time.
    pub perfect_score: i32,
    pub answer: AnswerPayload,
    pub score: i32,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionSubmission {
    /// Column values for `answer`, `code`, `language`; the fields of the other kind are NULL.
    pub fn answer_columns(&self) -> (Option<&str>, Option<&str>, Option<&'static str>) {
        match &self.answer {
            AnswerPayload::Choice { answer } | AnswerPayload::Blank { answer } => {
                (Some(answer.as_str()), None, None)
            }
            AnswerPayload::Code { code, language } => {
                (None, Some(code.as_str()), Some(language.as_str()))
            }
        }
    }
}

fn decode_err(column: &str, msg: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: msg.into(),
    }
}

impl<'r> FromRow<'r, PgRow> for ExperimentSubmission {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(ExperimentSubmission {
            id: row.try_get("id")?,
            experiment_id: row.try_get("experiment_id")?,
            student_id: row.try_get("student_id")?,
            status: status.parse().map_err(|e| decode_err("status", e))?,
            total_score: row.try_get("total_score")?,
            submitted_at: row.try_get("submitted_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for QuestionSubmission {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let type_text: String = row.try_get("type")?;
        let question_type: QuestionType =
            type_text.parse().map_err(|e| decode_err("type", e))?;

        let answer_text: Option<String> = row.try_get("answer")?;
        let answer = match question_type {
            QuestionType::Choice => AnswerPayload::Choice {
                answer: answer_text.unwrap_or_default(),
            },
            QuestionType::Blank => AnswerPayload::Blank {
                answer: answer_text.unwrap_or_default(),
            },
            QuestionType::Code => {
                let language: Option<String> = row.try_get("language")?;
                let language = language
                    .as_deref()
                    .unwrap_or("python")
                    .parse()
                    .map_err(|e| decode_err("language", e))?;
                AnswerPayload::Code {
                    code: row.try_get::<Option<String>, _>("code")?.unwrap_or_default(),
                    language,
                }
            }
        };

        Ok(QuestionSubmission {
            id: row.try_get("id")?,
            submission_id: row.try_get("submission_id")?,
            question_id: row.try_get("question_id")?,
            question_type,
            perfect_score: row.try_get("perfect_score")?,
            answer,
            score: row.try_get("score")?,
            feedback: row.try_get("feedback")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Query parameters for a student's submission history.
#[derive(Debug, Deserialize)]
pub struct SubmissionListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub experiment_id: Option<Uuid>,
}

/// Per-question line of a submission history entry.
#[derive(Debug, Serialize)]
pub struct SubmissionResultLine {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub score: i32,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// One attempt in a student's submission history.
#[derive(Debug, Serialize)]
pub struct SubmissionHistoryEntry {
    pub submission_id: Uuid,
    pub experiment_id: Uuid,
    pub experiment_title: String,
    pub total_score: i32,
    pub status: SubmissionStatus,
    pub submitted_at: DateTime<Utc>,
    pub results: Vec<SubmissionResultLine>,
}

/// Where a student stands on an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionProgress {
    NotStarted,
    InProgress,
    Submitted,
}

impl From<SubmissionStatus> for SubmissionProgress {
    fn from(status: SubmissionStatus) -> Self {
        match status {
            SubmissionStatus::InProgress => SubmissionProgress::InProgress,
            SubmissionStatus::Submitted => SubmissionProgress::Submitted,
        }
    }
}

/// A stored answer with its grading, flattened as `{question_id, type, answer | code+language, ...}`.
#[derive(Debug, Serialize)]
pub struct AnswerView {
    pub question_id: Uuid,
    #[serde(flatten)]
    pub answer: AnswerPayload,
    pub score: i32,
    pub perfect_score: i32,
    pub feedback: String,
    pub updated_at: DateTime<Utc>,
}

impl From<QuestionSubmission> for AnswerView {
    fn from(row: QuestionSubmission) -> Self {
        AnswerView {
            question_id: row.question_id,
            answer: row.answer,
            score: row.score,
            perfect_score: row.perfect_score,
            feedback: row.feedback,
            updated_at: row.updated_at,
        }
    }
}

/// A teacher's view of one student's work on an experiment.
#[derive(Debug, Serialize)]
pub struct StudentSubmissionView {
    pub experiment_id: Uuid,
    pub student_id: i64,
    pub status: SubmissionProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    pub answers: Vec<AnswerView>,
}
