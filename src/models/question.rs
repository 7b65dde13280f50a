// src/models/question.rs

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Columns selected whenever a full `Question` is loaded.
pub const QUESTION_COLUMNS: &str = "id, experiment_id, position, type, content, options, \
     correct_answer, test_cases, score, image_url, explanation";

/// Question type discriminator, stored as text in `questions.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Choice,
    Blank,
    Code,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Choice => "choice",
            QuestionType::Blank => "blank",
            QuestionType::Code => "code",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "choice" => Ok(QuestionType::Choice),
            "blank" => Ok(QuestionType::Blank),
            "code" => Ok(QuestionType::Code),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

/// One judge test case. Input and expected output are passed through to the judge untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: serde_json::Value,
    pub expected_output: serde_json::Value,
}

/// Type-specific payload of a question.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionKind {
    Choice {
        options: Vec<String>,
        correct_answer: String,
    },
    Blank {
        correct_answer: String,
    },
    /// `test_cases` is the serialized list as stored; it is parsed at scoring time.
    Code { test_cases: String },
}

impl QuestionKind {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionKind::Choice { .. } => QuestionType::Choice,
            QuestionKind::Blank { .. } => QuestionType::Blank,
            QuestionKind::Code { .. } => QuestionType::Code,
        }
    }

    pub fn correct_answer(&self) -> Option<&str> {
        match self {
            QuestionKind::Choice { correct_answer, .. } | QuestionKind::Blank { correct_answer } => {
                Some(correct_answer)
            }
            QuestionKind::Code { .. } => None,
        }
    }
}

/// A graded question belonging to one experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub position: i32,
    pub content: String,
    /// Maximum score obtainable for this question.
    pub score: i32,
    pub kind: QuestionKind,
    pub image_url: Option<String>,
    pub explanation: Option<String>,
}

impl Question {
    pub fn question_type(&self) -> QuestionType {
        self.kind.question_type()
    }
}

fn decode_err(column: &str, msg: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: msg.into(),
    }
}

impl<'r> FromRow<'r, PgRow> for Question {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let type_text: String = row.try_get("type")?;
        let question_type: QuestionType =
            type_text.parse().map_err(|e| decode_err("type", e))?;

        let correct_answer: Option<String> = row.try_get("correct_answer")?;
        let kind = match question_type {
            QuestionType::Choice => {
                let options: Option<Json<Vec<String>>> = row.try_get("options")?;
                QuestionKind::Choice {
                    options: options.map(|o| o.0).unwrap_or_default(),
                    correct_answer: correct_answer.unwrap_or_default(),
                }
            }
            QuestionType::Blank => QuestionKind::Blank {
                correct_answer: correct_answer.unwrap_or_default(),
            },
            QuestionType::Code => QuestionKind::Code {
                test_cases: row
                    .try_get::<Option<String>, _>("test_cases")?
                    .unwrap_or_default(),
            },
        };

        Ok(Question {
            id: row.try_get("id")?,
            experiment_id: row.try_get("experiment_id")?,
            position: row.try_get("position")?,
            content: row.try_get("content")?,
            score: row.try_get("score")?,
            kind,
            image_url: row.try_get("image_url")?,
            explanation: row.try_get("explanation")?,
        })
    }
}

/// Column values for one question, ready to bind into an INSERT or UPDATE.
#[derive(Debug)]
pub struct QuestionColumns {
    pub question_type: QuestionType,
    pub options: Option<Json<Vec<String>>>,
    pub correct_answer: Option<String>,
    pub test_cases: Option<String>,
}

/// Type-specific part of a question in create requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuestionSpec {
    Choice {
        options: Vec<String>,
        correct_answer: String,
    },
    Blank {
        correct_answer: String,
    },
    Code {
        test_cases: Vec<TestCase>,
    },
}

impl QuestionSpec {
    pub fn check(&self) -> Result<(), AppError> {
        match self {
            QuestionSpec::Choice {
                options,
                correct_answer,
            } => {
                if options.is_empty() {
                    return Err(AppError::BadRequest(
                        "Choice questions need at least one option".to_string(),
                    ));
                }
                if options.iter().any(|o| o.len() > 500) {
                    return Err(AppError::BadRequest("Option too long".to_string()));
                }
                if correct_answer.is_empty() {
                    return Err(AppError::BadRequest(
                        "Choice questions need a correct answer".to_string(),
                    ));
                }
            }
            QuestionSpec::Blank { correct_answer } => {
                if correct_answer.is_empty() {
                    return Err(AppError::BadRequest(
                        "Blank questions need a correct answer".to_string(),
                    ));
                }
            }
            QuestionSpec::Code { test_cases } => {
                if test_cases.is_empty() {
                    return Err(AppError::BadRequest(
                        "Code questions need at least one test case".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn into_columns(self) -> Result<QuestionColumns, AppError> {
        Ok(match self {
            QuestionSpec::Choice {
                options,
                correct_answer,
            } => QuestionColumns {
                question_type: QuestionType::Choice,
                options: Some(Json(options)),
                correct_answer: Some(correct_answer),
                test_cases: None,
            },
            QuestionSpec::Blank { correct_answer } => QuestionColumns {
                question_type: QuestionType::Blank,
                options: None,
                correct_answer: Some(correct_answer),
                test_cases: None,
            },
            QuestionSpec::Code { test_cases } => QuestionColumns {
                question_type: QuestionType::Code,
                options: None,
                correct_answer: None,
                test_cases: Some(serde_json::to_string(&test_cases)?),
            },
        })
    }
}

/// DTO for a new question inside experiment create/update requests.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    #[validate(range(min = 1, max = 1000))]
    pub score: i32,
    #[validate(length(max = 500))]
    pub image_url: Option<String>,
    #[validate(length(max = 5000))]
    pub explanation: Option<String>,
    #[serde(flatten)]
    pub spec: QuestionSpec,
}

/// DTO for a question entry in an experiment update.
/// With `question_id` the listed fields of that question are changed,
/// without it a new question is appended.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateQuestionInput {
    pub question_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub question_type: Option<QuestionType>,
    #[validate(length(min = 1, max = 5000))]
    pub content: Option<String>,
    pub options: Option<Vec<String>>,
    pub correct_answer: Option<String>,
    pub test_cases: Option<Vec<TestCase>>,
    #[validate(range(min = 1, max = 1000))]
    pub score: Option<i32>,
    #[validate(length(max = 500))]
    pub image_url: Option<String>,
    #[validate(length(max = 5000))]
    pub explanation: Option<String>,
}

impl UpdateQuestionInput {
    /// Builds a complete new question from an entry without `question_id`.
    pub fn into_new_question(self) -> Result<QuestionInput, AppError> {
        let missing = |field: &str| AppError::BadRequest(format!("New question is missing '{}'", field));

        let spec = match self.question_type.ok_or_else(|| missing("type"))? {
            QuestionType::Choice => QuestionSpec::Choice {
                options: self.options.ok_or_else(|| missing("options"))?,
                correct_answer: self.correct_answer.ok_or_else(|| missing("correct_answer"))?,
            },
            QuestionType::Blank => QuestionSpec::Blank {
                correct_answer: self.correct_answer.ok_or_else(|| missing("correct_answer"))?,
            },
            QuestionType::Code => QuestionSpec::Code {
                test_cases: self.test_cases.ok_or_else(|| missing("test_cases"))?,
            },
        };

        Ok(QuestionInput {
            content: self.content.ok_or_else(|| missing("content"))?,
            score: self.score.ok_or_else(|| missing("score"))?,
            image_url: self.image_url,
            explanation: self.explanation,
            spec,
        })
    }
}

impl UpdateQuestionInput {
    /// Applies this entry to an existing question. Fields left out keep their current
    /// value; changing `type` requires the new type's fields.
    pub fn merge_into(self, existing: &Question) -> Result<QuestionInput, AppError> {
        let missing = |field: &str| {
            AppError::BadRequest(format!(
                "Question {} needs '{}' for its new type",
                existing.id, field
            ))
        };
        let current_answer = existing.kind.correct_answer().map(str::to_string);

        let spec = match self.question_type.unwrap_or(existing.question_type()) {
            QuestionType::Choice => {
                let current_options = match &existing.kind {
                    QuestionKind::Choice { options, .. } => Some(options.clone()),
                    _ => None,
                };
                QuestionSpec::Choice {
                    options: self
                        .options
                        .or(current_options)
                        .ok_or_else(|| missing("options"))?,
                    correct_answer: self
                        .correct_answer
                        .or(current_answer)
                        .ok_or_else(|| missing("correct_answer"))?,
                }
            }
            QuestionType::Blank => QuestionSpec::Blank {
                correct_answer: self
                    .correct_answer
                    .or(current_answer)
                    .ok_or_else(|| missing("correct_answer"))?,
            },
            QuestionType::Code => {
                let test_cases = match (self.test_cases, &existing.kind) {
                    (Some(cases), _) => cases,
                    (None, QuestionKind::Code { test_cases }) => serde_json::from_str(test_cases)
                        .map_err(|e| AppError::InternalServerError(e.to_string()))?,
                    (None, _) => return Err(missing("test_cases")),
                };
                QuestionSpec::Code { test_cases }
            }
        };

        Ok(QuestionInput {
            content: self.content.unwrap_or_else(|| existing.content.clone()),
            score: self.score.unwrap_or(existing.score),
            image_url: self.image_url.or_else(|| existing.image_url.clone()),
            explanation: self.explanation.or_else(|| existing.explanation.clone()),
            spec,
        })
    }
}

/// Question as shown to students: no correct answer or test cases until the deadline passes.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl PublicQuestion {
    pub fn from_question(q: &Question, reveal: bool) -> Self {
        let options = match &q.kind {
            QuestionKind::Choice { options, .. } => Some(options.clone()),
            _ => None,
        };
        PublicQuestion {
            question_id: q.id,
            question_type: q.question_type(),
            content: q.content.clone(),
            score: q.score,
            options,
            image_url: q.image_url.clone(),
            correct_answer: if reveal {
                q.kind.correct_answer().map(str::to_string)
            } else {
                None
            },
            explanation: if reveal { q.explanation.clone() } else { None },
        }
    }
}

/// Question as shown to teachers: everything, test cases decoded when well-formed.
#[derive(Debug, Serialize)]
pub struct TeacherQuestion {
    pub question_id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_cases: Option<Vec<TestCase>>,
    pub image_url: Option<String>,
    pub explanation: Option<String>,
}

impl From<&Question> for TeacherQuestion {
    fn from(q: &Question) -> Self {
        let (options, test_cases) = match &q.kind {
            QuestionKind::Choice { options, .. } => (Some(options.clone()), None),
            QuestionKind::Blank { .. } => (None, None),
            QuestionKind::Code { test_cases } => (None, serde_json::from_str(test_cases).ok()),
        };
        TeacherQuestion {
            question_id: q.id,
            question_type: q.question_type(),
            content: q.content.clone(),
            score: q.score,
            options,
            correct_answer: q.kind.correct_answer().map(str::to_string),
            test_cases,
            image_url: q.image_url.clone(),
            explanation: q.explanation.clone(),
        }
    }
}
