//! Client for the external code judge.
//!
//! The judge runs submitted source code against a question's test cases and reports a pass
//! rate. Every failure here is recoverable: the scoring engine turns a `JudgeError` into a
//! zero score with explanatory feedback.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::models::question::TestCase;

/// Upper bound on one HTTP round trip to the judge. The execution limit sent in the
/// request body is separate and much smaller.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur while having code evaluated.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// The stored test-case list could not be parsed.
    #[error("invalid test cases format")]
    InvalidTestCases,

    /// The judge could not be reached.
    #[error("judge unreachable: {0}")]
    Transport(String),

    /// The judge answered with a non-200 status.
    #[error("evaluation service returned status: {0}")]
    Status(u16),

    /// The judge's response body was not a valid evaluation report.
    #[error("invalid evaluation response: {0}")]
    Decode(String),
}

/// Body of `POST {JUDGE_URL}/evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    /// Execution limit per test case, in seconds.
    pub time_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub time_taken: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluationSummary {
    pub total_cases: u32,
    pub passed_cases: u32,
    /// Percentage in 0..=100.
    #[serde(rename = "pass_rate_percent")]
    pub pass_rate: f64,
    #[serde(rename = "overall_status", default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvaluationResponse {
    #[serde(default)]
    pub case_results: Vec<CaseResult>,
    pub summary: EvaluationSummary,
}

/// Something that can evaluate source code against test cases.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, JudgeError>;
}

/// Judge reached over HTTP.
pub struct HttpJudge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpJudge {
    pub fn new(base_url: &str) -> Result<Self, JudgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Judge for HttpJudge {
    #[instrument(skip(self, request), fields(language = %request.language, cases = request.test_cases.len()))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, JudgeError> {
        tracing::debug!("Sending code to judge at {}", self.base_url);

        let response = self
            .client
            .post(format!("{}/evaluate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| JudgeError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(JudgeError::Status(status));
        }

        response
            .json::<EvaluationResponse>()
            .await
            .map_err(|e| JudgeError::Decode(e.to_string()))
    }
}

/// Judge that answers every request with the same canned outcome.
/// Used by tests and for running the service without a judge.
pub struct StaticJudge {
    outcome: Result<(u32, u32), String>,
    call_count: AtomicU32,
    last_request: Mutex<Option<EvaluationRequest>>,
}

impl StaticJudge {
    /// Reports `passed` of `total` cases passing.
    pub fn passing(passed: u32, total: u32) -> Self {
        Self {
            outcome: Ok((passed, total)),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Fails every call with a transport error carrying `message`.
    pub fn unreachable(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<EvaluationRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Judge for StaticJudge {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, JudgeError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        match &self.outcome {
            Ok((passed, total)) => {
                let pass_rate = if *total == 0 {
                    0.0
                } else {
                    f64::from(*passed) * 100.0 / f64::from(*total)
                };
                Ok(EvaluationResponse {
                    case_results: vec![],
                    summary: EvaluationSummary {
                        total_cases: *total,
                        passed_cases: *passed,
                        pass_rate,
                        status: if passed == total { "Accepted" } else { "Wrong Answer" }
                            .to_string(),
                    },
                })
            }
            Err(message) => Err(JudgeError::Transport(message.clone())),
        }
    }
}
