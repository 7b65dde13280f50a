use crate::config::Config;
use crate::grading::Grader;
use axum::extract::FromRef;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Submission workflow, wired to the submission store and the judge.
    pub grader: Grader,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Grader {
    fn from_ref(state: &AppState) -> Self {
        state.grader.clone()
    }
}
