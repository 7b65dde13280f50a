// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Judge service location used when `JUDGE_URL` is not set.
pub const DEFAULT_JUDGE_URL: &str = "http://localhost:8080";

/// Execution time limit (seconds) sent to the judge with every evaluation.
pub const JUDGE_TIME_LIMIT_SECS: u32 = 2;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub judge_url: String,
    pub port: u16,
    pub teacher_username: Option<String>,
    pub teacher_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let judge_url = env::var("JUDGE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_JUDGE_URL.to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            judge_url,
            port,
            teacher_username: env::var("TEACHER_USERNAME").ok(),
            teacher_password: env::var("TEACHER_PASSWORD").ok(),
        }
    }
}
