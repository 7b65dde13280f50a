// src/models/notification.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Represents the 'notifications' table in the database.
/// Recipients live in `notification_users`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub experiment_id: Option<Uuid>,
    /// Highlighted announcement.
    pub is_important: bool,
    pub created_at: DateTime<Utc>,
}

/// DTO for a teacher publishing a notification.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
    pub experiment_id: Option<Uuid>,
    #[serde(default)]
    pub is_important: bool,
    /// Recipient user ids.
    #[serde(default)]
    pub users: Vec<i64>,
}

/// Query parameters for notification lists.
#[derive(Debug, Deserialize)]
pub struct NotificationListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub experiment_id: Option<Uuid>,
    pub is_important: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
}
