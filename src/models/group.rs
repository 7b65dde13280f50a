// src/models/group.rs

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Group with its member ids, as returned by the group endpoints.
#[derive(Debug, Serialize)]
pub struct GroupResponse {
    pub group_id: i64,
    pub group_name: String,
    pub student_count: usize,
    pub student_ids: Vec<i64>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// DTO for creating a student group.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub group_name: String,
    pub student_ids: Vec<i64>,
}

/// DTO for updating a group. At least one field must be present.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 100))]
    pub group_name: Option<String>,
    pub student_ids: Option<Vec<i64>>,
}
