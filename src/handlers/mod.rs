// src/handlers/mod.rs

pub mod auth;
pub mod experiments;
pub mod groups;
pub mod notifications;
pub mod student;
