// src/models/mod.rs

pub mod experiment;
pub mod group;
pub mod notification;
pub mod question;
pub mod submission;
pub mod user;
