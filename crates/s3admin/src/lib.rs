//! Authentication and session core of the s3admin storage console.

pub mod api;
pub mod auth;
pub mod settings;
