//! Admission intake: multi-visit registration drafts, duplicate screening,
//! dual-key resume security and expiry-driven cleanup.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
