//! Application Layer - Use Cases
//!
//! This layer orchestrates domain logic and infrastructure. Each mutating
//! use case runs in one unit of work: it checks every precondition, writes,
//! then commits. An error drops the unit of work and nothing persists.

pub mod activity_progress;
pub mod badge_awarder;
pub mod challenge_progression;
pub mod config;
pub mod motivation;
pub mod point_ledger;
