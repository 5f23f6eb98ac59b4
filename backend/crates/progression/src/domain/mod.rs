//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (UserActivity, PointEntry, ChallengeAttempt, ChallengeMotivation)
//! - Domain value objects (ChallengeLevel, Score, Grade)
//! - Domain services (scoring, level gating, learner levels)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod services;
pub mod value_objects;
