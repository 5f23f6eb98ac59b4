//! Common ID Types
//!
//! Type-safe ID wrappers for domain entities.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// Generic typed ID wrapper
///
/// Usage:
/// ```
/// use kernel::id::{Id, markers};
/// type UserId = Id<markers::User>;
/// ```
pub struct Id<T> {
    value: Uuid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Create a new random ID (UUID v4)
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self {
            value: uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.value
    }

    /// Convert to UUID
    pub fn into_uuid(self) -> Uuid {
        self.value
    }
}

// Manual impls: the marker type never needs to satisfy these bounds itself.
impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.value)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self::from_uuid)
    }
}

impl<T> From<Uuid> for Id<T> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<T> From<Id<T>> for Uuid {
    fn from(id: Id<T>) -> Self {
        id.value
    }
}

/// Marker types for different entity IDs
pub mod markers {
    /// Marker for Tenant IDs (school / organisation)
    pub struct Tenant;

    /// Marker for User IDs
    pub struct User;

    /// Marker for Course IDs
    pub struct Course;

    /// Marker for Activity IDs
    pub struct Activity;

    /// Marker for Badge IDs
    pub struct Badge;

    /// Marker for FinalChallenge IDs
    pub struct FinalChallenge;

    /// Marker for ChallengeAttempt IDs
    pub struct ChallengeAttempt;

    /// Marker for ChallengeMotivation IDs
    pub struct Motivation;

    /// Marker for ledger PointEntry IDs
    pub struct PointEntry;
}

/// Type aliases for common IDs
pub type TenantId = Id<markers::Tenant>;
pub type UserId = Id<markers::User>;
pub type CourseId = Id<markers::Course>;
pub type ActivityId = Id<markers::Activity>;
pub type BadgeId = Id<markers::Badge>;
pub type ChallengeId = Id<markers::FinalChallenge>;
pub type AttemptId = Id<markers::ChallengeAttempt>;
pub type MotivationId = Id<markers::Motivation>;
pub type PointEntryId = Id<markers::PointEntry>;
