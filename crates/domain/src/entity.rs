//! Identity and version bookkeeping shared by every persisted entity.

use chrono::{DateTime, Utc};
use event_store::Version;
use serde::{Deserialize, Serialize};

/// Identity, timestamps and row version of an entity.
///
/// A fresh entity starts at `Version::first()` with no `updated_at`. Every
/// state-changing mutation calls [`EntityMeta::touch`] exactly once, so the
/// version never skips and never goes backwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta<Id> {
    id: Id,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
    version: Version,
}

impl<Id: Copy> EntityMeta<Id> {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            updated_at: None,
            version: Version::first(),
        }
    }

    /// Rebuilds metadata read back from storage.
    pub fn restore(
        id: Id,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
        version: Version,
    ) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            version,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Records a mutation: stamps `updated_at` and advances the version.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
        self.version = self.version.next();
    }
}

/// Entities addressable by a stable identifier.
pub trait HasIdentity {
    type Id: Copy + Eq + std::fmt::Display;

    fn id(&self) -> Self::Id;
}

/// Entities carrying an optimistic-concurrency version.
pub trait HasVersion {
    fn version(&self) -> Version;

    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_starts_at_first_version() {
        let meta = EntityMeta::new(7_u32);
        assert_eq!(meta.id(), 7);
        assert_eq!(meta.version(), Version::first());
        assert!(meta.updated_at().is_none());
    }

    #[test]
    fn test_touch_advances_by_one() {
        let mut meta = EntityMeta::new(7_u32);
        let created = meta.created_at();

        meta.touch();
        meta.touch();

        assert_eq!(meta.version(), Version::new(3));
        assert!(meta.updated_at().is_some());
        assert_eq!(meta.created_at(), created);
    }
}
