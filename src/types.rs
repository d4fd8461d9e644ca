//! Sampled-type identifiers stored in record payloads.

use serde::{Deserialize, Serialize};

use crate::pool::{ApEntityId, PoolRemap};

/// Numeric method identifier scoped to one abc file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl MethodId {
    /// Returns the raw numeric id.
    pub const fn value(self) -> u32 {
        self.0
    }
}

/// What kind of entity a [`ProfileType`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProfileTypeKind {
    /// No profile data observed for this site.
    #[default]
    None,
    /// A source record (module/class container).
    Record,
    /// A hidden class (object shape).
    Class,
    /// A method target.
    Method,
    /// A prototype object.
    Prototype,
}

/// A tagged value identifying one sampled entity.
///
/// `abc_id` is meaningful only when the file header carries the
/// `PROFILE_TYPE_WITH_ABC_ID` capability; in single-file mode the abc
/// association is implicit and the field stays `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProfileType {
    /// Entity kind; `None` means "no profile data".
    pub kind: ProfileTypeKind,
    /// Entity id within its abc file (class id, method id, ...).
    pub id: u32,
    /// Which abc file the entity belongs to, when qualified.
    pub abc_id: Option<ApEntityId>,
}

impl ProfileType {
    /// The "no profile data" value.
    pub const fn none() -> Self {
        Self {
            kind: ProfileTypeKind::None,
            id: 0,
            abc_id: None,
        }
    }

    /// Builds a qualified type value.
    pub const fn new(kind: ProfileTypeKind, id: u32, abc_id: Option<ApEntityId>) -> Self {
        Self { kind, id, abc_id }
    }

    /// Whether this value carries no profile data.
    pub fn is_none(&self) -> bool {
        self.kind == ProfileTypeKind::None
    }

    /// Translates the abc qualifier through a pool remap. No-op for
    /// unqualified values.
    pub fn remap_abc_id(&mut self, remap: &PoolRemap) {
        if let Some(abc_id) = self.abc_id {
            self.abc_id = Some(remap.resolve(abc_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_default_and_unqualified() {
        let t = ProfileType::default();
        assert!(t.is_none());
        assert_eq!(t, ProfileType::none());
        assert!(t.abc_id.is_none());
    }

    #[test]
    fn remap_leaves_unqualified_types_alone() {
        let mut t = ProfileType::new(ProfileTypeKind::Class, 7, None);
        t.remap_abc_id(&PoolRemap::default());
        assert_eq!(t.abc_id, None);
    }
}
