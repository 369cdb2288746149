// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::object::{ObjectId, ObjectType};
use serde::{Deserialize, Serialize};

/// Which object/tag version a [`Selector`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// A specific, fixed version number.
    Fixed(u32),
    /// The current "latest" pointer, resolved at read time.
    Latest,
}

/// A reference to a specific tag: `(type, id, version, tag)` with optional
/// "latest" wildcards on either version axis, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub object_type: ObjectType,
    pub object_id: ObjectId,
    pub object_version: VersionSelector,
    pub tag_version: VersionSelector,
}

impl Selector {
    #[must_use]
    pub fn exact(object_type: ObjectType, object_id: ObjectId, object_version: u32, tag_version: u32) -> Self {
        Self {
            object_type,
            object_id,
            object_version: VersionSelector::Fixed(object_version),
            tag_version: VersionSelector::Fixed(tag_version),
        }
    }

    #[must_use]
    pub fn latest(object_type: ObjectType, object_id: ObjectId) -> Self {
        Self {
            object_type,
            object_id,
            object_version: VersionSelector::Latest,
            tag_version: VersionSelector::Latest,
        }
    }

    #[must_use]
    pub fn latest_tag(object_type: ObjectType, object_id: ObjectId, object_version: u32) -> Self {
        Self {
            object_type,
            object_id,
            object_version: VersionSelector::Fixed(object_version),
            tag_version: VersionSelector::Latest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_selector_wildcards_both_axes() {
        let id = ObjectId::new_random();
        let s = Selector::latest(ObjectType::Data, id);
        assert_eq!(s.object_version, VersionSelector::Latest);
        assert_eq!(s.tag_version, VersionSelector::Latest);
    }
}
