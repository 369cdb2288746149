// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Object/version/tag data model shared by every TRAC metadata-store
//! crate: the versioned, tenanted, tag-attributed object graph described
//! in the core design's data model section.

pub mod object;
pub mod selector;
pub mod tag;
pub mod tenant;
pub mod value;

pub use object::{ObjectDefinition, ObjectHeader, ObjectId, ObjectType};
pub use selector::{Selector, VersionSelector};
pub use tag::Tag;
pub use tenant::{Tenant, TenantCode};
pub use value::{is_reserved_attr_key, is_valid_attr_key, Primitive, PrimitiveType, TypeDescriptor, Value};

use serde::{Deserialize, Serialize};

/// A reserved `(object_type, object_id)` with no definition yet, consumed
/// by a subsequent "save preallocated" write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preallocation {
    pub object_type: ObjectType,
    pub object_id: ObjectId,
}

impl Preallocation {
    #[must_use]
    pub fn new(object_type: ObjectType, object_id: ObjectId) -> Self {
        Self {
            object_type,
            object_id,
        }
    }
}
