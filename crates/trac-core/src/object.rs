// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::tenant::TenantCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Closed set of object kinds (spec §3.1). An object's type is fixed at
/// creation and never changes across its version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Data,
    Model,
    Flow,
    Job,
    File,
    Storage,
    Schema,
    Config,
    Resource,
    Custom,
}

impl ObjectType {
    /// All variants, in declaration order.
    pub const ALL: &'static [ObjectType] = &[
        Self::Data,
        Self::Model,
        Self::Flow,
        Self::Job,
        Self::File,
        Self::Storage,
        Self::Schema,
        Self::Config,
        Self::Resource,
        Self::Custom,
    ];

    /// Types a *public* write may target per spec §6's "Metadata API
    /// surface" and §9's first Open Question: the public-write permission
    /// list is `FLOW, CUSTOM` only; everything else is trusted-write-only.
    #[must_use]
    pub fn is_public_writable(self) -> bool {
        matches!(self, Self::Flow | Self::Custom)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Data => "DATA",
            Self::Model => "MODEL",
            Self::Flow => "FLOW",
            Self::Job => "JOB",
            Self::File => "FILE",
            Self::Storage => "STORAGE",
            Self::Schema => "SCHEMA",
            Self::Config => "CONFIG",
            Self::Resource => "RESOURCE",
            Self::Custom => "CUSTOM",
        };
        write!(f, "{s}")
    }
}

/// A 128-bit object identifier, unique within `(tenant, object_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a specific `(tenant, object version, tag version)`
/// coordinate, returned by every write operation in spec §4.2. Every
/// object lives within exactly one tenant (spec §3.1's tenant-scoping
/// requirement), so the header carries it rather than leaving it implicit
/// in whatever connection or session produced the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHeader {
    pub tenant: TenantCode,
    pub object_type: ObjectType,
    pub object_id: ObjectId,
    pub object_version: u32,
    pub tag_version: u32,
}

impl ObjectHeader {
    #[must_use]
    pub fn first_version(tenant: TenantCode, object_type: ObjectType, object_id: ObjectId) -> Self {
        Self {
            tenant,
            object_type,
            object_id,
            object_version: 1,
            tag_version: 1,
        }
    }

    /// The header one tag-version ahead of this one, same object version.
    #[must_use]
    pub fn next_tag(&self) -> Self {
        Self {
            tag_version: self.tag_version + 1,
            ..self.clone()
        }
    }

    /// The header one object-version ahead of this one, tag reset to 1.
    #[must_use]
    pub fn next_version(&self) -> Self {
        Self {
            object_version: self.object_version + 1,
            tag_version: 1,
            ..self.clone()
        }
    }
}

/// The immutable, type-specific payload carried by an object version.
///
/// Spec §3.1 treats this as opaque except for a handful of trusted
/// attributes recorded alongside it; TRAC core does not interpret the
/// payload's internal schema, so it is stored as a tagged JSON document
/// keyed by the object's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub object_type: ObjectType,
    pub payload: serde_json::Value,
}

impl ObjectDefinition {
    #[must_use]
    pub fn new(object_type: ObjectType, payload: serde_json::Value) -> Self {
        Self {
            object_type,
            payload,
        }
    }

    /// A terminal, bodyless version — spec §3.1 invariant 5: "deleting a
    /// config entry is modeled as a terminal version with no definition
    /// body".
    #[must_use]
    pub fn tombstone(object_type: ObjectType) -> Self {
        Self {
            object_type,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_null()
    }
}
