// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::object::{ObjectDefinition, ObjectHeader};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fully materialized tag: the header coordinate, the immutable
/// definition of the object version it belongs to, and the attribute map
/// carried by this specific tag version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub header: ObjectHeader,
    pub definition: ObjectDefinition,
    pub attrs: BTreeMap<String, Value>,
}

impl Tag {
    #[must_use]
    pub fn new(header: ObjectHeader, definition: ObjectDefinition) -> Self {
        Self {
            header,
            definition,
            attrs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attrs(mut self, attrs: BTreeMap<String, Value>) -> Self {
        self.attrs = attrs;
        self
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectId, ObjectType};
    use crate::tenant::TenantCode;
    use crate::value::Primitive;

    #[test]
    fn attr_lookup() {
        let tenant = TenantCode::new("acme").unwrap();
        let header = ObjectHeader::first_version(tenant, ObjectType::Data, ObjectId::new_random());
        let def = ObjectDefinition::new(ObjectType::Data, serde_json::json!({"schema": "v1"}));
        let mut attrs = BTreeMap::new();
        attrs.insert(
            "owner".to_string(),
            Value::Scalar(Primitive::String("alice".into())),
        );
        let tag = Tag::new(header, def).with_attrs(attrs);
        assert_eq!(
            tag.attr("owner"),
            Some(&Value::Scalar(Primitive::String("alice".into())))
        );
        assert_eq!(tag.attr("missing"), None);
    }
}
