// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Metadata store kernel (C2): versioned, tag-attributed object
//! persistence over a pluggable SQL dialect. One async method per
//! operation in the metadata API surface; every batch operation commits
//! or rolls back as a single transaction.

use serde_json::Value as Json;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use trac_core::{ObjectDefinition, ObjectHeader, ObjectId, ObjectType, Selector, Tag, TenantCode, Value, VersionSelector};
use trac_dialect::{adapter_for, DbErrorCode, DialectAdapter, SqlDialect};
use trac_error::{ErrorCode, TracError};
use trac_validate::validate_no_batch_duplicates;

/// Portable DDL for the core object/version/tag graph (spec §3.2). Uses
/// `INTEGER PRIMARY KEY` rowid-alias semantics, which the `sqlx::Any`
/// drivers this kernel targets all accept; a genuinely multi-vendor
/// deployment would instead run per-dialect migrations and keep this as
/// the reference shape (see DESIGN.md).
const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tenant (
        tenant_pk INTEGER PRIMARY KEY,
        tenant_code TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS object (
        object_pk INTEGER PRIMARY KEY,
        tenant_fk INTEGER NOT NULL,
        object_type TEXT NOT NULL,
        object_id TEXT NOT NULL,
        UNIQUE(tenant_fk, object_id)
    )",
    "CREATE TABLE IF NOT EXISTS object_version (
        object_version_pk INTEGER PRIMARY KEY,
        object_fk INTEGER NOT NULL,
        version INTEGER NOT NULL,
        definition TEXT NOT NULL,
        UNIQUE(object_fk, version)
    )",
    "CREATE TABLE IF NOT EXISTS tag_version (
        tag_version_pk INTEGER PRIMARY KEY,
        object_version_fk INTEGER NOT NULL,
        tag_version INTEGER NOT NULL,
        attrs_json TEXT NOT NULL,
        UNIQUE(object_version_fk, tag_version)
    )",
    "CREATE TABLE IF NOT EXISTS latest_version (
        object_fk INTEGER PRIMARY KEY,
        object_version_fk INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS latest_tag (
        object_version_fk INTEGER PRIMARY KEY,
        tag_version_fk INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS preallocation (
        object_fk INTEGER PRIMARY KEY
    )",
];

/// Wraps an `sqlx::AnyPool` plus the dialect adapter used to classify raw
/// database errors into the closed `DbErrorCode` set.
pub struct MetadataKernel {
    pool: AnyPool,
    adapter: Arc<dyn DialectAdapter>,
}

/// A first-version or next-version tag proposed by a caller, prior to
/// header assignment.
#[derive(Debug, Clone)]
pub struct NewTag {
    pub object_type: ObjectType,
    pub object_id: ObjectId,
    pub definition: ObjectDefinition,
    pub attrs: BTreeMap<String, Value>,
}

fn attrs_to_json(attrs: &BTreeMap<String, Value>) -> Result<String, TracError> {
    serde_json::to_string(attrs).map_err(|e| TracError::new(ErrorCode::Validation, format!("encode attrs: {e}")))
}

fn attrs_from_json(text: &str) -> Result<BTreeMap<String, Value>, TracError> {
    serde_json::from_str(text).map_err(|e| TracError::new(ErrorCode::DataConflict, format!("decode attrs: {e}")))
}

fn definition_to_json(def: &ObjectDefinition) -> Result<String, TracError> {
    serde_json::to_string(def).map_err(|e| TracError::new(ErrorCode::Validation, format!("encode definition: {e}")))
}

fn definition_from_json(text: &str) -> Result<ObjectDefinition, TracError> {
    serde_json::from_str(text).map_err(|e| TracError::new(ErrorCode::DataConflict, format!("decode definition: {e}")))
}

impl MetadataKernel {
    /// Connect to `db_url` under the given dialect and ensure the core
    /// schema exists.
    pub async fn connect(db_url: &str, dialect: SqlDialect) -> Result<Self, TracError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(8)
            .connect(db_url)
            .await
            .map_err(|e| TracError::new(ErrorCode::Startup, format!("connect to metadata store: {e}")))?;
        let kernel = Self {
            pool,
            adapter: Arc::from(adapter_for(dialect)),
        };
        kernel.ensure_schema().await?;
        Ok(kernel)
    }

    async fn ensure_schema(&self) -> Result<(), TracError> {
        for stmt in SCHEMA_SQL {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| TracError::new(ErrorCode::Startup, format!("apply schema: {e}")))?;
        }
        Ok(())
    }

    fn classify(&self, err: sqlx::Error) -> TracError {
        match self.adapter.classify_error(&err) {
            DbErrorCode::InsertDuplicate => TracError::duplicate(err.to_string()),
            DbErrorCode::InsertMissingFk => TracError::not_found(err.to_string()),
            DbErrorCode::NoData => TracError::not_found(err.to_string()),
            DbErrorCode::InvalidObjectDefinition => TracError::new(ErrorCode::DataConflict, err.to_string()),
            DbErrorCode::TooManyRows | DbErrorCode::WrongObjectType | DbErrorCode::Unknown => {
                TracError::new(ErrorCode::TemporaryFailure, err.to_string())
            }
        }
    }

    async fn tenant_pk(&self, tx: &mut sqlx::AnyConnection, tenant: &TenantCode) -> Result<i64, TracError> {
        let row = sqlx::query("SELECT tenant_pk FROM tenant WHERE tenant_code = ?")
            .bind(tenant.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?;
        row.map(|r| r.get::<i64, _>("tenant_pk"))
            .ok_or_else(|| TracError::not_found(format!("tenant not found: {tenant}")))
    }

    async fn object_pk(
        &self,
        tx: &mut sqlx::AnyConnection,
        tenant_pk: i64,
        object_type: ObjectType,
        object_id: ObjectId,
    ) -> Result<Option<(i64, ObjectType)>, TracError> {
        let row = sqlx::query("SELECT object_pk, object_type FROM object WHERE tenant_fk = ? AND object_id = ?")
            .bind(tenant_pk)
            .bind(object_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?;
        let Some(row) = row else { return Ok(None) };
        let stored_type: String = row.get("object_type");
        let parsed = ObjectType::ALL
            .iter()
            .copied()
            .find(|t| t.to_string() == stored_type)
            .unwrap_or(object_type);
        Ok(Some((row.get("object_pk"), parsed)))
    }

    /// `saveNewObjects(tenant, list of first-version tags)`.
    pub async fn save_new_objects(
        &self,
        tenant: &TenantCode,
        tags: &[NewTag],
    ) -> Result<Vec<ObjectHeader>, TracError> {
        validate_no_batch_duplicates(tags.iter().map(|t| t.object_id))?;

        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut *tx, tenant).await?;

        let mut headers = Vec::with_capacity(tags.len());
        for tag in tags {
            if self
                .object_pk(&mut *tx, tenant_pk, tag.object_type, tag.object_id)
                .await?
                .is_some()
            {
                return Err(TracError::duplicate(format!("object already exists: {}", tag.object_id)));
            }

            let object_pk: i64 = sqlx::query(
                "INSERT INTO object (tenant_fk, object_type, object_id) VALUES (?, ?, ?) RETURNING object_pk",
            )
            .bind(tenant_pk)
            .bind(tag.object_type.to_string())
            .bind(tag.object_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?
            .get("object_pk");

            let header = ObjectHeader::first_version(tenant.clone(), tag.object_type, tag.object_id);
            self.insert_version_and_tag(&mut *tx, object_pk, &header, &tag.definition, &tag.attrs)
                .await?;
            headers.push(header);
        }

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(headers)
    }

    async fn insert_version_and_tag(
        &self,
        tx: &mut sqlx::AnyConnection,
        object_pk: i64,
        header: &ObjectHeader,
        definition: &ObjectDefinition,
        attrs: &BTreeMap<String, Value>,
    ) -> Result<(), TracError> {
        let def_json = definition_to_json(definition)?;
        let version_pk: i64 = sqlx::query(
            "INSERT INTO object_version (object_fk, version, definition) VALUES (?, ?, ?) RETURNING object_version_pk",
        )
        .bind(object_pk)
        .bind(i64::from(header.object_version))
        .bind(def_json)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?
        .get("object_version_pk");

        let attrs_json = attrs_to_json(attrs)?;
        let tag_pk: i64 = sqlx::query(
            "INSERT INTO tag_version (object_version_fk, tag_version, attrs_json) VALUES (?, ?, ?) RETURNING tag_version_pk",
        )
        .bind(version_pk)
        .bind(i64::from(header.tag_version))
        .bind(attrs_json)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?
        .get("tag_version_pk");

        sqlx::query(
            "INSERT INTO latest_version (object_fk, object_version_fk) VALUES (?, ?)
             ON CONFLICT(object_fk) DO UPDATE SET object_version_fk = excluded.object_version_fk",
        )
        .bind(object_pk)
        .bind(version_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?;

        sqlx::query(
            "INSERT INTO latest_tag (object_version_fk, tag_version_fk) VALUES (?, ?)
             ON CONFLICT(object_version_fk) DO UPDATE SET tag_version_fk = excluded.tag_version_fk",
        )
        .bind(version_pk)
        .bind(tag_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?;

        Ok(())
    }

    /// `saveNewVersions(tenant, list of next-version tags)`.
    pub async fn save_new_versions(
        &self,
        tenant: &TenantCode,
        tags: &[NewTag],
    ) -> Result<Vec<ObjectHeader>, TracError> {
        validate_no_batch_duplicates(tags.iter().map(|t| t.object_id))?;

        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut *tx, tenant).await?;

        let mut headers = Vec::with_capacity(tags.len());
        for tag in tags {
            let (object_pk, stored_type) = self
                .object_pk(&mut *tx, tenant_pk, tag.object_type, tag.object_id)
                .await?
                .ok_or_else(|| TracError::not_found(format!("object not found: {}", tag.object_id)))?;
            if stored_type != tag.object_type {
                return Err(TracError::new(
                    ErrorCode::WrongType,
                    format!("object {} is of type {stored_type}, not {}", tag.object_id, tag.object_type),
                ));
            }

            let prior_version: i64 = sqlx::query("SELECT object_version_fk FROM latest_version WHERE object_fk = ?")
                .bind(object_pk)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?
                .get("object_version_fk");
            let prior_version_num: i64 = sqlx::query("SELECT version FROM object_version WHERE object_version_pk = ?")
                .bind(prior_version)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?
                .get("version");

            let header = ObjectHeader {
                tenant: tenant.clone(),
                object_type: tag.object_type,
                object_id: tag.object_id,
                object_version: u32::try_from(prior_version_num).unwrap_or(0) + 1,
                tag_version: 1,
            };
            self.insert_version_and_tag(&mut *tx, object_pk, &header, &tag.definition, &tag.attrs)
                .await?;
            headers.push(header);
        }

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(headers)
    }

    /// `saveNewTags(tenant, list of next-tag tags)` — attaches a new tag
    /// version to an existing object version without changing its
    /// definition.
    pub async fn save_new_tags(
        &self,
        tenant: &TenantCode,
        object_type: ObjectType,
        object_id: ObjectId,
        object_version: u32,
        attrs: &BTreeMap<String, Value>,
    ) -> Result<ObjectHeader, TracError> {
        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut *tx, tenant).await?;
        let (object_pk, _) = self
            .object_pk(&mut *tx, tenant_pk, object_type, object_id)
            .await?
            .ok_or_else(|| TracError::not_found(format!("object not found: {object_id}")))?;

        let row = sqlx::query("SELECT object_version_pk FROM object_version WHERE object_fk = ? AND version = ?")
            .bind(object_pk)
            .bind(i64::from(object_version))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?
            .ok_or_else(|| TracError::not_found("object version not found"))?;
        let version_pk: i64 = row.get("object_version_pk");

        let max_tag: Option<i64> = sqlx::query("SELECT MAX(tag_version) as m FROM tag_version WHERE object_version_fk = ?")
            .bind(version_pk)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?
            .get("m");
        let next_tag = max_tag.unwrap_or(0) + 1;

        let attrs_json = attrs_to_json(attrs)?;
        let tag_pk: i64 = sqlx::query(
            "INSERT INTO tag_version (object_version_fk, tag_version, attrs_json) VALUES (?, ?, ?) RETURNING tag_version_pk",
        )
        .bind(version_pk)
        .bind(next_tag)
        .bind(attrs_json)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?
        .get("tag_version_pk");

        sqlx::query(
            "INSERT INTO latest_tag (object_version_fk, tag_version_fk) VALUES (?, ?)
             ON CONFLICT(object_version_fk) DO UPDATE SET tag_version_fk = excluded.tag_version_fk",
        )
        .bind(version_pk)
        .bind(tag_pk)
        .execute(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?;

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(ObjectHeader {
            tenant: tenant.clone(),
            object_type,
            object_id,
            object_version,
            tag_version: u32::try_from(next_tag).unwrap_or(1),
        })
    }

    /// `preallocateIds(tenant, list of (type, id))`.
    pub async fn preallocate_ids(
        &self,
        tenant: &TenantCode,
        requests: &[(ObjectType, ObjectId)],
    ) -> Result<(), TracError> {
        validate_no_batch_duplicates(requests.iter().map(|(_, id)| *id))?;

        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut *tx, tenant).await?;

        for (object_type, object_id) in requests {
            if self.object_pk(&mut *tx, tenant_pk, *object_type, *object_id).await?.is_some() {
                return Err(TracError::duplicate(format!("object id already taken: {object_id}")));
            }
            let object_pk: i64 =
                sqlx::query("INSERT INTO object (tenant_fk, object_type, object_id) VALUES (?, ?, ?) RETURNING object_pk")
                    .bind(tenant_pk)
                    .bind(object_type.to_string())
                    .bind(object_id.to_string())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| self.classify(e))?
                    .get("object_pk");
            sqlx::query("INSERT INTO preallocation (object_fk) VALUES (?)")
                .bind(object_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?;
        }

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(())
    }

    /// `savePreallocatedObjects(tenant, list of first-version tags)`.
    pub async fn save_preallocated_objects(
        &self,
        tenant: &TenantCode,
        tags: &[NewTag],
    ) -> Result<Vec<ObjectHeader>, TracError> {
        validate_no_batch_duplicates(tags.iter().map(|t| t.object_id))?;

        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut *tx, tenant).await?;

        let mut headers = Vec::with_capacity(tags.len());
        for tag in tags {
            let (object_pk, stored_type) = self
                .object_pk(&mut *tx, tenant_pk, tag.object_type, tag.object_id)
                .await?
                .ok_or_else(|| TracError::not_found(format!("no preallocation for {}", tag.object_id)))?;
            if stored_type != tag.object_type {
                return Err(TracError::new(ErrorCode::WrongType, format!("preallocated type mismatch for {}", tag.object_id)));
            }
            let preallocated = sqlx::query("SELECT 1 as x FROM preallocation WHERE object_fk = ?")
                .bind(object_pk)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?;
            if preallocated.is_none() {
                return Err(TracError::not_found(format!("no preallocation for {}", tag.object_id)));
            }

            let header = ObjectHeader::first_version(tenant.clone(), tag.object_type, tag.object_id);
            self.insert_version_and_tag(&mut *tx, object_pk, &header, &tag.definition, &tag.attrs)
                .await?;
            sqlx::query("DELETE FROM preallocation WHERE object_fk = ?")
                .bind(object_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?;
            headers.push(header);
        }

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(headers)
    }

    /// Resolves a selector against an already-known `object_pk` and builds
    /// the full `Tag`. Shared by `load_object` and `load_objects` so the
    /// batch path doesn't re-derive `object_pk` twice.
    async fn load_tag_for_pk(
        &self,
        tx: &mut sqlx::AnyConnection,
        tenant: &TenantCode,
        object_pk: i64,
        selector: &Selector,
    ) -> Result<Tag, TracError> {
        let version_pk: i64 = match selector.object_version {
            VersionSelector::Latest => {
                sqlx::query("SELECT object_version_fk FROM latest_version WHERE object_fk = ?")
                    .bind(object_pk)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| self.classify(e))?
                    .get("object_version_fk")
            }
            VersionSelector::Fixed(v) => sqlx::query("SELECT object_version_pk FROM object_version WHERE object_fk = ? AND version = ?")
                .bind(object_pk)
                .bind(i64::from(v))
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?
                .ok_or_else(|| TracError::not_found("object version not found"))?
                .get("object_version_pk"),
        };

        let def_row = sqlx::query("SELECT version, definition FROM object_version WHERE object_version_pk = ?")
            .bind(version_pk)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?;
        let object_version: i64 = def_row.get("version");
        let definition = definition_from_json(def_row.get::<&str, _>("definition"))?;

        let tag_pk: i64 = match selector.tag_version {
            VersionSelector::Latest => sqlx::query("SELECT tag_version_fk FROM latest_tag WHERE object_version_fk = ?")
                .bind(version_pk)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?
                .get("tag_version_fk"),
            VersionSelector::Fixed(t) => sqlx::query("SELECT tag_version_pk FROM tag_version WHERE object_version_fk = ? AND tag_version = ?")
                .bind(version_pk)
                .bind(i64::from(t))
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?
                .ok_or_else(|| TracError::not_found("tag version not found"))?
                .get("tag_version_pk"),
        };

        let tag_row = sqlx::query("SELECT tag_version, attrs_json FROM tag_version WHERE tag_version_pk = ?")
            .bind(tag_pk)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?;
        let tag_version: i64 = tag_row.get("tag_version");
        let attrs = attrs_from_json(tag_row.get::<&str, _>("attrs_json"))?;

        Ok(Tag::new(
            ObjectHeader {
                tenant: tenant.clone(),
                object_type: selector.object_type,
                object_id: selector.object_id,
                object_version: u32::try_from(object_version).unwrap_or(0),
                tag_version: u32::try_from(tag_version).unwrap_or(0),
            },
            definition,
        )
        .with_attrs(attrs))
    }

    /// `loadObject(tenant, type, id, version, tagVersion)`.
    pub async fn load_object(&self, tenant: &TenantCode, selector: &Selector) -> Result<Tag, TracError> {
        let mut conn = self.pool.acquire().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut conn, tenant).await?;
        let (object_pk, stored_type) = self
            .object_pk(&mut conn, tenant_pk, selector.object_type, selector.object_id)
            .await?
            .ok_or_else(|| TracError::not_found(format!("object not found: {}", selector.object_id)))?;
        if stored_type != selector.object_type {
            return Err(TracError::new(
                ErrorCode::WrongType,
                format!("object {} is of type {stored_type}, not {}", selector.object_id, selector.object_type),
            ));
        }
        self.load_tag_for_pk(&mut conn, tenant, object_pk, selector).await
    }

    /// `loadObjects(tenant, list of selectors)` — any single failure fails
    /// the whole batch (spec §4.2). Selectors are resolved to `object_pk`s
    /// and staged into a per-transaction mapping table (`ordering`,
    /// `mapped_pk`) built from the adapter's dialect-specific DDL, so the
    /// final join preserves caller order inside one transaction rather than
    /// leaking N sequential round trips across separate connections.
    pub async fn load_objects(&self, tenant: &TenantCode, selectors: &[Selector]) -> Result<Vec<Tag>, TracError> {
        let mut tx = self.pool.begin().await.map_err(|e| self.classify(e))?;
        let tenant_pk = self.tenant_pk(&mut tx, tenant).await?;

        sqlx::query(self.adapter.mapping_table_ddl())
            .execute(&mut *tx)
            .await
            .map_err(|e| self.classify(e))?;

        for (ordering, selector) in selectors.iter().enumerate() {
            let (object_pk, stored_type) = self
                .object_pk(&mut tx, tenant_pk, selector.object_type, selector.object_id)
                .await?
                .ok_or_else(|| TracError::not_found(format!("object not found: {}", selector.object_id)))?;
            if stored_type != selector.object_type {
                return Err(TracError::new(
                    ErrorCode::WrongType,
                    format!("object {} is of type {stored_type}, not {}", selector.object_id, selector.object_type),
                ));
            }
            sqlx::query("INSERT INTO trac_batch_order (ordering, mapped_pk) VALUES (?, ?)")
                .bind(i64::try_from(ordering).unwrap_or(i64::MAX))
                .bind(object_pk)
                .execute(&mut *tx)
                .await
                .map_err(|e| self.classify(e))?;
        }

        let ordered_pks: Vec<i64> = sqlx::query(
            "SELECT mapped_pk FROM trac_batch_order ORDER BY ordering",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| self.classify(e))?
        .into_iter()
        .map(|row| row.get("mapped_pk"))
        .collect();

        let mut out = Vec::with_capacity(selectors.len());
        for (object_pk, selector) in ordered_pks.into_iter().zip(selectors) {
            out.push(self.load_tag_for_pk(&mut tx, tenant, object_pk, selector).await?);
        }

        tx.commit().await.map_err(|e| self.classify(e))?;
        Ok(out)
    }

    /// `listTenants()`.
    pub async fn list_tenants(&self) -> Result<Vec<trac_core::Tenant>, TracError> {
        let rows = sqlx::query("SELECT tenant_code, description FROM tenant ORDER BY tenant_code")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        rows.into_iter()
            .map(|row| {
                let code: String = row.get("tenant_code");
                Ok(trac_core::Tenant {
                    tenant_code: TenantCode::new(code)?,
                    description: row.get("description"),
                })
            })
            .collect()
    }

    /// `updateTenant()` — updates the description of an existing tenant;
    /// fails with `TENANT_NOT_FOUND` (surfaced as [`ErrorCode::NotFound`])
    /// if the tenant has not been registered.
    pub async fn update_tenant(&self, tenant: &TenantCode, description: &str) -> Result<(), TracError> {
        let result = sqlx::query("UPDATE tenant SET description = ? WHERE tenant_code = ?")
            .bind(description)
            .bind(tenant.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        if result.rows_affected() == 0 {
            return Err(TracError::not_found(format!("tenant not found: {tenant}")));
        }
        Ok(())
    }

    /// Registers a new tenant. Not part of spec §4.2's operation table,
    /// but required for `updateTenant` to ever have a row to act on.
    pub async fn create_tenant(&self, tenant: &TenantCode, description: &str) -> Result<(), TracError> {
        sqlx::query("INSERT INTO tenant (tenant_code, description) VALUES (?, ?)")
            .bind(tenant.as_str())
            .bind(description)
            .execute(&self.pool)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }
}

/// A decoded attribute map as plain JSON, used by callers that don't need
/// the typed [`Value`] tree (e.g. diagnostics/CLI output).
#[must_use]
pub fn attrs_as_plain_json(attrs: &BTreeMap<String, Value>) -> Json {
    serde_json::to_value(attrs).unwrap_or(Json::Null)
}
