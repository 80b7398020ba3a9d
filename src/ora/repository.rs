//! Generic repository over an [`EntityMetadata`] descriptor.
//!
//! A repository is plain composition: the entity's static metadata plus a
//! shared [`ConnectionManager`]. Every operation compiles one statement,
//! executes it through one pooled connection and maps rows back to the
//! domain shape. Runtime failures come back in the uniform [`DbOutcome`];
//! statement misuse is returned as an error before any I/O.

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::database::{exec, ConnectionManager, DbOutcome};
use crate::error::Result;
use crate::ora::criteria::Criteria;
use crate::ora::mapper::{Entity, EntityMetadata, SqlType};
use crate::ora::statement::{OrderBy, Pagination, RowLimit};

/// Options for [`Repository::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub fields: Option<Vec<String>>,
    pub order: Option<OrderBy>,
    pub limit: Option<RowLimit>,
}

impl FindOptions {
    pub fn limited(top: u32) -> Self {
        Self {
            limit: Some(RowLimit { top }),
            ..Self::default()
        }
    }
}

/// One page of results plus the unsliced total.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PageResult<T> {
    pub list: Vec<T>,
    pub count: usize,
    pub total: i64,
}

pub struct Repository<T: Entity> {
    manager: Arc<ConnectionManager>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(manager: Arc<ConnectionManager>) -> Result<Self> {
        T::metadata().validate()?;
        Ok(Self {
            manager,
            _entity: PhantomData,
        })
    }

    fn meta(&self) -> &'static EntityMetadata {
        T::metadata()
    }

    /// Find one row by its primary key (or ROWID when no key is declared).
    pub async fn find_by_id(&self, id: Value) -> Result<DbOutcome<Option<T>>> {
        debug!(entity = std::any::type_name::<T>(), "find_by_id");
        let criteria = self.pk_criteria(id);
        self.find_one_by(criteria).await
    }

    /// Find the first row matching an AND-ed equality record.
    pub async fn find_one_by(&self, criteria: Map<String, Value>) -> Result<DbOutcome<Option<T>>> {
        let meta = self.meta();
        let statement = meta.build_select(
            Some(&Criteria::Plain(criteria)),
            None,
            Some(RowLimit { top: 1 }),
            None,
        )?;
        let outcome = exec::query(&self.manager, meta.pool_alias, statement).await;
        if !outcome.success {
            return Ok(outcome.cast_failure());
        }
        let row = outcome.data.unwrap_or_default().into_iter().next();
        Ok(match row {
            Some(row) => self.into_entity(&row, None).map(Some),
            None => DbOutcome::ok(None),
        })
    }

    /// Find rows by any criteria shape.
    pub async fn find(
        &self,
        criteria: Criteria,
        options: FindOptions,
    ) -> Result<DbOutcome<Vec<T>>> {
        let meta = self.meta();
        let fields: Option<Vec<&str>> = options
            .fields
            .as_ref()
            .map(|fields| fields.iter().map(String::as_str).collect());
        let statement = meta.build_select(
            Some(&criteria),
            fields.as_deref(),
            options.limit,
            options.order.as_ref(),
        )?;
        let outcome = exec::query(&self.manager, meta.pool_alias, statement).await;
        if !outcome.success {
            return Ok(outcome.cast_failure());
        }

        let mut list = Vec::new();
        for row in outcome.data.unwrap_or_default() {
            let mapped = self.into_entity(&row, options.fields.as_deref());
            if !mapped.success {
                return Ok(mapped.cast_failure());
            }
            if let Some(entity) = mapped.data {
                list.push(entity);
            }
        }
        Ok(DbOutcome::ok(list))
    }

    /// Offset-window pagination; pages are numbered from 1 and the result
    /// carries the unsliced `total`.
    pub async fn find_with_pagination(
        &self,
        criteria: Criteria,
        pagination: Pagination,
        options: FindOptions,
    ) -> Result<DbOutcome<PageResult<T>>> {
        let meta = self.meta();
        let fields: Option<Vec<&str>> = options
            .fields
            .as_ref()
            .map(|fields| fields.iter().map(String::as_str).collect());
        let statement = meta.build_paginated_select(
            Some(&criteria),
            pagination,
            fields.as_deref(),
            options.order.as_ref(),
        )?;
        let outcome = exec::query(&self.manager, meta.pool_alias, statement).await;
        if !outcome.success {
            return Ok(outcome.cast_failure());
        }

        let rows = outcome.data.unwrap_or_default();
        let total = rows
            .first()
            .and_then(|row| row.get("TOTAL"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let mut list = Vec::new();
        for row in &rows {
            let mapped = self.into_entity(row, options.fields.as_deref());
            if !mapped.success {
                return Ok(mapped.cast_failure());
            }
            if let Some(entity) = mapped.data {
                list.push(entity);
            }
        }
        let count = list.len();
        Ok(DbOutcome::ok(PageResult { list, count, total }))
    }

    /// Insert one entity record. On success the returned record carries the
    /// generated key under both the primary-key field and the `id` alias.
    pub async fn save(&self, entity: Map<String, Value>) -> Result<DbOutcome<Map<String, Value>>> {
        debug!(entity = std::any::type_name::<T>(), "save");
        let meta = self.meta();
        let statement = meta.build_insert(&entity)?;
        let outcome = exec::execute(&self.manager, meta.pool_alias, statement).await;
        if !outcome.success {
            return Ok(outcome.cast_failure());
        }

        let mut entity = entity;
        let id = outcome
            .data
            .and_then(|r| r.out_binds.get("id").cloned())
            .unwrap_or(Value::Null);
        if let Some(pk) = &meta.primary_key {
            entity.insert(pk.field.to_string(), id.clone());
        }
        entity.insert("id".to_string(), id);
        Ok(DbOutcome::ok(entity))
    }

    /// Batch insert; each returned record carries its own generated key.
    pub async fn save_many(
        &self,
        entities: Vec<Map<String, Value>>,
    ) -> Result<DbOutcome<Vec<Map<String, Value>>>> {
        debug!(entity = std::any::type_name::<T>(), "save_many");
        let meta = self.meta();
        let batch = meta.build_batch_insert(&entities)?;
        let outcome = exec::execute_many(&self.manager, meta.pool_alias, batch).await;
        if !outcome.success {
            return Ok(outcome.cast_failure());
        }

        let out_binds = outcome.data.map(|r| r.out_binds).unwrap_or_default();
        let mut entities = entities;
        for (i, entity) in entities.iter_mut().enumerate() {
            let id = out_binds
                .get(i)
                .and_then(|set| set.get("id").cloned())
                .unwrap_or(Value::Null);
            if let Some(pk) = &meta.primary_key {
                entity.insert(pk.field.to_string(), id.clone());
            }
            entity.insert("id".to_string(), id);
        }
        Ok(DbOutcome::ok(entities))
    }

    /// Update one row by primary key.
    pub async fn update(
        &self,
        id: Value,
        patch: Map<String, Value>,
    ) -> Result<DbOutcome<u64>> {
        let criteria = self.pk_criteria(id);
        self.update_criteria(criteria, patch).await
    }

    /// Update rows matching a plain criteria record.
    pub async fn update_criteria(
        &self,
        criteria: Map<String, Value>,
        patch: Map<String, Value>,
    ) -> Result<DbOutcome<u64>> {
        debug!(entity = std::any::type_name::<T>(), "update_criteria");
        let meta = self.meta();
        let statement = meta.build_update(&patch, &criteria)?;
        let outcome = exec::execute(&self.manager, meta.pool_alias, statement).await;
        Ok(outcome.map(|r| r.rows_affected))
    }

    /// Batch update keyed by the `by` field list.
    pub async fn update_many(
        &self,
        entities: &[Map<String, Value>],
        by: &[&str],
    ) -> Result<DbOutcome<u64>> {
        debug!(entity = std::any::type_name::<T>(), "update_many");
        let meta = self.meta();
        let batch = meta.build_batch_update(entities, by)?;
        let outcome = exec::execute_many(&self.manager, meta.pool_alias, batch).await;
        Ok(outcome.map(|r| r.rows_affected))
    }

    /// Delete rows matching a plain criteria record.
    pub async fn delete(&self, criteria: Map<String, Value>) -> Result<DbOutcome<u64>> {
        debug!(entity = std::any::type_name::<T>(), "delete");
        let meta = self.meta();
        let statement = meta.build_delete(&criteria)?;
        let outcome = exec::execute(&self.manager, meta.pool_alias, statement).await;
        Ok(outcome.map(|r| r.rows_affected))
    }

    pub async fn delete_by_id(&self, id: Value) -> Result<DbOutcome<u64>> {
        let criteria = self.pk_criteria(id);
        self.delete(criteria).await
    }

    /// Run caller-supplied SELECT text with optional injected criteria;
    /// rows come back keyed by physical column name, unmapped.
    pub async fn query(
        &self,
        sql: &str,
        criteria: Option<&Criteria>,
        order: Option<&OrderBy>,
    ) -> Result<DbOutcome<Vec<Map<String, Value>>>> {
        let meta = self.meta();
        let statement = meta.inject_params(sql, criteria, order)?;
        Ok(exec::query(&self.manager, meta.pool_alias, statement).await)
    }

    /// Criteria record addressing one row by primary key; numeric keys are
    /// coerced so string ids from the HTTP layer still match.
    fn pk_criteria(&self, id: Value) -> Map<String, Value> {
        let mut criteria = Map::new();
        match &self.meta().primary_key {
            Some(pk) => {
                let value = if pk.sql_type == SqlType::Number {
                    match id {
                        Value::String(text) => text
                            .parse::<i64>()
                            .map(|n| Value::Number(Number::from(n)))
                            .unwrap_or(Value::String(text)),
                        other => other,
                    }
                } else {
                    id
                };
                criteria.insert(pk.field.to_string(), value);
            }
            None => {
                criteria.insert("id".to_string(), id);
            }
        }
        criteria
    }

    /// Map one physical row to the typed entity: declared columns pass
    /// through `to_domain` under their domain names, and `id` is always
    /// populated from the primary key (or ROWID).
    fn into_entity(
        &self,
        row: &Map<String, Value>,
        fields: Option<&[String]>,
    ) -> DbOutcome<T> {
        let domain = map_row(self.meta(), row, fields);
        match serde_json::from_value::<T>(Value::Object(domain)) {
            Ok(entity) => DbOutcome::ok(entity),
            Err(e) => DbOutcome::fail("MAP_ERROR", e.to_string()),
        }
    }
}

/// Row-to-domain mapping shared with callers that stay in record form.
pub fn map_row(
    meta: &EntityMetadata,
    row: &Map<String, Value>,
    fields: Option<&[String]>,
) -> Map<String, Value> {
    let mut domain = Map::new();
    for (field, def) in meta.mapper.iter() {
        let wanted = match fields {
            Some(fields) if !fields.is_empty() => {
                fields.iter().any(|f| f == field) || field == "id"
            }
            _ => true,
        };
        if !wanted {
            continue;
        }
        let value = row.get(def.name).cloned().unwrap_or(Value::Null);
        domain.insert(field.to_string(), def.domain_value(value));
    }

    let id = match &meta.primary_key {
        Some(pk) => domain
            .get(pk.field)
            .cloned()
            .or_else(|| row.get(pk.column).cloned())
            .unwrap_or(Value::Null),
        None => row.get("ROWID").cloned().unwrap_or(Value::Null),
    };
    domain.insert("id".to_string(), id);
    domain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ora::mapper::{ColumnDef, ColumnMapper, PrimaryKey};
    use serde_json::json;

    const COLUMNS: &[(&str, ColumnDef)] = &[
        ("transactionId", ColumnDef::new("TRANSACTION_ID", SqlType::Number)),
        ("company", ColumnDef::new("COMPANY", SqlType::Varchar2)),
        ("processStatus", ColumnDef::new("PROCESS_STATUS", SqlType::Varchar2)),
    ];

    const META: EntityMetadata = EntityMetadata {
        pool_alias: "ERP",
        schema: "CUX",
        table_name: Some("CUX_RCV_HIS"),
        base_query: None,
        primary_key: Some(PrimaryKey {
            field: "transactionId",
            column: "TRANSACTION_ID",
            sql_type: SqlType::Number,
            sequence: None,
        }),
        mapper: ColumnMapper::new(COLUMNS),
    };

    #[test]
    fn test_map_row_populates_id_alias_from_pk() {
        let mut row = Map::new();
        row.insert("TRANSACTION_ID".to_string(), json!(88));
        row.insert("COMPANY".to_string(), json!("1000"));
        let domain = map_row(&META, &row, None);
        assert_eq!(domain.get("id"), Some(&json!(88)));
        assert_eq!(domain.get("transactionId"), Some(&json!(88)));
        assert_eq!(domain.get("company"), Some(&json!("1000")));
        // undeclared columns do not leak through
        assert!(domain.get("TRANSACTION_ID").is_none());
    }

    #[test]
    fn test_map_row_field_projection() {
        let mut row = Map::new();
        row.insert("TRANSACTION_ID".to_string(), json!(5));
        row.insert("COMPANY".to_string(), json!("1000"));
        row.insert("PROCESS_STATUS".to_string(), json!("PENDING"));
        let fields = vec!["company".to_string()];
        let domain = map_row(&META, &row, Some(&fields));
        assert!(domain.get("processStatus").is_none());
        assert_eq!(domain.get("company"), Some(&json!("1000")));
        assert_eq!(domain.get("id"), Some(&json!(5)));
    }

    #[test]
    fn test_map_row_without_pk_uses_rowid() {
        let meta = EntityMetadata {
            primary_key: None,
            ..META
        };
        let mut row = Map::new();
        row.insert("ROWID".to_string(), json!("AAAX"));
        let domain = map_row(&meta, &row, None);
        assert_eq!(domain.get("id"), Some(&json!("AAAX")));
    }
}
