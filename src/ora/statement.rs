//! Full statement builders over [`EntityMetadata`].
//!
//! Everything here is pure string/bind assembly: SELECT with row limits and
//! CLOB fetch hints, offset-window pagination, INSERT with generated-key
//! return, batch INSERT/UPDATE with per-row bind sets, and criteria-only
//! DELETE. Compilation failures are caller errors and surface before any
//! I/O.

use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::ora::binds::{BindMap, BoundParam};
use crate::ora::criteria::{
    compile_criteria_list, compile_criterion, Criteria, WhereFragment,
};
use crate::ora::mapper::{EntityMetadata, SqlType};

/// Default bind prefix for plain criteria records.
const CRITERIA_PREFIX: &str = "p_";

/// `ROWNUM` cap for a select.
#[derive(Debug, Clone, Copy)]
pub struct RowLimit {
    pub top: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Single order-by column; the field is resolved through the mapper when it
/// is a known domain field, otherwise used verbatim.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// 1-indexed page window.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub size: u32,
}

/// Execution options attached to a compiled statement.
#[derive(Debug, Clone, Default)]
pub struct StatementOptions {
    pub max_rows: Option<u32>,
    /// Physical names of projected CLOB columns; the executor fetches these
    /// as text instead of streaming locators.
    pub clob_as_string: Vec<&'static str>,
}

/// One executable statement: SQL text plus its named binds. Every `:name`
/// placeholder in `sql` has a corresponding entry in `binds`; output-only
/// parameters (the generated-id bind of inserts) are added explicitly.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    pub sql: String,
    pub binds: BindMap,
    pub options: StatementOptions,
}

/// One parameterized statement executed once per bind set.
#[derive(Debug, Clone)]
pub struct BatchStatement {
    pub sql: String,
    pub bind_sets: Vec<BindMap>,
}

impl EntityMetadata {
    /// Resolve one of the three criteria shapes into a compiled fragment.
    /// Empty criteria resolve to `None` (no WHERE clause).
    pub fn resolve_criteria(&self, criteria: &Criteria) -> Result<Option<WhereFragment>> {
        if criteria.is_empty() {
            return Ok(None);
        }
        match criteria {
            Criteria::Plain(map) => self.extract_plain(map, CRITERIA_PREFIX).map(Some),
            Criteria::Single(criterion) => {
                compile_criterion(&self.mapper, criterion, CRITERIA_PREFIX).map(Some)
            }
            Criteria::List(items) => compile_criteria_list(&self.mapper, items).map(Some),
        }
    }

    /// AND-ed equality record. The special field `id` resolves to the
    /// primary-key column (or ROWID).
    fn extract_plain(&self, criteria: &Map<String, Value>, prefix: &str) -> Result<WhereFragment> {
        let mut fragment = WhereFragment::default();
        for (field, raw) in criteria {
            let (column, def) = if field == "id" {
                (self.id_column(), None)
            } else {
                match self.mapper.get(field) {
                    Some(def) => (def.name, Some(def)),
                    None => (field.as_str(), None),
                }
            };
            let bind_key = format!("{prefix}{field}");
            let value = def.map_or_else(|| raw.clone(), |d| d.physical_value(raw.clone()));
            fragment.sql.push_str(&format!("AND {column} = :{bind_key}\n"));
            fragment
                .binds
                .insert(bind_key, BoundParam::input(value, def.map(|d| d.sql_type)))?;
        }
        Ok(fragment)
    }

    /// Validate a requested projection and return the physical columns in
    /// mapper order, plus the CLOB subset needing the fetch-as-text hint.
    fn project(
        &self,
        fields: Option<&[&str]>,
    ) -> Result<(Vec<&'static str>, Vec<&'static str>)> {
        let selected: Vec<&str> = match fields {
            Some(requested) if !requested.is_empty() => {
                for field in requested {
                    if !self.mapper.contains(field) {
                        return Err(BridgeError::InvalidField((*field).to_string()));
                    }
                }
                requested.to_vec()
            }
            _ => self.mapper.fields().collect(),
        };

        let mut columns = Vec::new();
        let mut clobs = Vec::new();
        for (field, def) in self.mapper.iter() {
            if selected.contains(&field) {
                columns.push(def.name);
                if def.sql_type == SqlType::Clob {
                    clobs.push(def.name);
                }
            }
        }
        Ok((columns, clobs))
    }

    fn order_clause(&self, order: Option<&OrderBy>) -> String {
        match order {
            Some(order) => {
                let column = self
                    .mapper
                    .get(&order.field)
                    .map_or(order.field.as_str(), |d| d.name);
                format!("\nORDER BY {} {}", column, order.direction.as_sql())
            }
            None => String::new(),
        }
    }

    /// Build a SELECT. The row-identity column is always projected first so
    /// mapped rows can carry their `id` alias.
    pub fn build_select(
        &self,
        criteria: Option<&Criteria>,
        fields: Option<&[&str]>,
        limit: Option<RowLimit>,
        order: Option<&OrderBy>,
    ) -> Result<CompiledStatement> {
        let (columns, clobs) = self.project(fields)?;
        let base = format!(
            "SELECT {}, {} \nFROM {}",
            self.id_column(),
            columns.join(", "),
            self.select_from()?
        );

        let top = match limit {
            Some(RowLimit { top }) if top == 1 => " AND ROWNUM = 1".to_string(),
            Some(RowLimit { top }) if top > 1 => format!(" AND ROWNUM <= {top}"),
            _ => String::new(),
        };

        let order_sql = self.order_clause(order);
        let options = StatementOptions {
            max_rows: None,
            clob_as_string: clobs,
        };

        let fragment = match criteria {
            Some(criteria) => self.resolve_criteria(criteria)?,
            None => None,
        };

        let statement = match fragment {
            Some(fragment) => CompiledStatement {
                sql: format!("{base} \n{}{top}{order_sql}", fragment.with_where()),
                binds: fragment.binds,
                options,
            },
            None => {
                let sql = if top.is_empty() {
                    format!("{base}{order_sql}")
                } else {
                    format!("{base} \nWHERE{}{order_sql}", top.replacen(" AND", "", 1))
                };
                CompiledStatement {
                    sql,
                    binds: BindMap::new(),
                    options,
                }
            }
        };
        Ok(statement)
    }

    /// Build the offset-window pagination select: the base query gains a
    /// `COUNT(*) OVER () TOTAL` window column, then two nested ROWNUM
    /// windows slice rows `[(page-1)*size+1 .. page*size]`, pages numbered
    /// from 1.
    pub fn build_paginated_select(
        &self,
        criteria: Option<&Criteria>,
        pagination: Pagination,
        fields: Option<&[&str]>,
        order: Option<&OrderBy>,
    ) -> Result<CompiledStatement> {
        let Pagination { page, size } = pagination;
        if page == 0 || size == 0 {
            return Err(BridgeError::InvalidPagination);
        }

        let (columns, clobs) = self.project(fields)?;
        let column_list = columns.join(", ");

        let fragment = match criteria {
            Some(criteria) => self.resolve_criteria(criteria)?,
            None => None,
        };

        let (where_sql, binds) = match fragment {
            Some(fragment) => (format!(" \n{}", fragment.with_where()), fragment.binds),
            None => (String::new(), BindMap::new()),
        };

        let inner = format!(
            "SELECT {column_list}, \nCOUNT(*) OVER () TOTAL FROM {}{where_sql}",
            self.select_from()?
        );

        let order_sql = match order {
            Some(order) => {
                let column = self
                    .mapper
                    .get(&order.field)
                    .map_or(order.field.as_str(), |d| d.name);
                format!("ORDER BY {} {}", column, order.direction.as_sql())
            }
            None => "ORDER BY 1 ASC".to_string(),
        };

        let sql = format!(
            "\nSELECT {column_list},TOTAL,ROWNUMID FROM\n(\nSELECT {column_list},\nTOTAL,ROWNUM AS ROWNUMID\nFROM\n(\n{inner}\n{order_sql}\n) t\nWHERE ROWNUM < (({page} * {size}) + 1 )\n)\nWHERE ROWNUMID >= ((({page}-1) * {size}) + 1)"
        );

        Ok(CompiledStatement {
            sql,
            binds,
            options: StatementOptions {
                max_rows: None,
                clob_as_string: clobs,
            },
        })
    }

    /// Build a single-row INSERT returning the generated identity into the
    /// `:id` out-bind. An entity that already carries its primary-key value
    /// is rejected: the key must come from the sequence (or ROWID).
    pub fn build_insert(&self, entity: &Map<String, Value>) -> Result<CompiledStatement> {
        let table = self.qualified_table()?;
        let (columns, key_binds, binds) = self.insert_parts(entity)?;

        let (head, returning) = self.insert_identity();
        let values = join_values(&head, &key_binds);

        let mut binds = binds;
        let id_type = self
            .primary_key
            .as_ref()
            .map_or(SqlType::Varchar2, |pk| pk.sql_type);
        binds.insert("id", BoundParam::output(id_type))?;

        Ok(CompiledStatement {
            sql: format!(
                "INSERT INTO {table} \n  ({}) \n VALUES \n  ({values}) \nRETURNING {returning} INTO :id",
                columns.join(",")
            ),
            binds,
            options: StatementOptions::default(),
        })
    }

    /// Build a batch INSERT: one parameterized statement plus one bind set
    /// per entity. Every entity must expose the same key set as the first.
    pub fn build_batch_insert(&self, entities: &[Map<String, Value>]) -> Result<BatchStatement> {
        let first = entities.first().ok_or(BridgeError::EmptyBatch)?;
        let table = self.qualified_table()?;
        let first_keys: Vec<&String> = first.keys().collect();

        let (columns, key_binds, _) = self.insert_parts(first)?;
        let (head, returning) = self.insert_identity();
        let values = join_values(&head, &key_binds);
        let sql = format!(
            "INSERT INTO {table} \n  ({}) \n VALUES \n  ({values}) \nRETURNING {returning} INTO :id",
            columns.join(",")
        );

        let id_type = self
            .primary_key
            .as_ref()
            .map_or(SqlType::Varchar2, |pk| pk.sql_type);

        let mut bind_sets = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.keys().collect::<Vec<_>>() != first_keys {
                return Err(BridgeError::HeterogeneousBatch);
            }
            let (_, _, mut binds) = self.insert_parts(entity)?;
            binds.insert("id", BoundParam::output(id_type))?;
            bind_sets.push(binds);
        }

        Ok(BatchStatement { sql, bind_sets })
    }

    /// Shared INSERT assembly: column list, `:key` bind list and the input
    /// bind map for one entity.
    fn insert_parts(
        &self,
        entity: &Map<String, Value>,
    ) -> Result<(Vec<&'static str>, Vec<String>, BindMap)> {
        if let Some(pk) = &self.primary_key {
            if entity.contains_key(pk.field) {
                return Err(BridgeError::PrimaryKeyAlreadySet);
            }
        }

        let mut columns = Vec::new();
        if let Some(pk) = &self.primary_key {
            if pk.sequence.is_some() {
                columns.push(pk.column);
            }
        }

        let mut key_binds = Vec::new();
        let mut binds = BindMap::new();
        for (field, raw) in entity {
            let def = self
                .mapper
                .get(field)
                .ok_or_else(|| BridgeError::InvalidField(field.clone()))?;
            if !def.insertable {
                return Err(BridgeError::InvalidField(format!(
                    "field '{field}' is not insertable"
                )));
            }
            columns.push(def.name);
            key_binds.push(format!(":{field}"));
            binds.insert(
                field.clone(),
                BoundParam::input(def.physical_value(raw.clone()), Some(def.sql_type)),
            )?;
        }
        Ok((columns, key_binds, binds))
    }

    /// VALUES head and RETURNING target for generated identity.
    fn insert_identity(&self) -> (Option<String>, &'static str) {
        match &self.primary_key {
            Some(pk) => match &pk.sequence {
                Some(sequence) => (Some(sequence.next_val_sql()), pk.column),
                None => (None, "ROWID"),
            },
            None => (None, "ROWID"),
        }
    }

    /// Build a single UPDATE: SET from the patch record, WHERE from a plain
    /// criteria record (bound under the `p_` prefix so same-named SET binds
    /// cannot collide).
    pub fn build_update(
        &self,
        patch: &Map<String, Value>,
        criteria: &Map<String, Value>,
    ) -> Result<CompiledStatement> {
        let table = self.qualified_table()?;
        if patch.is_empty() {
            return Err(BridgeError::InvalidCriteria(
                "update requires at least one field to set".to_string(),
            ));
        }
        let where_fragment = self.extract_plain(criteria, CRITERIA_PREFIX)?;

        let mut set_parts = Vec::new();
        let mut binds = BindMap::new();
        for (field, raw) in patch {
            let def = self
                .mapper
                .get(field)
                .ok_or_else(|| BridgeError::InvalidField(field.clone()))?;
            if !def.updatable {
                return Err(BridgeError::InvalidField(format!(
                    "field '{field}' is not updatable"
                )));
            }
            set_parts.push(format!("{} = :{field}", def.name));
            binds.insert(
                field.clone(),
                BoundParam::input(def.physical_value(raw.clone()), Some(def.sql_type)),
            )?;
        }
        let where_clause = where_fragment.with_where();
        binds.merge(where_fragment.binds)?;

        Ok(CompiledStatement {
            sql: format!(
                "UPDATE {table} \nSET {} \n{}",
                set_parts.join(","),
                where_clause
            ),
            binds,
            options: StatementOptions::default(),
        })
    }

    /// Build a batch UPDATE keyed by `by` fields: SET excludes the key
    /// columns, the WHERE clause binds them under the `p_` prefix, and
    /// every entity must supply all key values.
    pub fn build_batch_update(
        &self,
        entities: &[Map<String, Value>],
        by: &[&str],
    ) -> Result<BatchStatement> {
        let first = entities.first().ok_or(BridgeError::EmptyBatch)?;
        let table = self.qualified_table()?;
        let first_keys: Vec<&String> = first.keys().collect();

        let mut set_parts = Vec::new();
        for field in first.keys() {
            if by.contains(&field.as_str()) {
                continue;
            }
            let def = self
                .mapper
                .get(field)
                .ok_or_else(|| BridgeError::InvalidField(field.clone()))?;
            set_parts.push(format!("{} = :{field}", def.name));
        }

        let mut where_sql = String::new();
        for field in by {
            let def = self
                .mapper
                .get(field)
                .ok_or_else(|| BridgeError::InvalidField((*field).to_string()))?;
            where_sql.push_str(&format!("AND {} = :{CRITERIA_PREFIX}{field}\n", def.name));
        }

        let sql = format!(
            "UPDATE {table} \nSET {} \nWHERE 1=1\n{where_sql}",
            set_parts.join(",")
        );

        let mut bind_sets = Vec::with_capacity(entities.len());
        for entity in entities {
            if entity.keys().collect::<Vec<_>>() != first_keys {
                return Err(BridgeError::HeterogeneousBatch);
            }
            let mut binds = BindMap::new();
            for field in by {
                let value = entity
                    .get(*field)
                    .ok_or_else(|| BridgeError::MissingKey((*field).to_string()))?;
                let sql_type = self.mapper.get(field).map(|d| d.sql_type);
                binds.insert(
                    format!("{CRITERIA_PREFIX}{field}"),
                    BoundParam::input(value.clone(), sql_type),
                )?;
            }
            for (field, raw) in entity {
                if by.contains(&field.as_str()) {
                    continue;
                }
                let def = self
                    .mapper
                    .get(field)
                    .ok_or_else(|| BridgeError::InvalidField(field.clone()))?;
                binds.insert(
                    field.clone(),
                    BoundParam::input(def.physical_value(raw.clone()), Some(def.sql_type)),
                )?;
            }
            bind_sets.push(binds);
        }

        Ok(BatchStatement { sql, bind_sets })
    }

    /// Build a criteria-only DELETE; there is no unconditional delete-all
    /// path.
    pub fn build_delete(&self, criteria: &Map<String, Value>) -> Result<CompiledStatement> {
        if criteria.is_empty() {
            return Err(BridgeError::InvalidCriteria(
                "delete requires criteria".to_string(),
            ));
        }
        let table = self.qualified_table()?;
        let fragment = self.extract_plain(criteria, CRITERIA_PREFIX)?;
        Ok(CompiledStatement {
            sql: format!("DELETE FROM {table} {}", fragment.with_where()),
            binds: fragment.binds,
            options: StatementOptions::default(),
        })
    }

    /// Append compiled criteria and an order-by to caller-supplied SQL; a
    /// WHERE header is added only when the text has none.
    pub fn inject_params(
        &self,
        sql_text: &str,
        criteria: Option<&Criteria>,
        order: Option<&OrderBy>,
    ) -> Result<CompiledStatement> {
        let fragment = match criteria {
            Some(criteria) => self.resolve_criteria(criteria)?,
            None => None,
        };
        let order_sql = self.order_clause(order);

        let statement = match fragment {
            Some(fragment) => {
                let sql = if sql_text.contains("WHERE") {
                    format!("{sql_text} \n {} {order_sql}", fragment.sql)
                } else {
                    format!("{sql_text} \n{} {order_sql}", fragment.with_where())
                };
                CompiledStatement {
                    sql,
                    binds: fragment.binds,
                    options: StatementOptions::default(),
                }
            }
            None => CompiledStatement {
                sql: format!("{sql_text}{order_sql}"),
                binds: BindMap::new(),
                options: StatementOptions::default(),
            },
        };
        Ok(statement)
    }
}

fn join_values(head: &Option<String>, key_binds: &[String]) -> String {
    match head {
        Some(head) if key_binds.is_empty() => head.clone(),
        Some(head) => format!("{head},{}", key_binds.join(",")),
        None => key_binds.join(","),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ora::criteria::{CompareOp, Criterion};
    use crate::ora::mapper::{ColumnDef, ColumnMapper, PrimaryKey, SequenceRef};
    use serde_json::json;

    const COLUMNS: &[(&str, ColumnDef)] = &[
        ("transactionId", ColumnDef::new("TRANSACTION_ID", SqlType::Number)),
        ("company", ColumnDef::new("COMPANY", SqlType::Varchar2)),
        ("bizName", ColumnDef::new("BIZ_NAME", SqlType::Varchar2)),
        ("processStatus", ColumnDef::new("PROCESS_STATUS", SqlType::Varchar2)),
        ("requestBody", ColumnDef::new("REQUEST_BODY", SqlType::Clob)),
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
            sequence: Some(SequenceRef {
                schema: "CUX",
                name: "CUX_RCV_HIS_S",
            }),
        }),
        mapper: ColumnMapper::new(COLUMNS),
    };

    fn plain(pairs: &[(&str, Value)]) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), v.clone());
        }
        map
    }

    #[test]
    fn test_select_projects_identity_column_first() {
        let stmt = META
            .build_select(None, Some(&["company"]), None, None)
            .unwrap();
        assert!(stmt.sql.starts_with("SELECT TRANSACTION_ID, COMPANY"));
        assert!(stmt.sql.contains("FROM CUX.CUX_RCV_HIS"));
        assert!(stmt.binds.is_empty());
    }

    #[test]
    fn test_select_unknown_field_rejected() {
        let result = META.build_select(None, Some(&["nope"]), None, None);
        assert!(matches!(result, Err(BridgeError::InvalidField(_))));
    }

    #[test]
    fn test_select_row_limit_forms() {
        let one = META
            .build_select(None, None, Some(RowLimit { top: 1 }), None)
            .unwrap();
        assert!(one.sql.contains("WHERE ROWNUM = 1"));

        let criteria = Criteria::of(&[("processStatus", json!("PENDING"))]);
        let capped = META
            .build_select(Some(&criteria), None, Some(RowLimit { top: 100 }), None)
            .unwrap();
        assert!(capped.sql.contains("WHERE 1=1"));
        assert!(capped.sql.contains("AND PROCESS_STATUS = :p_processStatus"));
        assert!(capped.sql.contains("AND ROWNUM <= 100"));
    }

    #[test]
    fn test_select_clob_fetch_hint() {
        let stmt = META.build_select(None, None, None, None).unwrap();
        assert_eq!(stmt.options.clob_as_string, vec!["REQUEST_BODY"]);
    }

    #[test]
    fn test_select_order_by_resolves_domain_field() {
        let stmt = META
            .build_select(None, None, None, Some(&OrderBy::desc("bizName")))
            .unwrap();
        assert!(stmt.sql.ends_with("ORDER BY BIZ_NAME DESC"));
    }

    #[test]
    fn test_pagination_window_math() {
        let criteria = Criteria::of(&[("company", json!("1000"))]);
        let stmt = META
            .build_paginated_select(
                Some(&criteria),
                Pagination { page: 3, size: 20 },
                None,
                None,
            )
            .unwrap();
        assert!(stmt.sql.contains("COUNT(*) OVER () TOTAL"));
        assert!(stmt.sql.contains("WHERE ROWNUM < ((3 * 20) + 1 )"));
        assert!(stmt.sql.contains("WHERE ROWNUMID >= (((3-1) * 20) + 1)"));
        assert!(stmt.binds.contains("p_company"));
    }

    #[test]
    fn test_pagination_rejects_zero() {
        for (page, size) in [(0, 10), (1, 0)] {
            let result = META.build_paginated_select(None, Pagination { page, size }, None, None);
            assert!(matches!(result, Err(BridgeError::InvalidPagination)));
        }
    }

    #[test]
    fn test_insert_uses_sequence_and_returns_id() {
        let entity = plain(&[("bizName", json!("recv")), ("company", json!("1000"))]);
        let stmt = META.build_insert(&entity).unwrap();
        assert!(stmt.sql.contains("INSERT INTO CUX.CUX_RCV_HIS"));
        assert!(stmt.sql.contains("CUX.CUX_RCV_HIS_S.NEXTVAL"));
        assert!(stmt.sql.contains("RETURNING TRANSACTION_ID INTO :id"));
        assert!(stmt.sql.contains("TRANSACTION_ID,BIZ_NAME,COMPANY"));
        let id = stmt.binds.get("id").unwrap();
        assert_eq!(id.direction, crate::ora::binds::BindDirection::Out);
    }

    #[test]
    fn test_insert_rejects_preset_primary_key() {
        let entity = plain(&[("transactionId", json!(7)), ("company", json!("1000"))]);
        assert!(matches!(
            META.build_insert(&entity),
            Err(BridgeError::PrimaryKeyAlreadySet)
        ));
    }

    #[test]
    fn test_insert_without_sequence_returns_rowid() {
        let meta = EntityMetadata {
            primary_key: None,
            ..META
        };
        let entity = plain(&[("company", json!("1000"))]);
        let stmt = meta.build_insert(&entity).unwrap();
        assert!(stmt.sql.contains("RETURNING ROWID INTO :id"));
        assert!(!stmt.sql.contains("NEXTVAL"));
    }

    #[test]
    fn test_batch_insert_requires_homogeneous_keys() {
        let entities = vec![
            plain(&[("company", json!("1000")), ("bizName", json!("a"))]),
            plain(&[("company", json!("2000"))]),
        ];
        assert!(matches!(
            META.build_batch_insert(&entities),
            Err(BridgeError::HeterogeneousBatch)
        ));
    }

    #[test]
    fn test_batch_insert_one_bind_set_per_entity() {
        let entities = vec![
            plain(&[("company", json!("1000"))]),
            plain(&[("company", json!("2000"))]),
        ];
        let batch = META.build_batch_insert(&entities).unwrap();
        assert_eq!(batch.bind_sets.len(), 2);
        assert_eq!(
            batch.bind_sets[1].get("company").unwrap().value,
            json!("2000")
        );
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(matches!(
            META.build_batch_insert(&[]),
            Err(BridgeError::EmptyBatch)
        ));
    }

    #[test]
    fn test_update_set_and_where_prefixes_do_not_collide() {
        let patch = plain(&[("processStatus", json!("RUNNING"))]);
        let criteria = plain(&[("processStatus", json!("PENDING"))]);
        let stmt = META.build_update(&patch, &criteria).unwrap();
        assert!(stmt.sql.contains("SET PROCESS_STATUS = :processStatus"));
        assert!(stmt.sql.contains("AND PROCESS_STATUS = :p_processStatus"));
        assert_eq!(
            stmt.binds.get("processStatus").unwrap().value,
            json!("RUNNING")
        );
        assert_eq!(
            stmt.binds.get("p_processStatus").unwrap().value,
            json!("PENDING")
        );
    }

    #[test]
    fn test_update_by_id_uses_key_column() {
        let patch = plain(&[("company", json!("3000"))]);
        let criteria = plain(&[("id", json!(42))]);
        let stmt = META.build_update(&patch, &criteria).unwrap();
        assert!(stmt.sql.contains("AND TRANSACTION_ID = :p_id"));
    }

    #[test]
    fn test_batch_update_excludes_key_from_set() {
        let entities = vec![plain(&[
            ("transactionId", json!(1)),
            ("processStatus", json!("RUNNING")),
        ])];
        let batch = META
            .build_batch_update(&entities, &["transactionId"])
            .unwrap();
        assert!(batch.sql.contains("SET PROCESS_STATUS = :processStatus"));
        assert!(!batch.sql.contains("SET TRANSACTION_ID"));
        assert!(batch.sql.contains("AND TRANSACTION_ID = :p_transactionId"));
        assert_eq!(
            batch.bind_sets[0].get("p_transactionId").unwrap().value,
            json!(1)
        );
    }

    #[test]
    fn test_batch_update_missing_key_rejected() {
        let entities = vec![plain(&[("processStatus", json!("RUNNING"))])];
        assert!(matches!(
            META.build_batch_update(&entities, &["transactionId"]),
            Err(BridgeError::MissingKey(_))
        ));
    }

    #[test]
    fn test_delete_requires_criteria() {
        assert!(META.build_delete(&Map::new()).is_err());
        let stmt = META
            .build_delete(&plain(&[("transactionId", json!(9))]))
            .unwrap();
        assert!(stmt.sql.starts_with("DELETE FROM CUX.CUX_RCV_HIS"));
        assert!(stmt.sql.contains("AND TRANSACTION_ID = :p_transactionId"));
    }

    #[test]
    fn test_inject_params_adds_where_only_when_absent() {
        let criteria = Criteria::Single(Criterion::new(
            "company",
            CompareOp::Eq,
            json!("1000"),
        ));
        let bare = META
            .inject_params("SELECT COMPANY FROM CUX.CUX_RCV_HIS", Some(&criteria), None)
            .unwrap();
        assert!(bare.sql.contains("WHERE 1=1"));

        let with_where = META
            .inject_params(
                "SELECT COMPANY FROM CUX.CUX_RCV_HIS WHERE 1=1",
                Some(&criteria),
                None,
            )
            .unwrap();
        assert_eq!(with_where.sql.matches("WHERE").count(), 1);
    }
}
