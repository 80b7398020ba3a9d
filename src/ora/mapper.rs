//! Column mapping and entity metadata.
//!
//! Every table or view the bridge touches is described once, statically: the
//! physical column behind each domain field, its SQL type, and optional
//! value transforms applied when crossing the domain/physical boundary.
//! Entities are plain serde structs; the companion [`EntityMetadata`] value
//! is what the statement builders and the repository consume.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Canonical display format for DATE values crossing the domain boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical display format for TIMESTAMP values (millisecond precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// SQL types the legacy schema uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Varchar2,
    Number,
    Date,
    Timestamp,
    Clob,
}

impl SqlType {
    /// Character-typed binds get a generous max size so they stay reusable
    /// across statements.
    pub fn is_character(&self) -> bool {
        matches!(self, Self::Varchar2 | Self::Clob)
    }
}

/// Transform applied to a value when it crosses the domain/physical boundary.
pub type ValueTransform = fn(Value) -> Value;

/// Static description of one mapped column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    /// Physical column name, following Oracle's unquoted upper-case rules.
    pub name: &'static str,
    pub sql_type: SqlType,
    pub updatable: bool,
    pub insertable: bool,
    pub to_domain: Option<ValueTransform>,
    pub to_physical: Option<ValueTransform>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            updatable: true,
            insertable: true,
            to_domain: None,
            to_physical: None,
        }
    }

    pub const fn read_only(mut self) -> Self {
        self.updatable = false;
        self.insertable = false;
        self
    }

    pub const fn with_transforms(
        mut self,
        to_domain: ValueTransform,
        to_physical: ValueTransform,
    ) -> Self {
        self.to_domain = Some(to_domain);
        self.to_physical = Some(to_physical);
        self
    }

    /// Apply the declared domain-to-physical transform, if any.
    pub fn physical_value(&self, value: Value) -> Value {
        match self.to_physical {
            Some(f) => f(value),
            None => value,
        }
    }

    /// Apply the declared physical-to-domain transform, if any.
    pub fn domain_value(&self, value: Value) -> Value {
        match self.to_domain {
            Some(f) => f(value),
            None => value,
        }
    }
}

/// Ordered domain-field to column mapping.
///
/// Domain names must be unique within a mapper; physical names need not be
/// (two fields may read the same column through different transforms).
#[derive(Debug, Clone, Copy)]
pub struct ColumnMapper {
    columns: &'static [(&'static str, ColumnDef)],
}

impl ColumnMapper {
    pub const fn new(columns: &'static [(&'static str, ColumnDef)]) -> Self {
        Self { columns }
    }

    pub fn get(&self, field: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, def)| def)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Domain field names in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ColumnDef)> + '_ {
        self.columns.iter().map(|(name, def)| (*name, def))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Reject duplicate domain names. Called once per metadata at
    /// repository construction.
    pub fn validate(&self) -> Result<()> {
        for (i, (name, _)) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|(other, _)| other == name) {
                return Err(BridgeError::InvalidField(format!(
                    "duplicate domain field '{name}' in column mapper"
                )));
            }
        }
        Ok(())
    }
}

/// Reference to the sequence feeding a surrogate primary key.
#[derive(Debug, Clone, Copy)]
pub struct SequenceRef {
    pub schema: &'static str,
    pub name: &'static str,
}

impl SequenceRef {
    pub fn next_val_sql(&self) -> String {
        format!("{}.{}.NEXTVAL", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrimaryKey {
    /// Domain field carrying the key.
    pub field: &'static str,
    /// Physical column behind it.
    pub column: &'static str,
    pub sql_type: SqlType,
    /// When absent, surrogate identity comes from the database row
    /// identifier instead.
    pub sequence: Option<SequenceRef>,
}

/// Static description of a table or view.
///
/// A metadata with a `base_query` describes a view (the query becomes the
/// FROM-source) and must declare a primary key; a plain table may rely on
/// ROWID identity instead.
#[derive(Debug, Clone, Copy)]
pub struct EntityMetadata {
    /// Pool alias the repository resolves connections through.
    pub pool_alias: &'static str,
    pub schema: &'static str,
    pub table_name: Option<&'static str>,
    /// SELECT used as the FROM-source for view-style metadata.
    pub base_query: Option<&'static str>,
    pub primary_key: Option<PrimaryKey>,
    pub mapper: ColumnMapper,
}

impl EntityMetadata {
    /// FROM-source of SELECT statements.
    pub fn select_from(&self) -> Result<String> {
        if let Some(base) = self.base_query {
            return Ok(format!("({base})"));
        }
        match self.table_name {
            Some(table) => Ok(format!("{}.{}", self.schema, table)),
            None => Err(BridgeError::MissingTableName),
        }
    }

    /// Qualified table name for DML. Views are not writable through here
    /// unless they name an underlying table.
    pub fn qualified_table(&self) -> Result<String> {
        match self.table_name {
            Some(table) => Ok(format!("{}.{}", self.schema, table)),
            None => Err(BridgeError::MissingTableName),
        }
    }

    /// Physical column providing row identity: the primary key when
    /// declared, ROWID otherwise.
    pub fn id_column(&self) -> &'static str {
        self.primary_key.as_ref().map_or("ROWID", |pk| pk.column)
    }

    pub fn validate(&self) -> Result<()> {
        self.mapper.validate()?;
        if self.base_query.is_some() && self.primary_key.is_none() {
            return Err(BridgeError::MissingPrimaryKey);
        }
        Ok(())
    }
}

/// A domain row type with its companion static descriptor table.
pub trait Entity: Serialize + DeserializeOwned {
    fn metadata() -> &'static EntityMetadata;
}

/// Transform for DATE columns stored as display strings on the domain side.
pub fn date_to_domain(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s),
        Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

/// Inverse of [`date_to_domain`]; the physical side keeps the canonical
/// display format so binds stay loggable.
pub fn date_to_physical(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s),
        Value::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[(&str, ColumnDef)] = &[
        ("bizName", ColumnDef::new("BIZ_NAME", SqlType::Varchar2)),
        ("rowCount", ColumnDef::new("ROW_COUNT", SqlType::Number)),
        (
            "requestBody",
            ColumnDef::new("REQUEST_BODY", SqlType::Clob).read_only(),
        ),
    ];

    const META: EntityMetadata = EntityMetadata {
        pool_alias: "ERP",
        schema: "CUX",
        table_name: Some("CUX_TEST_T"),
        base_query: None,
        primary_key: Some(PrimaryKey {
            field: "id",
            column: "ID",
            sql_type: SqlType::Number,
            sequence: Some(SequenceRef {
                schema: "CUX",
                name: "CUX_TEST_S",
            }),
        }),
        mapper: ColumnMapper::new(COLUMNS),
    };

    #[test]
    fn test_mapper_lookup_and_order() {
        assert_eq!(META.mapper.get("bizName").unwrap().name, "BIZ_NAME");
        assert!(META.mapper.get("unknown").is_none());
        let fields: Vec<_> = META.mapper.fields().collect();
        assert_eq!(fields, vec!["bizName", "rowCount", "requestBody"]);
    }

    #[test]
    fn test_select_from_prefers_base_query() {
        assert_eq!(META.select_from().unwrap(), "CUX.CUX_TEST_T");

        let view = EntityMetadata {
            base_query: Some("SELECT 1 FROM DUAL"),
            ..META
        };
        assert_eq!(view.select_from().unwrap(), "(SELECT 1 FROM DUAL)");
    }

    #[test]
    fn test_view_requires_primary_key() {
        let view = EntityMetadata {
            base_query: Some("SELECT 1 FROM DUAL"),
            primary_key: None,
            ..META
        };
        assert!(matches!(
            view.validate(),
            Err(BridgeError::MissingPrimaryKey)
        ));
    }

    #[test]
    fn test_read_only_flags() {
        let def = META.mapper.get("requestBody").unwrap();
        assert!(!def.updatable);
        assert!(!def.insertable);
    }

    #[test]
    fn test_sequence_next_val() {
        let pk = META.primary_key.unwrap();
        assert_eq!(
            pk.sequence.unwrap().next_val_sql(),
            "CUX.CUX_TEST_S.NEXTVAL"
        );
    }
}
