//! Criteria-to-SQL compiler.
//!
//! A [`Criterion`] is one field/operator/value filter. Compilation resolves
//! the field through the column mapper, picks the operator's fragment
//! template and produces a SQL boolean fragment plus a named bind map. The
//! `%` literals of the LIKE variants are concatenated around the bind, never
//! folded into the bind value, so the bound value stays reusable and
//! loggable as-is.

use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::ora::binds::{BindMap, BoundParam};
use crate::ora::mapper::{ColumnMapper, SqlType};

/// Comparison operators the compiler understands.
///
/// The `Or*` variants emit `OR` instead of `AND` as the clause connective.
/// They exist for chaining an alternative predicate after a primary AND-ed
/// one, not for general boolean composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Gt,
    Ne,
    Le,
    Ge,
    Like,
    LikePrefix,
    LikeSuffix,
    LikeContains,
    In,
    NotIn,
    Exists,
    NotExists,
    OrEq,
    OrLt,
    OrGt,
    OrNe,
    OrLe,
    OrGe,
}

impl CompareOp {
    /// Clause connective this operator joins with.
    pub fn connective(&self) -> &'static str {
        match self {
            Self::OrEq | Self::OrLt | Self::OrGt | Self::OrNe | Self::OrLe | Self::OrGe => "OR",
            _ => "AND",
        }
    }

    /// Plain comparison symbol, when the operator is one.
    fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::Eq | Self::OrEq => Some("="),
            Self::Lt | Self::OrLt => Some("<"),
            Self::Gt | Self::OrGt => Some(">"),
            Self::Ne | Self::OrNe => Some("<>"),
            Self::Le | Self::OrLe => Some("<="),
            Self::Ge | Self::OrGe => Some(">="),
            _ => None,
        }
    }

    fn in_keyword(&self) -> Option<&'static str> {
        match self {
            Self::In => Some("IN"),
            Self::NotIn => Some("NOT IN"),
            _ => None,
        }
    }

    fn exists_keyword(&self) -> Option<&'static str> {
        match self {
            Self::Exists => Some("EXISTS"),
            Self::NotExists => Some("NOT EXISTS"),
            _ => None,
        }
    }
}

/// Subquery value for IN/NOT IN/EXISTS/NOT EXISTS: its SQL text is inlined
/// verbatim and its binds are merged into the outer map under their own
/// names.
#[derive(Debug, Clone)]
pub struct Subquery {
    pub sql: String,
    pub binds: Vec<(String, Value)>,
}

impl Subquery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            binds: Vec::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.binds.push((name.into(), value));
        self
    }
}

#[derive(Debug, Clone)]
pub enum CriterionValue {
    Scalar(Value),
    List(Vec<Value>),
    Subquery(Subquery),
}

impl From<Value> for CriterionValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<Value>> for CriterionValue {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<Subquery> for CriterionValue {
    fn from(subquery: Subquery) -> Self {
        Self::Subquery(subquery)
    }
}

/// One field/operator/value filter condition.
#[derive(Debug, Clone)]
pub struct Criterion {
    pub field: String,
    pub op: CompareOp,
    pub value: CriterionValue,
}

impl Criterion {
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<CriterionValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// Compiled boolean fragment plus its binds.
#[derive(Debug, Clone, Default)]
pub struct WhereFragment {
    /// Fragment lines, each starting with its own connective.
    pub sql: String,
    pub binds: BindMap,
}

impl WhereFragment {
    /// Render under the `WHERE 1=1` header used by full statements.
    pub fn with_where(&self) -> String {
        format!("WHERE 1=1\n{}", self.sql)
    }
}

/// Compile a single criterion against a column mapper.
///
/// Unknown fields fall through verbatim as the physical name - the escape
/// hatch for filtering on raw join columns.
pub fn compile_criterion(
    mapper: &ColumnMapper,
    criterion: &Criterion,
    bind_prefix: &str,
) -> Result<WhereFragment> {
    let def = mapper.get(&criterion.field);
    let column = def.map_or(criterion.field.as_str(), |d| d.name);
    let sql_type = def.map(|d| d.sql_type);
    let bind_key = format!("{bind_prefix}{}", criterion.field);
    let connective = criterion.op.connective();

    let mut binds = BindMap::new();
    let sql;

    match &criterion.value {
        CriterionValue::Scalar(raw) => {
            let value = def.map_or_else(|| raw.clone(), |d| d.physical_value(raw.clone()));
            sql = match criterion.op {
                CompareOp::Like => {
                    format!("{connective} NVL({column},'') LIKE ''||:{bind_key}||'' ")
                }
                CompareOp::LikePrefix => {
                    format!("{connective} NVL({column},'') LIKE ''||:{bind_key}||'%' ")
                }
                CompareOp::LikeSuffix => {
                    format!("{connective} NVL({column},'') LIKE '%'||:{bind_key}||'' ")
                }
                CompareOp::LikeContains => {
                    format!("{connective} NVL({column},'') LIKE '%'||:{bind_key}||'%' ")
                }
                CompareOp::In | CompareOp::NotIn => {
                    return Err(BridgeError::InvalidCriteria(format!(
                        "operator {:?} requires a list or subquery value",
                        criterion.op
                    )));
                }
                CompareOp::Exists | CompareOp::NotExists => {
                    return Err(BridgeError::InvalidCriteria(format!(
                        "operator {:?} requires a subquery value",
                        criterion.op
                    )));
                }
                op => {
                    let symbol = op.symbol().unwrap_or("=");
                    format!("{connective} {column} {symbol} :{bind_key} ")
                }
            };
            binds.insert(bind_key, BoundParam::input(value, sql_type))?;
        }
        CriterionValue::List(items) => {
            let keyword = criterion.op.in_keyword().ok_or_else(|| {
                BridgeError::InvalidCriteria(format!(
                    "list value is only legal with IN or NOT IN, got {:?}",
                    criterion.op
                ))
            })?;
            let mut keys = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let element_key = format!("{bind_key}_{i}");
                let value = def.map_or_else(|| item.clone(), |d| d.physical_value(item.clone()));
                binds.insert(element_key.clone(), BoundParam::input(value, sql_type))?;
                keys.push(format!(":{element_key}"));
            }
            sql = format!("{connective} {column} {keyword} ({}) ", keys.join(","));
        }
        CriterionValue::Subquery(subquery) => {
            if let Some(keyword) = criterion.op.exists_keyword() {
                sql = format!("{connective} {keyword} ({}) ", subquery.sql);
            } else if let Some(keyword) = criterion.op.in_keyword() {
                sql = format!("{connective} {column} {keyword} ({}) ", subquery.sql);
            } else {
                return Err(BridgeError::InvalidCriteria(format!(
                    "subquery value is only legal with IN/NOT IN/EXISTS/NOT EXISTS, got {:?}",
                    criterion.op
                )));
            }
            for (name, value) in &subquery.binds {
                binds.insert(name.clone(), BoundParam::input(value.clone(), sql_type))?;
            }
        }
    }

    Ok(WhereFragment {
        sql: format!("{sql}\n"),
        binds,
    })
}

/// Compile a list of criteria: fragments are concatenated in order and bind
/// maps merged, with the composer assigning `p{index}_` prefixes so member
/// binds cannot collide.
pub fn compile_criteria_list(mapper: &ColumnMapper, items: &[Criterion]) -> Result<WhereFragment> {
    let mut fragment = WhereFragment::default();
    for (index, criterion) in items.iter().enumerate() {
        let member = compile_criterion(mapper, criterion, &format!("p{index}_"))?;
        fragment.sql.push_str(&member.sql);
        fragment.binds.merge(member.binds)?;
    }
    Ok(fragment)
}

/// The three criteria shapes the statement builders accept, resolved once
/// at the builder boundary.
#[derive(Debug, Clone)]
pub enum Criteria {
    /// Plain AND-ed equality record.
    Plain(Map<String, Value>),
    /// One compiled criterion.
    Single(Criterion),
    /// Ordered criterion list with composer-assigned prefixes.
    List(Vec<Criterion>),
}

impl Criteria {
    /// Equality record from field/value pairs.
    pub fn of(pairs: &[(&str, Value)]) -> Self {
        let mut map = Map::new();
        for (field, value) in pairs {
            map.insert((*field).to_string(), value.clone());
        }
        Self::Plain(map)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain(map) => map.is_empty(),
            Self::Single(_) => false,
            Self::List(items) => items.is_empty(),
        }
    }
}

impl From<Map<String, Value>> for Criteria {
    fn from(map: Map<String, Value>) -> Self {
        Self::Plain(map)
    }
}

impl From<Criterion> for Criteria {
    fn from(criterion: Criterion) -> Self {
        Self::Single(criterion)
    }
}

impl From<Vec<Criterion>> for Criteria {
    fn from(items: Vec<Criterion>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ora::mapper::ColumnDef;
    use serde_json::json;

    const COLUMNS: &[(&str, ColumnDef)] = &[
        ("bizName", ColumnDef::new("BIZ_NAME", SqlType::Varchar2)),
        ("orgId", ColumnDef::new("ORG_ID", SqlType::Number)),
        (
            "processStatus",
            ColumnDef::new("PROCESS_STATUS", SqlType::Varchar2),
        ),
    ];

    fn mapper() -> ColumnMapper {
        ColumnMapper::new(COLUMNS)
    }

    #[test]
    fn test_scalar_eq_single_bind() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new("orgId", CompareOp::Eq, json!(82)),
            "p_",
        )
        .unwrap();
        assert!(fragment.sql.contains("AND ORG_ID = :p_orgId"));
        assert_eq!(fragment.binds.len(), 1);
        assert_eq!(fragment.binds.get("p_orgId").unwrap().value, json!(82));
    }

    #[test]
    fn test_like_contains_wraps_bind_with_percent_literals() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new("bizName", CompareOp::LikeContains, json!("SRM")),
            "p_",
        )
        .unwrap();
        assert!(fragment
            .sql
            .contains("NVL(BIZ_NAME,'') LIKE '%'||:p_bizName||'%'"));
        // the bind value itself carries no wildcard
        assert_eq!(fragment.binds.get("p_bizName").unwrap().value, json!("SRM"));
    }

    #[test]
    fn test_or_variant_connective() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new("orgId", CompareOp::OrGt, json!(100)),
            "p_",
        )
        .unwrap();
        assert!(fragment.sql.starts_with("OR ORG_ID > :p_orgId"));
    }

    #[test]
    fn test_in_list_one_bind_per_element() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new(
                "processStatus",
                CompareOp::In,
                vec![json!("PENDING"), json!("ERROR")],
            ),
            "p_",
        )
        .unwrap();
        assert!(fragment
            .sql
            .contains("PROCESS_STATUS IN (:p_processStatus_0,:p_processStatus_1)"));
        assert_eq!(fragment.binds.len(), 2);
        assert_eq!(
            fragment.binds.get("p_processStatus_1").unwrap().value,
            json!("ERROR")
        );
    }

    #[test]
    fn test_list_value_on_non_in_operator_is_rejected() {
        let result = compile_criterion(
            &mapper(),
            &Criterion::new("orgId", CompareOp::Gt, vec![json!(1)]),
            "p_",
        );
        assert!(matches!(result, Err(BridgeError::InvalidCriteria(_))));
    }

    #[test]
    fn test_exists_requires_subquery() {
        let scalar = compile_criterion(
            &mapper(),
            &Criterion::new("orgId", CompareOp::Exists, json!(1)),
            "p_",
        );
        assert!(scalar.is_err());

        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new(
                "orgId",
                CompareOp::Exists,
                Subquery::new("SELECT 1 FROM CUX.CUX_ORG_T o WHERE o.ORG_ID = :sub_orgId")
                    .bind("sub_orgId", json!(82)),
            ),
            "p_",
        )
        .unwrap();
        assert!(fragment.sql.contains(
            "EXISTS (SELECT 1 FROM CUX.CUX_ORG_T o WHERE o.ORG_ID = :sub_orgId)"
        ));
        assert_eq!(fragment.binds.get("sub_orgId").unwrap().value, json!(82));
    }

    #[test]
    fn test_in_subquery_inlines_sql() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new(
                "orgId",
                CompareOp::NotIn,
                Subquery::new("SELECT ORG_ID FROM CUX.CUX_EXCLUDED_T"),
            ),
            "p_",
        )
        .unwrap();
        assert!(fragment
            .sql
            .contains("ORG_ID NOT IN (SELECT ORG_ID FROM CUX.CUX_EXCLUDED_T)"));
        assert!(fragment.binds.is_empty());
    }

    #[test]
    fn test_unknown_field_passes_through_verbatim() {
        let fragment = compile_criterion(
            &mapper(),
            &Criterion::new("RAW_COLUMN", CompareOp::Eq, json!("x")),
            "p_",
        )
        .unwrap();
        assert!(fragment.sql.contains("RAW_COLUMN = :p_RAW_COLUMN"));
    }

    #[test]
    fn test_list_composition_assigns_member_prefixes() {
        let fragment = compile_criteria_list(
            &mapper(),
            &[
                Criterion::new("processStatus", CompareOp::Eq, json!("PENDING")),
                Criterion::new("orgId", CompareOp::OrGt, json!(10)),
            ],
        )
        .unwrap();
        assert!(fragment.sql.contains(":p0_processStatus"));
        assert!(fragment.sql.contains(":p1_orgId"));
        assert_eq!(fragment.binds.len(), 2);
        assert!(fragment.with_where().starts_with("WHERE 1=1\n"));
    }

    #[test]
    fn test_every_bind_is_referenced_in_sql() {
        let fragment = compile_criteria_list(
            &mapper(),
            &[
                Criterion::new("bizName", CompareOp::LikePrefix, json!("CUX")),
                Criterion::new(
                    "processStatus",
                    CompareOp::In,
                    vec![json!("PENDING"), json!("RUNNING")],
                ),
            ],
        )
        .unwrap();
        for (name, _) in fragment.binds.iter() {
            assert!(
                fragment.sql.contains(&format!(":{name}")),
                "bind {name} not referenced"
            );
        }
    }
}
