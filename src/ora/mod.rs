//! # Oracle Data Layer
//!
//! The typed query/command layer over the legacy relational schema:
//!
//! - [`mapper`] - column mapping and entity metadata descriptors
//! - [`binds`] - named bind-variable maps shared by all compiled statements
//! - [`criteria`] - the criteria-to-SQL compiler (single filters and lists)
//! - [`statement`] - full SELECT/INSERT/UPDATE/DELETE builders with
//!   pagination and batch variants
//! - [`repository`] - execution of compiled statements through a pooled
//!   connection, with row-to-entity mapping
//!
//! Statements are compiled entirely in memory; nothing in this module
//! performs I/O except [`repository`].

pub mod binds;
pub mod criteria;
pub mod mapper;
pub mod repository;
pub mod statement;

pub use binds::{BindDirection, BindMap, BoundParam};
pub use criteria::{
    compile_criteria_list, compile_criterion, CompareOp, Criteria, Criterion, CriterionValue,
    Subquery, WhereFragment,
};
pub use mapper::{ColumnDef, ColumnMapper, Entity, EntityMetadata, PrimaryKey, SequenceRef, SqlType};
pub use repository::{map_row, FindOptions, PageResult, Repository};
pub use statement::{
    BatchStatement, CompiledStatement, OrderBy, OrderDirection, Pagination, RowLimit,
    StatementOptions,
};
