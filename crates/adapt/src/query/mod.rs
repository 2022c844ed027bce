pub mod ast;
pub mod coerce;
pub mod compile;
pub mod error;
pub mod resolve;

pub use ast::{
    DeletedAtQuery, DurationSpec, MetaQuery, NumberMetaQuery, ObjQuery, PartQuery, Predicate,
    RangeValue, SortDirection, SortField, StringMetaQuery, TopLevelFields,
};
pub use compile::{CompileOptions, QueryCompiler};
pub use error::QueryError;
pub use resolve::{Column, Condition, Constraint, RangeOp, ResolvedQuery, Target};
