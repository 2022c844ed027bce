//! Document-store backend: a Mongo-style filter dialect, its evaluator, and
//! the in-memory `ObjBackend` built on them.

pub mod ast;
pub mod compile;
pub mod eval;
pub mod parser;
pub mod query;
pub mod store;

pub use ast::{CmpOp, FieldExpr, Filter, FindOptions};
pub use compile::DocCompiler;
pub use eval::eval_filter;
pub use parser::{parse_filter, parse_find_options};
pub use query::{execute, QueryResult};
pub use store::MemObjBackend;
