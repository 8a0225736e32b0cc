//! Predicate query engine.
//!
//! Turns dynamically typed filter/sort/page requests into relational queries
//! over commits and their key/value child tables.
//!
//! ```text
//! KeyValueQuery[] + SortKey + page
//!            │
//!            ▼
//!     ┌─────────────┐   Field::parse, value checks
//!     │  compiler   │──────────────────────────────► QueryError
//!     └─────────────┘
//!            │  ast::Select (page, count, probes)
//!            ▼
//!     ┌─────────────┐   render once: SQL + ?N params
//!     │     ast     │
//!     └─────────────┘
//!            │
//!            ▼
//!     ┌─────────────┐   probes -> count -> page
//!     │   engine    │──────────────────────────────► QueryPage
//!     └─────────────┘
//! ```

pub mod ast;
mod compiler;
mod engine;
mod error;
mod predicate;

pub use compiler::{compile, page_offset, AccessScope, CommitQuery, CompiledPlan};
pub use engine::{MatchedCommit, QueryEngine, QueryPage};
pub use error::{QueryError, QueryResult};
pub use predicate::{
    CommitColumn, Field, KeyValueKind, KeyValueQuery, Operator, PredicateValue, SortKey,
};
