// mongolite-core/src/lib.rs
// Pure Rust API - no binding-layer dependencies

// Allow clippy lints that are too strict for this codebase
#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_div_ceil)]
#![allow(clippy::needless_range_loop)]
// Tests may have helper functions not used in all test cases
#![cfg_attr(test, allow(dead_code))]

pub mod catalog;
pub mod collection;
pub mod cursor;
pub mod database;
pub mod error;
pub mod find_options;
pub mod index;
pub mod index_key;
pub mod logging;
pub mod names;
pub mod query;
pub mod query_planner;
pub mod store;
pub mod transaction;
pub mod tree_cache;
pub mod value_utils;

// Public exports
pub use collection::InsertManyResult;
pub use cursor::{CursorState, FindCursor};
pub use database::{Database, DatabaseConfig, IndexOptions, FLAG_NO_SYNC};
pub use error::{ErrorSource, MongoliteError, Result, StoreError};
pub use find_options::FindOptions;
pub use index::{IndexDescriptor, IndexSpec};
pub use logging::{set_component_level, set_log_level, LogLevel};
pub use query::{matches_filter, Matcher};
pub use query_planner::{QueryPlan, QueryPlanner};
pub use store::{Store, StoreOptions};
