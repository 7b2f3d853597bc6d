//! Postgres helpers used by the sync engine: validated and quoted table names, catalog
//! introspection and, behind `test-utils`, throwaway test databases.

pub mod catalog;
pub mod db;
pub mod schema;
#[cfg(feature = "test-utils")]
pub mod sqlx;
