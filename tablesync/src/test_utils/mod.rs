pub mod database;
pub mod extract;
