//! Core data types handed to the engine.

mod extract;

pub use extract::{Cell, Extract, ExtractColumn, Row};
