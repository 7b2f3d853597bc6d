mod base;
mod connection;
mod profile;
mod syncer;

pub use base::*;
pub use connection::*;
pub use profile::*;
pub use syncer::*;
