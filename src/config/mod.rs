//! Application configuration

mod schema;

pub use schema::*;
