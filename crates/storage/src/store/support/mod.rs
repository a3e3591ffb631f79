#![forbid(unsafe_code)]

mod schema;
mod tx;

pub(crate) use schema::{migrate_schema, SCHEMA_VERSION};
pub(crate) use tx::immediate_tx;
