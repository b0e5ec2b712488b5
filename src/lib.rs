//! AWS Cost and Usage Report ingestion: resolves both CUR layouts behind one
//! pipeline that extracts, schema-unifies, and loads billing data into a
//! destination table, tracking progress across runs with a cursor.

pub mod config;
pub mod cursor;
pub mod detect;
pub mod error;
pub mod extract;
pub mod load;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod select;
pub mod store;
pub mod writer;
