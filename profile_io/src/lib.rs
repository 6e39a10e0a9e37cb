//! profile_io
#![deny(missing_docs)]

mod profile;
mod table;

pub use profile::{ProfileError, ProfileTable, METADATA_PREFIX};
pub use table::{read_table, Column, ColumnTable, ColumnValues, TableWriter};
