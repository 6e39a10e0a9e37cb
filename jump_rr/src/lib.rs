//! jump_rr
//!
//! Rank every CRISPR/ORF perturbation against all others by morphological profile
//! distance and publish the closest and farthest matches with example images and
//! gene links.

#![deny(missing_docs)]

pub mod config;
pub mod consensus;
pub mod cycle;
pub mod enrich;
mod errors;
pub mod match_table;
pub mod pipeline;
pub mod publish;
pub mod similarity;
#[cfg(test)]
mod test_pipeline;

pub use errors::JumpRrError;
