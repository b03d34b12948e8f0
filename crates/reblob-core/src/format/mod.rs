//! On-disk container formats.

pub mod pbf;
