//! Folding of data blocks into larger ones.
//!
//! [`merge`] combines two blocks, renumbering string references of the
//! second into the string table of the first. [`BlockAccumulator`] drives it
//! over a stream of blocks under a size cap.

mod accumulator;
mod remap;
mod string_index;

pub use accumulator::{AccumulatorStats, BlockAccumulator};
pub use remap::{compatible, merge};
pub use string_index::StringIndex;
