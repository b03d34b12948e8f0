pub mod ordered_pool;

pub use ordered_pool::{OrderedPool, OrderedPoolSnapshot};
