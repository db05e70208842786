//! Queue policies: retry backoff and weighted lane selection.

mod retry;
mod weighted;

pub use retry::RetryPolicy;
pub use weighted::WeightedSelector;
