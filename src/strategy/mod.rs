//! Request classification and the fetch strategies it dispatches to.

mod fetch;
mod router;

pub use fetch::FetchStrategies;
pub use router::{Route, StrategyRouter};
