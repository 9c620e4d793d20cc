pub mod backfill;
pub mod collector;
pub mod health;
pub mod market_data;
pub mod poller;
pub mod tiers;
pub mod universe;

pub use backfill::*;
pub use collector::*;
pub use health::*;
pub use market_data::*;
pub use poller::*;
pub use tiers::*;
pub use universe::*;
