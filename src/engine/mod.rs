pub mod batch;
pub mod controller;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod executor;
pub mod gates;
pub mod registry;
pub mod router;
pub mod sizer;
pub mod state;

pub use batch::*;
pub use controller::*;
pub use engine::*;
pub use executor::*;
pub use gates::*;
pub use registry::*;
pub use router::*;
pub use sizer::*;
pub use state::*;
