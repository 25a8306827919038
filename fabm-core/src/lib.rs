//! Host-side binding layer for biogeochemical model cores.
//!
//! A model core owns the variable graph of a configured model; this crate discovers that graph,
//! allocates and links the memory it works on, keeps both consistent across reconfiguration,
//! and drives the model through its lifecycle.

pub mod backend;
pub mod context;
#[cfg(any(test, feature = "example-backend"))]
pub mod example_backend;
pub mod model;
pub mod parameter;
pub mod simulator;
pub mod snapshot;
pub mod variable;

pub mod errors;

pub use context::BindingContext;
pub use errors::{FabmError, FabmResult};
pub use model::{Model, ModelBuilder, Readiness, StartMode};
pub use simulator::{Simulator, TimeStep};
