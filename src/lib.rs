//! Host for biogeochemical model cores.
//!
//! The binding layer lives in [`fabm_core`] and is re-exported here. [`native`] connects it to
//! a compiled core through the core's C entry points.

pub mod native;

pub use fabm_core::*;
