//! Micron compiler driver.
//!
//! Ties the pieces together: the [`manager`] resolves and caches
//! modules (including parametric instantiations), drives the parser for
//! each one and collects the emitted MIL; [`tracing_setup`] configures
//! logging. The `micc` binary is a thin argument-parsing shell over
//! [`Compiler`].

pub mod manager;
pub mod tracing_setup;

pub use manager::{Compiler, ModuleManager};
