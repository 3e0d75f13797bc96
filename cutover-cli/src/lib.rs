//! Command-line front end of the cutover migrator.
//!
//! Maps flags onto [`cutover_engine::MigratorConfig`], wires the concrete
//! collaborators together and runs the requested mode.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod args;
pub mod error;
pub mod run;
