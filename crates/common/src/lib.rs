//! Shared configuration, error types, naming and record primitives for flowplan crates.
//!
//! Architecture role:
//! - defines planner configuration passed into a compilation
//! - provides common [`PlanError`] / [`Result`] contracts
//! - hosts the [`Record`] model evaluated by predicates and field functions
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`record`]

pub mod config;
pub mod error;
pub mod ids;
pub mod record;

pub use config::PlannerConfig;
pub use error::{PlanError, Result};
pub use ids::NameCreator;
pub use record::{Properties, Record};
