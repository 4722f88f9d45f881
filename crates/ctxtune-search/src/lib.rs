//! # ctxtune-search
//!
//! The auto-tuning loop: find the largest context window a model can use on
//! this machine without breaking any configured limit.
//!
//! - [`TrialRunner`] runs one timed generation and gathers telemetry for it
//! - [`evaluate`] maps a finished trial and the limits to continue or stop
//! - [`SearchState`] is the per-model step search as a pure value
//! - [`SearchController`] drives models one at a time and feeds reporters
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctxtune_core::{ModelInfo, TuneConfig};
//! use ctxtune_search::SearchController;
//! # use std::sync::Arc;
//! # async fn run(
//! #     client: Arc<dyn ctxtune_core::InferenceClient>,
//! #     sampler: Arc<dyn ctxtune_core::HardwareSampler>,
//! #     logs: Arc<dyn ctxtune_core::LogSource>,
//! # ) -> ctxtune_core::Result<()> {
//! let config = TuneConfig::default();
//! let mut controller = SearchController::from_config(&config, client, sampler, logs)?;
//! let outcomes = controller.run(&[ModelInfo::new("llama3")]).await?;
//! for outcome in outcomes {
//!     println!("{}: {:?}", outcome.model, outcome.sweet_spot_context());
//! }
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod evaluator;
pub mod runner;
pub mod state;

pub use controller::SearchController;
pub use evaluator::{check, evaluate, violations};
pub use runner::{RunnerOptions, TrialRunner};
pub use state::{SearchState, Transition};
