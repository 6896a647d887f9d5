// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # praxis
//!
//! A reasoning engine over one compiled document: rule inference, finite
//! constraint solving, STRIPS planning, resource scheduling and decision
//! analysis.
//!
//! ## Architecture
//!
//! - **Facts** (`fact`): ground facts, patterns with `?variables`, unification
//! - **Inference** (`infer`): forward chaining to a fixpoint, backward proofs
//! - **Constraints** (`csp`): backtracking with forward checking, minimal conflicts
//! - **Planning** (`plan`): uninformed, best-first and bounded state-space search
//! - **Scheduling** (`schedule`): critical path, resource leveling, linear
//!   programs, Monte Carlo, sensitivity
//! - **Decisions** (`decide`): expected utility over decision trees, risk ranking
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use praxis::config::EngineConfig;
//! use praxis::document::CompiledDocument;
//! use praxis::engine::{Engine, Query};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let doc = CompiledDocument::load(Path::new("project.toml")).unwrap();
//! let answer = engine.run(&doc, &Query::Schedule).unwrap();
//! println!("{}", serde_json::to_string_pretty(&answer).unwrap());
//! ```

pub mod config;
pub mod csp;
pub mod decide;
pub mod document;
pub mod engine;
pub mod error;
pub mod fact;
pub mod infer;
pub mod plan;
pub mod schedule;

pub use config::EngineConfig;
pub use document::CompiledDocument;
pub use engine::{Answer, Engine, Query};
pub use error::{PraxisError, PraxisResult};
