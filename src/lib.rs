//! RiskLens: turns anomaly alerts into auditable risk decisions.
//!
//! The [`engine`] is pure and synchronous; [`core::pipeline`] wires it to
//! the alert [`feed`], the append-only decision [`db`] and [`notifications`].

pub mod config;
pub mod core;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod notifications;
pub mod ruleset;

pub use crate::core::{Action, Alert, DecisionRecord, PatternType, RiskLevel};
pub use crate::engine::{DecisionEngine, EngineSettings};
pub use crate::error::EngineError;
pub use crate::ruleset::{ActiveRules, RuleSet, RuleSetDefinition};
