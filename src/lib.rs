//! Decision core for experimentation and feature flagging.
//!
//! # Overview
//!
//! Given a user id, the user's [`Attributes`] and a [`ProjectConfig`] snapshot, the crate decides
//! which variation (if any) the user is assigned to. Assignment is deterministic: the same inputs
//! always produce the same [`Decision`], in this process and in any other SDK sharing the bucketing
//! protocol.
//!
//! A decision goes through the following steps:
//! - audience targeting ([`audience`]), using three-valued logic so that a user who cannot be
//!   evaluated does not qualify;
//! - mutually-exclusive group bucketing and variation bucketing ([`sharder`]);
//! - for contextual bandit experiments, a remote prediction instead of static bucketing ([`cmab`]).
//!
//! [`ExperimentDecisionService`] decides for a single experiment, [`FeatureDecisionService`] for a
//! feature flag with its rollout rules.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! A user that is not eligible is not an error. Such outcomes are returned as a [`Decision`] that
//! is not decided, together with a [`Reason`]. The only runtime failure callers must handle is
//! [`Error::Cmab`], returned when the bandit service couldn't produce a decision.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with structured key-values
//! under the `decision_core` target. Consider integrating a `log`-compatible logger implementation
//! for better visibility into decisions.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod audience;
pub mod cmab;
pub mod config;
pub mod decision;
pub mod sharder;

mod attributes;
mod error;
mod options;

pub use attributes::{bucketing_id, AttributeValue, Attributes, BUCKETING_ID_ATTRIBUTE};
pub use config::ProjectConfig;
pub use decision::{
    Decision, DecisionSource, DecisionStatus, ExperimentDecisionService, FeatureDecisionService,
    Reason,
};
pub use error::{Error, Result};
pub use options::DecideOption;
