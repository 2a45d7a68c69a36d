//! Query orchestration for CRM record APIs.
//!
//! This crate turns classified natural-language requests ("open cases
//! assigned to Priya this month", "sum of won opportunities by stage") into
//! paginated calls against a CRM list endpoint, then aggregates, caches and
//! summarizes what comes back.
//!
//! # Overview
//!
//! A request flows through the engine in stages:
//!
//! 1. A [`Classifier`](classifier::Classifier) turns text into [`Task`]s.
//! 2. The [`FilterResolver`](resolver::FilterResolver) replaces person
//!    names with user identifiers.
//! 3. The [`WorkflowDispatcher`](dispatcher::WorkflowDispatcher) runs each
//!    task as a list, sum, count or chart, fanning out multi-value filters.
//! 4. Results land in the [`ResultCache`] so later aggregations can reuse
//!    them by handle.
//!
//! [`QueryEngine`] ties the stages together.
//!
//! # Module Organization
//!
//! - [`types`] - Filters, records and tasks
//! - [`catalog`] - Module schemas, aliases and term mapping
//! - [`upstream`] - The record API seam, over HTTP or in memory
//! - [`fetch`] - Paginated fetching, post-filtering and link enrichment
//! - [`fanout`] - Parallel execution of multi-value filters
//! - [`reconcile`] - Total-count verification
//! - [`aggregate`] - Sums and chart groupings
//! - [`engine`] - The top-level entry points

pub mod aggregate;
pub mod auth;
pub mod cache;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod fetch;
pub mod identity;
#[cfg(feature = "logging")]
pub mod logging;
pub mod reconcile;
pub mod resolver;
pub mod status;
pub mod types;
pub mod upstream;

// Re-exports for ergonomic access
pub use cache::ResultCache;
pub use catalog::{Catalog, ModuleSchema};
pub use config::EngineConfig;
pub use dispatcher::TaskOutcome;
pub use engine::{QueryEngine, QueryRequest, RunResponse, TaskResponse};
pub use error::{Error, Result};
pub use identity::{Continuation, TaskIdentity};
pub use status::StatusReporter;
pub use types::{FilterMap, FilterValue, QueryResult, Record, Task, TaskType};
pub use upstream::RecordApi;
