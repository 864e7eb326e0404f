//! Optimistic mutation and reconciliation for the job-search dashboard.
//!
//! Intents change the [`store::Store`] at once and return a ticket. The
//! [`dispatch::Dispatcher`] runs tickets against the backend and the
//! [`mutation::MutationManager`] settles each response, confirming or rolling
//! back what was applied.

pub mod aggregates;
pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod models;
pub mod mutation;
pub mod store;
