pub mod batch;
pub mod bootstrap;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod lambda;
pub mod metrics;
pub mod models;
pub mod pre_annotation;
pub mod query;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
