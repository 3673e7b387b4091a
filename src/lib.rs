//! Prometheus exporter for the Azure DevOps REST API.
//!
//! Every metric family group is a [`collectors::Processor`] driven by its own
//! [`collectors::runner::Runner`]. Runners share one request gate, one
//! service discovery cache and one registry, which [`exporter`] serves over
//! HTTP.

pub mod cli;
pub mod collectors;
pub mod devops;
pub mod discovery;
pub mod exporter;
pub mod scheduler;

pub mod built_info {
    #![allow(clippy::doc_markdown)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
