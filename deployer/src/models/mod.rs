//! Data model shared by the file server, the fetch client and the orchestrator

pub mod artifact;
pub mod endpoint;
pub mod outcome;
