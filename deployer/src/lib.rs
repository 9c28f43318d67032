//! Remote Deployer Library
//!
//! Stages a deployable artifact on a short-lived HTTP file server and drives a
//! remote container's management endpoint to pull and install it.

pub mod config;
pub mod deploy;
pub mod errors;
pub mod fileserver;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod remote;
