//! Workflow Tests
//!
//! End-to-end sessions against the in-memory remote:
//! - Lifecycle: create, stage, commit, branch, draft, reopen
//! - Online: server-side query and apply on committed sheets
//! - Config: workspace built from a config file

#[path = "../common/mod.rs"]
mod common;

mod config;
mod lifecycle;
mod online;
