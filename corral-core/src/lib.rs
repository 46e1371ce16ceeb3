//! Corral Core - Core library for corral multi-agent orchestration
//!
//! This crate runs coding agents side by side, each in its own tmux window
//! and git worktree. It tracks what every agent is doing, hands finished work
//! to review, merges it into its base branch and previews it in the main
//! working directory.

pub mod activity;
pub mod agent;
pub mod config;
pub mod error;
pub mod git;
pub mod notify;
pub mod orchestrator;
pub mod persist;
pub mod tmux;

pub use agent::{Agent, AgentId, AgentStatus, AgentStore, WaitingFor};
pub use config::{CliOverrides, Config};
pub use error::{Error, Result};
pub use notify::{Notification, Notifier};
pub use orchestrator::{MergeReport, Monitor, Orchestrator};
