//! Repo Sync - keeps platform codebases and their mirrored remote host
//! repositories in step.
//!
//! Webhooks from the remote host are verified, spooled to disk and handled by
//! a worker pool. Changes made on the platform are pushed back out as
//! branches and pull requests.

pub mod config;
pub mod context;
pub mod effects;
pub mod error;
pub mod git;
pub mod github;
pub mod importer;
pub mod notify;
pub mod platform;
pub mod pr_import;
pub mod pull_requests;
pub mod push;
pub mod server;
pub mod spool;
pub mod statuses;
pub mod store;
pub mod tokens;
pub mod types;
pub mod webhooks;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
