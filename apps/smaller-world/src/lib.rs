//! # smaller world
//!
//! The server binary's modules, exposed for tests and integration.
//!
//! - [`api`] - JSON endpoints over axum
//! - [`cli`] - command implementations
//! - [`jobs`] / [`worker`] - background queue and the jobs it runs
//! - [`push`] / [`sms`] / [`supabase`] - outbound gateways

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod push;
pub mod sms;
pub mod state;
pub mod supabase;
pub mod worker;

pub use smaller_world_core;
