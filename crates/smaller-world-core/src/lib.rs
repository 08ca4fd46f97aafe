//! # smaller world core
//!
//! The domain engine behind smaller world: a user owns a world, friends are
//! invited into it, and posts go out to them as push notifications or SMS.
//!
//! This crate is synchronous and performs no network I/O. Domain operations
//! in [`service`] read and write a [`Store`] and hand back the side effects
//! they need (pushes, text blasts, SMS) as [`service::Effect`] values for the
//! application to run.
//!
//! ## Layout
//!
//! - [`model`]: persisted records
//! - [`policy`]: who may see and act on a post
//! - [`service`]: domain operations
//! - [`notice`], [`payload`]: notification messages and push payloads
//! - [`token`], [`links`]: signed tokens and public URLs
//! - [`storage`]: memory and redb backends

pub mod error;
pub mod ids;
pub mod links;
pub mod model;
pub mod notice;
pub mod payload;
pub mod policy;
pub mod service;
pub mod storage;
pub mod text;
pub mod token;
pub mod validate;

pub use error::{Error, Result, ValidationErrors};
pub use links::Links;
pub use model::{Noticeable, Notifiable, PostType, Visibility};
pub use policy::{PostPolicy, Rule, Viewer};
pub use service::{Context, Cursor, Effect, Outcome, Page, Settings};
pub use storage::{MemoryStore, RedbStore, Store, StoreError, StoreExt};
pub use token::{Purpose, Signer, TokenError};
