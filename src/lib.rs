//! Upgrades the on-disk layout of a sonar survey database in place.
//!
//! A database is a directory of projects, each holding track directories.
//! Every entity carries a schema file whose MD5 identifies its layout
//! generation; [`fixer::Fixer`] walks the tree and brings each entity to the
//! latest generation through a crash-safe [`journal::Journal`].

pub mod cancel;
pub mod chain;
pub mod config;
pub mod detect;
pub mod entity;
mod error;
pub mod fixer;
pub mod journal;
pub mod keyfile;
pub mod lock;
pub mod logging;
pub mod registry;
pub mod util;
pub mod version;

pub use error::{AppError, AppResult};
