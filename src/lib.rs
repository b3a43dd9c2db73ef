#![forbid(unsafe_code)]

//! Moves one video package per run from a Google Drive inbox to YouTube.
//!
//! The binaries wire real clients into [`pipeline::Pipeline`]; everything
//! below it talks to the outside world through the [`drive::Storage`],
//! [`youtube::VideoHost`] and [`credentials::TokenProvider`] traits.

pub mod archive;
pub mod config;
pub mod credentials;
pub mod description;
pub mod download;
pub mod drive;
pub mod error;
pub mod folders;
pub mod logging;
pub mod oauth;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod youtube;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineError, Result};
