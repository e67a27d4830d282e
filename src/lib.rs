//! politodown core library
//!
//! An asynchronous client for the Polito teaching portal: it signs in
//! through the university identity provider, walks the yearly catalogue of
//! course materials and videostores, and saves documents and recorded
//! lessons to local disk.
//!
//! # Architecture
//!
//! - [`session`] - authenticated [`Portal`] session with the SSO handshake
//! - [`portal`] - catalogue, material trees, videostores, and [`RemoteFile`]
//! - [`download`] - concurrent batch saving with retries
//! - [`urls`] - portal hosts and endpoints
//! - [`html`] - the HTML scanning used by the parsers
//! - [`config`] - TOML file configuration for the CLI
//!
//! ```no_run
//! use politodown::{Credentials, Portal, PortalOptions};
//!
//! # async fn example() -> Result<(), politodown::PortalError> {
//! let portal = Portal::new(PortalOptions::default())?;
//! portal.signin(Credentials::new("s123456", "secret"), None).await?;
//! for material in portal.materials(2023).await? {
//!     for assignment in material.assignments(&portal, false).await? {
//!         for file in assignment.files(&portal, true, false).await? {
//!             println!("{}", file.relative_path().display());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod error;
pub mod html;
pub mod portal;
pub mod session;
pub mod urls;
mod user_agent;

// Re-export commonly used types
pub use download::{DownloadEngine, EngineError, RetryPolicy, SaveStats};
pub use error::PortalError;
pub use portal::{
    Assignment, Child, FileKind, Folder, LegacyParams, LessonInfo, Material, Naming, RemoteFile,
    SaveOutcome, ServerMetadata, Videostore, VideostoreCategory, VideostoreSource,
    server_filename,
};
pub use session::{Credentials, Page, Portal, PortalOptions};
pub use urls::PortalUrls;
