//! Meshledger-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across meshledger:
//!
//! - **Work item IDs**: A validated newtype for the identifier of one
//!   independently processable unit (one video transect)
//! - **Stages**: The fixed, ordered set of pipeline stages
//! - **Timestamps**: The ledger's timestamp and duration formats
//! - **Path Utilities**: Functions to detect video and image inputs by extension
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use meshledger_common::{Error, Result, Stage, WorkItemId};
//! use meshledger_common::paths::is_image_file;
//! use std::path::Path;
//!
//! let item = WorkItemId::new("TCRMP20241014_3D_BWR_T2").unwrap();
//! assert_eq!(item.site(), "BWR");
//!
//! assert_eq!(Stage::Reconstruction.previous(), Some(Stage::Extraction));
//! assert!(is_image_file(Path::new("frame_0001.tif")));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("item"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod stage;
pub mod time;

pub use error::{Error, Result};
pub use ids::WorkItemId;
pub use stage::Stage;
