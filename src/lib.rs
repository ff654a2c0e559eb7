//! Meshledger - resumable stage runner for video-to-mesh reconstruction
//!
//! This library crate exposes the core functionality for integration testing.

pub mod batch;
pub mod config;
pub mod engine;
pub mod project;
pub mod reset;
pub mod runner;
