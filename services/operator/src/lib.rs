//! cryo operator library.
//!
//! This crate primarily ships the `cryo-operator` binary, but we expose
//! the controller surface as a library to enable integration testing.

pub mod capture;
pub mod config;
pub mod controllers;
pub mod imagebuild;
pub mod runner;

// Re-export commonly used types
pub use capture::{CaptureService, MockCapture};
pub use imagebuild::{ImageBuilder, MockBuilder};
pub use runner::{Controller, Reconciler, RunnerConfig};
