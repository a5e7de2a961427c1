//! Kerntrace - low-overhead GPU kernel execution tracer
//!
//! This library hooks a GPU driver's asynchronous command-list submission
//! pipeline, tracks every appended kernel, transfer and barrier until its
//! completion event signals, correlates device kernel ticks with host time,
//! and folds hardware counter reports into per-kernel rows.
//!
//! The driver itself is reached only through the [`driver::DriverApi`] and
//! [`driver::DriverHooks`] capability traits; [`sim::SimDriver`] is an
//! in-memory implementation of both.

pub mod cli;
pub mod clock;
pub mod collector;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod registry;
pub mod sim;
pub mod summary;
pub mod tracker;

pub use collector::{FinishCallback, KernelCollector};
pub use config::TracerConfig;
pub use error::{DriverError, Result, TracerError};
pub use hooks::{AppendOp, InFlightAppend, SubmitToken};
pub use tracker::{KernelFinish, KernelInfo, KernelInterval};
