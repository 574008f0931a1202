#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default
)]

pub mod bluetooth;
pub mod classifier;
pub mod config;
pub mod control;
pub mod daemon;
pub mod device;
pub mod engine;
pub mod health;
pub mod observability;
pub mod policy;
pub mod prompt;
pub mod registry;
