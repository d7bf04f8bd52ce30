// src/config/mod.rs

//! Configuration loading and validation for enginesched.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk and render it back (`loader.rs`).
//! - Validate scheduler values and engine records without IO (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config_path, engines_with_packaged, load_and_validate, load_from_path, save_to_string,
};
pub use model::{ConfigFile, PackagedSection, RawConfigFile, SchedulerSection};
