//! # knit-config
//!
//! Build options for the knit pipeline: the [`BuildConfig`] schema, layered
//! loading through [`ConfigLoader`] (defaults < config file < `KNIT_*`
//! environment), and validation strategies.

pub mod config;
pub mod error;
pub mod loading;
pub mod validation;

pub use config::*;
pub use error::*;

pub use loading::{ConfigLoader, discover};
pub use validation::{ConfigValidator, FsValidator, SchemaValidator, validate_fs, validate_schema};
