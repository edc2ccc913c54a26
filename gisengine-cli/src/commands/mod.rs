//! CLI command implementations.
//!
//! # Command Modules
//!
//! - [`common`] - Geometry input decoding and output rendering
//! - [`config`] - Configuration management (path, show, init)
//! - [`geometry`] - Geometry operations (validate, repair, buffer, simplify, reproject)

pub mod common;
pub mod config;
pub mod geometry;
