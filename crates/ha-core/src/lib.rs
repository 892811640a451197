//! Core types for Home Assistant
//!
//! This crate provides the vocabulary shared between the host and its
//! integrations. Currently that is the set of entity platforms a config
//! entry can be forwarded to.

mod platform;

pub use platform::{Platform, UnknownPlatform};
