//! Lingua API Library Crate
//!
//! This library contains all the logic for the Lingua web service: the
//! application state, configuration, the file-backed profile store, the
//! in-memory speaking session registry, API handlers and routing. The `api`
//! binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod sessions;
pub mod state;
pub mod store;
