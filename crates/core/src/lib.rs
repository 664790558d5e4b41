//! Lingua Core Library Crate
//!
//! Domain logic for the Lingua English tutor: the model catalog and fallback
//! invoker in front of the Gemini API, prompt templates, grading schemas and
//! rubrics, the speaking session protocol, curriculum tables, the class
//! roster, student profiles and unit score scaling.

pub mod audio;
pub mod client;
pub mod curriculum;
pub mod error;
pub mod grading;
pub mod invoker;
pub mod models;
pub mod profile;
pub mod prompts;
pub mod roster;
pub mod scoring;
pub mod session;
pub mod tutor;
