//! # FORMCHECK CORE LIBRARY
//!
//! **DECLARATIVE FORM-FIELD VALIDATION ENGINE**
//!
//! **ARCHITECTURE**: Rule registry and parser, scoped validation orchestrator, ordered error bag,
//! locale-aware message resolution
//! **GUARANTEE**: Validation never fails outward; rule faults surface as field errors
//! **CONCURRENCY**: Async rules, concurrent field passes, last-started pass wins per field

pub mod api;
pub mod bag;
pub mod config;
pub mod errors;
pub mod messages;
pub mod rules;
pub mod types;

// **VALIDATION MODULE REGISTRATION**
pub mod validation;
