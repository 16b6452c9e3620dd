//! opsflow server.
//!
//! This crate provides the JSON API for canvas sync and schedules, the
//! PostgreSQL stores behind it, and the process wiring that runs the
//! scheduler job alongside the HTTP listener.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
