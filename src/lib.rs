//! bdns-sync - mirror of the BDNS public-grants registry
//!
//! Incrementally and fully mirrors the national subsidies registry (an
//! external, paginated, rate-limited API with an inconsistent schema) into
//! a local SQLite store, with resumable progress tracking, bounded
//! concurrency, per-record fault isolation and idempotent upserts. The
//! mirrored table is read, read-only, by the search portal on top.

pub mod application;
pub mod domain;
pub mod infrastructure;
