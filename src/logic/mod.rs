//! Logic Module - ingestion, scoring and calibration
//!
//! - `features/` - record validation and feature encoding
//! - `model/` - batching and the scoring oracle
//! - `dataset/` - persisted stores and the result router
//! - `server/` - TCP listener and connection handling
//! - `calibrate/` - offline fitting of vocabularies and model

pub mod config;
pub mod error;
pub mod pipeline;

pub mod calibrate;
pub mod dataset;
pub mod features;
pub mod model;
pub mod replay;
pub mod server;
