//! Playback core of a music database: per-kind playback queues, random
//! refills that avoid recent plays, a learned "played together" graph and a
//! streaming worker that pushes frames to a broadcast endpoint.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
