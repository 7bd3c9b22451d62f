//! Harbor monitor: ship position ingestion, docking status tracking and live
//! fleet broadcast.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod database;
pub mod directory;
pub mod docking;
pub mod errors;
pub mod geofence;
pub mod http;
pub mod ingest;
pub mod models;
pub mod notification;
pub mod water;
