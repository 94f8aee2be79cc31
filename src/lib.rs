//! Wardrobe AI Job Orchestration
//!
//! This library turns wardrobe user actions (catalog image generation, item
//! attribute inference, care-label extraction, outfit variations and
//! visualizations) into durably tracked jobs: a Postgres record store holds
//! each job's status history, a Redis queue delivers work to workers with
//! retry and backoff, and a per-job lease keeps duplicate deliveries from
//! double-processing. Generation itself is delegated to Cloudflare Workers
//! AI.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
