//! Seeker - scheduled missing/upgrade searches for Sonarr and Radarr
//!
//! Search queues are fired by [`jobs::SearchScheduler`], executed by
//! [`services::SearchEngine`] and paused or resumed by
//! [`services::HealthMonitor`] as their instances go down and come back.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod services;

pub use error::SearchError;
