pub mod account;
pub mod app;
pub mod backend;
pub mod config;
pub mod csaw;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod notifications;
pub mod progress;
pub mod realtime;
pub mod relationships;
pub mod report;
pub mod roles;
pub mod skills;

#[cfg(test)]
mod testing;

pub use app::App;
pub use error::{Result, TrackError};
