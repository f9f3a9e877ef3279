//! protect-live - browser live viewer for UniFi Protect NVRs
//!
//! The server logs in to the NVR on behalf of a cookie session, lists its
//! cameras and relays live fragmented MP4 to the browser, which plays it
//! through Media Source Extensions.

pub mod auth;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod monitor;
pub mod protect;
pub mod state;
pub mod stream;
pub mod utils;
pub mod web;

pub use error::{AppError, Result};
