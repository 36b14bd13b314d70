// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SnapSort: AI image categorizer
//!
//! Scans a directory for images, asks a vision model for one category per
//! image with bounded concurrency and a persistent result cache, then copies
//! or moves each image into a per-category folder.

pub mod apply;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod entry;
pub mod error;
pub mod history;
pub mod imaging;
pub mod naming;
pub mod persist;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use config::AppConfig;
pub use error::{Result, SnapsortError};
