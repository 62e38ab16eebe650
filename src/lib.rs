//! Scrapes news sites, re-hosts article images, enriches the text with a
//! generative-text API and stores everything in SQLite.

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scrape;
pub mod services;
