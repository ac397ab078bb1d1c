//! Blog sitemap/feed ingestion: freshness tracking, post archiving and alerts.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod feed;
pub mod gate;
pub mod handlers;
pub mod http;
pub mod index_page;
pub mod model;
pub mod notify;
pub mod posts;
pub mod queue;
pub mod sitemap;
pub mod stats;
pub mod storage;
