pub mod anchors;
pub mod apply_curl;
pub mod audit;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod curl_map;
pub mod edges;
pub mod export;
pub mod highperf;
pub mod ingest;
pub mod issues;
pub mod logger;
pub mod pipeline;
pub mod recommend;
pub mod redirects;
pub mod report;
pub mod taxonomy;
pub mod url_utils;

pub use recommend::Recommendation;
pub use config::AppConfig;
