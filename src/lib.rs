//! This crate provides a data service for [SigPlot](https://github.com/LGSInnovations/sigplot).
//! It serves BLUEFILE scientific data files as colour-mapped image tiles, decimated regions,
//! single-line cuts and line plots, so that browsers can explore files far larger than they
//! could download.
//!
//! Files are read from named locations, either local directories or buckets in S3-compatible
//! object storage. Only the rows needed for a request are read; each is decoded, reduced from
//! complex to real values where needed, and decimated to the requested output size. Rendered
//! output is cached on disk and the cache is kept within a byte budget.
//!
//! The service is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team.
//! * [Rayon](rayon) spreads the rows of a render over a thread pool.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [AWS SDK for S3](aws-sdk-s3) is used to fetch files from S3-compatible object stores.
//! * [ndarray] provides the row-block views used when decimating across rows.

pub mod app;
pub mod app_state;
pub mod bluefile;
pub mod cli;
pub mod colormap;
pub mod complex;
pub mod cut;
pub mod datasource;
pub mod decimation;
pub mod decode;
pub mod encoder;
pub mod error;
pub mod locations;
pub mod metrics;
pub mod models;
pub mod render;
pub mod resource_manager;
pub mod s3_client;
pub mod server;
pub mod source;
#[cfg(test)]
pub mod test_utils;
pub mod tile_cache;
pub mod tracing;
pub mod types;
pub mod validated;
pub mod zrange;
