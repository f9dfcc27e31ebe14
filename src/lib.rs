// Library exports for Tannoy
// This allows integration tests and external code to use Tannoy modules

pub mod access;
pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extractors;
pub mod networks;
pub mod posts;
pub mod providers;
pub mod publish;
pub mod routes;
pub mod state;
pub mod storage;
