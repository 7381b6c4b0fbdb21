pub mod config;
pub mod db;
pub mod gateway;
pub mod mapper;
pub mod model;
pub mod reconciler;
pub mod submitter;
pub mod sync;
