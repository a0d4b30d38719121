#![forbid(unsafe_code)]

pub mod bridge;
pub mod browser;
pub mod chrome;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod media;
pub mod paths;
pub mod report;
pub mod session;
pub mod signal;
pub mod walker;
