pub mod config;
pub mod deployment;
pub mod endpoint;
pub mod node;
pub mod pod;
pub mod service;
pub mod status;
