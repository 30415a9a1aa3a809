//! Reconciliation controllers.

pub mod service;
