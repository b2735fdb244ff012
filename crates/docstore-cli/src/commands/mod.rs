//! Command handlers

pub mod attachment;
pub mod collection;
pub mod config;
pub mod interchange;
pub mod record;
