//! Core infrastructure shared by every install phase
//!
//! Configuration, terminal output, keg locking and version parsing.

pub mod config;
pub mod lock;
pub mod output;
pub mod version;
