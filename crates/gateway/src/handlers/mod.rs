//! API handlers module

pub mod access_requests;
pub mod files;
pub mod forensics;
pub mod health;
pub mod manuscripts;
pub mod settings;
