//! Storage layer for the knowledge-base database

pub mod db;
pub mod models;

pub use db::{Database, Installation};
pub use models::*;
