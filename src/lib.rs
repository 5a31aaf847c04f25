//! kb-install - knowledge-base installer for the eco bot
//!
//! Creates the bot's SQLite database, runs the schema bootstrap script and
//! imports a directory of notes as the initial knowledge base.

pub mod config;
pub mod install;
pub mod kb;
pub mod storage;
