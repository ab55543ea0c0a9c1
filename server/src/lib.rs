//! Match server library.
//!
//! This module exposes the match coordinator and its host for use in tests and binaries.

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod handler;
pub mod http;
pub mod match_loop;
pub mod presence;
pub mod registry;
pub mod state;
pub mod ws;
