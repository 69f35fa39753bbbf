//! Fanyi - translation dispatch core
//!
//! Routes selected text to one of several translation providers behind a
//! single coordinator that cancels superseded requests, shares identical
//! in-flight selections, and caches the Microsoft bearer token.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod direction;
pub mod dispatch;
pub mod error;
pub mod storage;
pub mod token;
pub mod translate;
