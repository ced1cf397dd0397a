#![deny(unsafe_code, clippy::panic)]

pub mod auth;
pub mod changebus;
pub mod config;
pub mod editor;
pub mod error;
pub mod path_mapper;
pub mod server;
pub mod state;
pub mod subscribe;
pub mod verbs;
pub mod watcher;
pub mod xml;

pub use camino;
