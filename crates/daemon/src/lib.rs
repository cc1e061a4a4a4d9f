// wikidoc-daemon library entry point: page content, edit locks and comments
// over a single SQLite meta.db, served over HTTP.

pub mod api;
pub mod comments;
pub mod config;
pub mod content;
pub mod events;
pub mod lock;
pub mod runtime;
pub mod service;
pub mod store;
pub mod sweeper;
