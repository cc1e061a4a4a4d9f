// wikidoc-common: shared types for the page content core

pub mod error;
pub mod event;
pub mod tree;
pub mod types;
