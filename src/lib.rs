pub mod archive;
pub mod catalog;
pub mod cleanup;
pub mod commands;
pub mod download;
pub mod error;
pub mod http;
pub mod installer;
pub mod module;
pub mod resolver;
pub mod runtime;
pub mod self_update;
pub mod workspace;
