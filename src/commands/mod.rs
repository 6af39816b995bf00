//! Command handlers behind the `modman` subcommands.
//!
//! Each handler takes the runtime and the shared [`Config`], opens the
//! workspace it needs and reports progress on stdout.

pub mod config;
mod info;
mod init;
mod install;
mod list;
mod remote;
mod remove;
mod rescan;
pub mod services;
mod update;

pub use config::Config;
pub use info::{InfoField, info, render_field, render_record};
pub use init::{deinit, init};
pub use install::{InstallOptions, install};
pub use list::list;
pub use remote::{remote_add, remote_list, remote_remove};
pub use remove::remove;
pub use rescan::rescan;
pub use update::update;
