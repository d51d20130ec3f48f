#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use git_version::git_version;

pub mod app;
pub mod manager;
pub mod upkeep;

pub const VERSION: &str = git_version!(
    args = ["--tags", "--always", "--dirty=-modified"],
    fallback = env!("CARGO_PKG_VERSION")
);
