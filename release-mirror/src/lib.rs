pub mod cli;
pub mod load_config;
pub mod wiring;

pub use cli::{run, Cli, Commands};
