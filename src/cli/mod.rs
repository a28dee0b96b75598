//! Command-line interface module.

mod args;
pub mod demo;
pub mod inspect;
pub mod keygen;
pub mod serve;

pub use args::{Cli, Commands, ServeArgs};
