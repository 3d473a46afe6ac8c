//! Command-line interface.

pub mod args;

pub use args::{Args, Command, ConnectionArg, TargetArgs};
