pub mod args;

pub use args::{Arguments, Command};
use clap::Parser;

pub fn parse() -> Arguments {
    Arguments::parse()
}
