
mod cli;

use std::process::ExitCode;

use clap::Parser;
use coloring_book::logger;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    logger::init();
    cli::run(args)
}
