mod alloc;
mod cli;
mod config;
mod error;
mod identity;
mod provision;
mod store;
mod ui;

use clap::Parser;

use crate::cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli::run(cli) {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
