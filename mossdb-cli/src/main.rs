use clap::Parser;
use mossdb_cli::Cli;

fn main() -> miette::Result<()> {
    Cli::parse().run()
}
