use clap::Parser;
use std::io;

mod args;
mod compression;
mod error;
mod file_serving;
mod logging;
mod server;
mod transport;

use args::Args;
use server::start_server;

fn main() -> io::Result<()> {
    logging::setup_logging();
    let args = Args::parse();
    start_server(args)
}
