use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Serve bug-report logs, decompressing .gz files on the fly", long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "localhost:9110")]
    pub listen_addr: String,

    /// Root directory to serve files from
    #[arg(short, long)]
    pub serve_dir: PathBuf,
}
