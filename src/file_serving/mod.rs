pub mod generic;
pub mod handlers;
mod path_utils;

use std::io::{self, Write};

use crate::error::{to_http_error, ServeError};
use crate::transport::ResponseWriter;

pub use handlers::LogServer;

fn reply_error<W: Write>(w: &mut ResponseWriter<W>, err: &ServeError) -> io::Result<()> {
    let (msg, status) = err.to_http();
    w.error(msg, status)
}

fn reply_io_error<W: Write>(w: &mut ResponseWriter<W>, err: &io::Error) -> io::Result<()> {
    let (msg, status) = to_http_error(err);
    w.error(msg, status)
}
