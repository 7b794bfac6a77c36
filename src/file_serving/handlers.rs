use flate2::read::MultiGzDecoder;
use http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, StatusCode};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::path_utils::{resolve_request_path, with_leading_slash};
use super::{generic, reply_error, reply_io_error};
use crate::compression::{accepts_gzip, Delivery, ServeMode};
use crate::logging::LoggingExt;
use crate::transport::{header_values, url_path, ResponseWriter};

const FIRST_CHUNK: usize = 8 * 1024;

/// Serves bug-report files from below a fixed root directory. `.gz` files
/// go out compressed to clients that accept gzip and are decompressed on
/// the fly for everyone else.
#[derive(Debug, Clone)]
pub struct LogServer {
    root: PathBuf,
}

impl LogServer {
    pub fn new(root: &Path) -> io::Result<Self> {
        let root = root.log_operation("absolute", || std::path::absolute(root))?;
        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => log::warn!("Serve root {} is not a directory", root.display()),
            Err(e) => log::warn!("Serve root {} is not accessible: {}", root.display(), e),
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Answers one request. An `Err` means the connection itself failed,
    /// usually because the client went away mid-response.
    pub fn serve_http<W: Write>(
        &self,
        req: &Request<()>,
        w: &mut ResponseWriter<W>,
    ) -> io::Result<()> {
        let url = match url_path(req) {
            Ok(url) => with_leading_slash(&url).into_owned(),
            Err(e) => {
                log::warn!("Undecodable request path {}", req.uri().path());
                return reply_error(w, &e);
            }
        };

        match resolve_request_path(&self.root, &url) {
            Ok(path) => serve_file(req, &url, &path, w),
            Err(e) => reply_error(w, &e),
        }
    }
}

fn serve_file<W: Write>(
    req: &Request<()>,
    url: &str,
    path: &Path,
    w: &mut ResponseWriter<W>,
) -> io::Result<()> {
    let meta = match path.log_operation("stat", || fs::metadata(path)) {
        Ok(meta) => meta,
        Err(e) => return reply_io_error(w, &e),
    };

    let accepts = accepts_gzip(header_values(req, ACCEPT_ENCODING));
    match ServeMode::classify(&path.to_string_lossy(), meta.is_dir(), accepts) {
        ServeMode::Generic => {
            log::info!("Serving {}", path.display());
            generic::serve(req, url, path, &meta, w)
        }
        ServeMode::Archive(delivery) => {
            // The apparent extension belongs to the compressed file, not the archive.
            w.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            log::debug!("Serving archive {} as {:?}", path.display(), delivery);
            match delivery {
                Delivery::Raw => serve_gzip(path, meta.len(), w),
                Delivery::Decompressed => serve_ungzipped(path, w),
            }
        }
    }
}

fn serve_gzip<W: Write>(path: &Path, size: u64, w: &mut ResponseWriter<W>) -> io::Result<()> {
    let file = match path.log_operation("open", || File::open(path)) {
        Ok(file) => file,
        Err(e) => return reply_io_error(w, &e),
    };

    let headers = w.headers_mut();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    w.write_head(StatusCode::OK)?;
    stream_body(file, w)
}

fn serve_ungzipped<W: Write>(path: &Path, w: &mut ResponseWriter<W>) -> io::Result<()> {
    let file = match path.log_operation("open", || File::open(path)) {
        Ok(file) => file,
        Err(e) => return reply_io_error(w, &e),
    };

    let mut decoder = MultiGzDecoder::new(file);
    let mut first = vec![0u8; FIRST_CHUNK];
    let n = match path.log_operation("decompress", || read_first_chunk(&mut decoder, &mut first))
    {
        Ok(n) => n,
        Err(e) => return reply_io_error(w, &e),
    };

    // Decompressed size is unknown, so no Content-Length.
    w.write_head(StatusCode::OK)?;
    w.write_all(&first[..n])?;
    stream_body(decoder, w)
}

/// Decodes the start of the archive so that a file which isn't gzip at all
/// is reported before any status has been sent.
fn read_first_chunk<R: Read>(decoder: &mut MultiGzDecoder<R>, buf: &mut [u8]) -> io::Result<usize> {
    let n = decoder.read(buf)?;
    if decoder.header().is_none() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing gzip header",
        ));
    }
    Ok(n)
}

/// Copies `body` into the response. `body` and whatever handle it owns are
/// released when this returns, whether the copy finished or the client
/// aborted.
fn stream_body<R: Read, W: Write>(mut body: R, w: &mut ResponseWriter<W>) -> io::Result<()> {
    let copied = w.copy_from(&mut body)?;
    log::debug!("Streamed {} body bytes", copied);
    Ok(())
}
