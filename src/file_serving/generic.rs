//! Plain static file serving for everything that isn't a `.gz` archive:
//! directory listings, index pages, conditional GET and single byte ranges.

use http::header::{
    HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, IF_MODIFIED_SINCE,
    IF_RANGE, LAST_MODIFIED, RANGE,
};
use http::{Method, Request, StatusCode};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::reply_io_error;
use crate::logging::LoggingExt;
use crate::transport::ResponseWriter;

const INDEX_PAGE: &str = "index.html";
const SNIFF_LEN: u64 = 512;
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ByteRange {
    Full,
    /// Inclusive on both ends.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
}

pub fn serve<W: Write>(
    req: &Request<()>,
    url: &str,
    path: &Path,
    meta: &Metadata,
    w: &mut ResponseWriter<W>,
) -> io::Result<()> {
    if url.ends_with(&format!("/{INDEX_PAGE}")) {
        return local_redirect(req, w, "./");
    }

    if meta.is_dir() {
        if !url.ends_with('/') {
            return local_redirect(req, w, &format!("{}/", encode_href(base(url))));
        }
        let index = path.join(INDEX_PAGE);
        return match fs::metadata(&index) {
            Ok(index_meta) if index_meta.is_file() => serve_content(req, &index, &index_meta, w),
            _ => serve_dir(req, path, meta, w),
        };
    }

    if url.ends_with('/') {
        return local_redirect(req, w, &format!("../{}", encode_href(base(url))));
    }
    serve_content(req, path, meta, w)
}

fn base(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(last) if !last.is_empty() => last,
        _ => "/",
    }
}

fn local_redirect<W: Write>(
    req: &Request<()>,
    w: &mut ResponseWriter<W>,
    target: &str,
) -> io::Result<()> {
    match req.uri().query() {
        Some(query) if !query.is_empty() => w.redirect(&format!("{target}?{query}")),
        _ => w.redirect(target),
    }
}

fn modified_time(meta: &Metadata) -> Option<SystemTime> {
    meta.modified()
        .ok()
        .filter(|t| unix_secs(*t).is_some_and(|secs| secs > 0))
}

fn unix_secs(t: SystemTime) -> Option<u64> {
    t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

fn parse_date(value: &HeaderValue) -> Option<SystemTime> {
    httpdate::parse_http_date(value.to_str().ok()?).ok()
}

fn not_modified(req: &Request<()>, modified: Option<SystemTime>) -> bool {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return false;
    }
    let since = match req.headers().get(IF_MODIFIED_SINCE).and_then(parse_date) {
        Some(since) => since,
        None => return false,
    };
    // HTTP dates have one-second resolution.
    match (modified.and_then(unix_secs), unix_secs(since)) {
        (Some(modified), Some(since)) => modified <= since,
        _ => false,
    }
}

fn set_last_modified<W: Write>(w: &mut ResponseWriter<W>, modified: Option<SystemTime>) {
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
            w.headers_mut().insert(LAST_MODIFIED, value);
        }
    }
}

fn serve_dir<W: Write>(
    req: &Request<()>,
    path: &Path,
    meta: &Metadata,
    w: &mut ResponseWriter<W>,
) -> io::Result<()> {
    let modified = modified_time(meta);
    if not_modified(req, modified) {
        return w.write_head(StatusCode::NOT_MODIFIED);
    }

    let listing = match path.log_operation("read_dir", || list_dir(path)) {
        Ok(listing) => listing,
        Err(e) => return reply_io_error(w, &e),
    };

    set_last_modified(w, modified);
    w.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    w.write_all(listing.as_bytes())
}

fn list_dir(path: &Path) -> io::Result<String> {
    let mut names = fs::read_dir(path)?
        .map(|entry| {
            let entry = entry?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() {
                name.push('/');
            }
            Ok(name)
        })
        .collect::<io::Result<Vec<_>>>()?;
    names.sort();

    let mut html =
        String::from("<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n");
    for name in &names {
        html.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            encode_href(name),
            escape_html(name)
        ));
    }
    html.push_str("</pre>\n");
    Ok(html)
}

/// Percent-encodes a relative link; a colon in the first segment would
/// otherwise read as a URL scheme.
fn encode_href(name: &str) -> String {
    let encoded = utf8_percent_encode(name, PATH_SEGMENT).to_string();
    let first_segment = encoded.split('/').next().unwrap_or("");
    if first_segment.contains(':') {
        format!("./{encoded}")
    } else {
        encoded
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn serve_content<W: Write>(
    req: &Request<()>,
    path: &Path,
    meta: &Metadata,
    w: &mut ResponseWriter<W>,
) -> io::Result<()> {
    let modified = modified_time(meta);
    set_last_modified(w, modified);
    if not_modified(req, modified) {
        return w.write_head(StatusCode::NOT_MODIFIED);
    }

    let mut file = match path.log_operation("open", || File::open(path)) {
        Ok(file) => file,
        Err(e) => return reply_io_error(w, &e),
    };
    let content_type = match content_type_for(path, &mut file) {
        Ok(content_type) => content_type,
        Err(e) => return reply_io_error(w, &e),
    };

    let size = meta.len();
    let headers = w.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or(HeaderValue::from_static(OCTET_STREAM)),
    );
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let range = requested_range(req, modified)
        .map(|header| parse_range(header, size))
        .unwrap_or(ByteRange::Full);

    match range {
        ByteRange::Full => {
            w.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(size));
            w.write_head(StatusCode::OK)?;
            w.copy_from(&mut file)?;
        }
        ByteRange::Partial { start, end } => {
            if let Err(e) = file.seek(SeekFrom::Start(start)) {
                return reply_io_error(w, &e);
            }
            let len = end - start + 1;
            let headers = w.headers_mut();
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                headers.insert(CONTENT_RANGE, value);
            }
            w.write_head(StatusCode::PARTIAL_CONTENT)?;
            w.copy_from(&mut file.take(len))?;
        }
        ByteRange::Unsatisfiable => {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                w.headers_mut().insert(CONTENT_RANGE, value);
            }
            w.error(
                "invalid range: failed to overlap",
                StatusCode::RANGE_NOT_SATISFIABLE,
            )?;
        }
    }
    Ok(())
}

fn content_type_for(path: &Path, file: &mut File) -> io::Result<String> {
    if let Some(mime) = mime_guess::from_path(path).first() {
        let mime = mime.to_string();
        if mime.starts_with("text/") && !mime.contains("charset") {
            return Ok(format!("{mime}; charset=utf-8"));
        }
        return Ok(mime);
    }

    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    (&mut *file).take(SNIFF_LEN).read_to_end(&mut head)?;
    file.rewind()?;
    Ok(sniff(&head).to_string())
}

/// Guesses whether a file without a known extension is text.
pub fn sniff(head: &[u8]) -> &'static str {
    let binary = head
        .iter()
        .any(|&b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F));
    if binary {
        return OCTET_STREAM;
    }
    match std::str::from_utf8(head) {
        Ok(_) => TEXT_PLAIN,
        // cut mid-character at the sniff boundary
        Err(e) if e.error_len().is_none() => TEXT_PLAIN,
        Err(_) => OCTET_STREAM,
    }
}

/// The `Range` header, unless an `If-Range` date says the file changed.
fn requested_range(req: &Request<()>, modified: Option<SystemTime>) -> Option<&str> {
    let range = req.headers().get(RANGE)?.to_str().ok()?;
    match req.headers().get(IF_RANGE) {
        None => Some(range),
        Some(if_range) => {
            let since = unix_secs(parse_date(if_range)?)?;
            (unix_secs(modified?)? == since).then_some(range)
        }
    }
}

/// Parses a single `bytes=` range. Multiple ranges and malformed headers
/// fall back to the full body.
pub fn parse_range(header: &str, size: u64) -> ByteRange {
    let spec = match header.trim().strip_prefix("bytes=") {
        Some(spec) if !spec.contains(',') => spec.trim(),
        _ => return ByteRange::Full,
    };
    let (start, end) = match spec.split_once('-') {
        Some((start, end)) => (start.trim(), end.trim()),
        None => return ByteRange::Full,
    };

    if start.is_empty() {
        let suffix = match end.parse::<u64>() {
            Ok(suffix) => suffix,
            Err(_) => return ByteRange::Full,
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let start = match start.parse::<u64>() {
        Ok(start) => start,
        Err(_) => return ByteRange::Full,
    };
    let end = if end.is_empty() {
        u64::MAX
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return ByteRange::Full,
        }
    };
    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial {
        start,
        end: end.min(size - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ranges() {
        assert_eq!(parse_range("bytes=0-9", 100), ByteRange::Partial { start: 0, end: 9 });
        assert_eq!(parse_range("bytes=90-", 100), ByteRange::Partial { start: 90, end: 99 });
        assert_eq!(parse_range("bytes=-10", 100), ByteRange::Partial { start: 90, end: 99 });
        assert_eq!(parse_range("bytes=50-500", 100), ByteRange::Partial { start: 50, end: 99 });
        assert_eq!(parse_range("bytes=-500", 100), ByteRange::Partial { start: 0, end: 99 });
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range("bytes=100-", 100), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 100), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=0-", 0), ByteRange::Unsatisfiable);
    }

    #[test]
    fn ignored_ranges() {
        assert_eq!(parse_range("items=0-1", 100), ByteRange::Full);
        assert_eq!(parse_range("bytes=0-1,5-6", 100), ByteRange::Full);
        assert_eq!(parse_range("bytes=9-1", 100), ByteRange::Full);
        assert_eq!(parse_range("bytes=a-b", 100), ByteRange::Full);
        assert_eq!(parse_range("bytes=5", 100), ByteRange::Full);
    }

    #[test]
    fn sniffs_text_and_binary() {
        assert_eq!(sniff(b""), TEXT_PLAIN);
        assert_eq!(sniff(b"2017-04-01 12:00:00 INFO started\n"), TEXT_PLAIN);
        assert_eq!(sniff("héllo".as_bytes()), TEXT_PLAIN);
        assert_eq!(sniff(&"é".as_bytes()[..1]), TEXT_PLAIN);
        assert_eq!(sniff(b"\x1f\x8b\x08\x00"), OCTET_STREAM);
        assert_eq!(sniff(b"\xff\xfeabc"), OCTET_STREAM);
    }

    #[test]
    fn hrefs_are_escaped() {
        assert_eq!(encode_href("a b.log"), "a%20b.log");
        assert_eq!(encode_href("sub/"), "sub/");
        assert_eq!(encode_href("c:d"), "./c:d");
        assert_eq!(encode_href("100%.txt"), "100%25.txt");
        assert_eq!(escape_html("<a&'\">"), "&lt;a&amp;&#39;&#34;&gt;");
    }

    #[test]
    fn base_of_url() {
        assert_eq!(base("/a/b"), "b");
        assert_eq!(base("/a/b/"), "b");
        assert_eq!(base("/"), "/");
    }
}
