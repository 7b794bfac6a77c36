use http::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
    X_CONTENT_TYPE_OPTIONS,
};
use http::{HeaderMap, Method, Request, StatusCode, Version};
use log::debug;
use percent_encoding::percent_decode_str;
use std::io::{self, BufRead, Read, Write};

use crate::error::ServeError;

const MAX_HEADER_BYTES: u64 = 1 << 20;

fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// Reads the request line and header block of one HTTP/1.x request.
pub fn read_request<R: BufRead>(reader: &mut R) -> io::Result<Request<()>> {
    let mut limited = reader.take(MAX_HEADER_BYTES);

    let mut line = String::new();
    if limited.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before request line",
        ));
    }
    debug!("Request line: {}", line.trim());

    let mut parts = line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(method), Some(target), Some(version), None) => (method, target, version),
        _ => return Err(invalid_data("malformed request line")),
    };
    let version = match version {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        other => return Err(invalid_data(format!("unsupported protocol {other}"))),
    };

    let mut builder = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).map_err(invalid_data)?)
        .uri(target)
        .version(version);

    loop {
        let mut header_line = String::new();
        if limited.read_line(&mut header_line)? == 0 {
            return Err(invalid_data("header block truncated or too large"));
        }
        let header_line = header_line.trim_end_matches(['\r', '\n']);
        if header_line.is_empty() {
            break;
        }
        debug!("Header line: {}", header_line);

        let (name, value) = header_line
            .split_once(':')
            .ok_or_else(|| invalid_data("malformed header line"))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(invalid_data)?;
        let value = HeaderValue::from_str(value.trim()).map_err(invalid_data)?;
        builder = builder.header(name, value);
    }

    builder.body(()).map_err(invalid_data)
}

/// The percent-decoded path component of the request target, query dropped.
pub fn url_path<B>(req: &Request<B>) -> Result<String, ServeError> {
    percent_decode_str(req.uri().path())
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|_| ServeError::InvalidPath)
}

/// All values of a possibly repeated header that are valid strings.
pub fn header_values<'a, B>(
    req: &'a Request<B>,
    name: HeaderName,
) -> impl Iterator<Item = &'a str> + 'a {
    req.headers()
        .get_all(name)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
}

/// Streams one response onto a connection.
///
/// The status line and headers go out on the first body write or on an
/// explicit `write_head`, whichever comes first. There is one response per
/// connection, so a body of unknown length is delimited by closing it.
pub struct ResponseWriter<W: Write> {
    inner: W,
    headers: HeaderMap,
    status: Option<StatusCode>,
    head_only: bool,
    body_bytes: u64,
}

impl<W: Write> ResponseWriter<W> {
    pub fn new(inner: W, method: &Method) -> Self {
        Self {
            inner,
            headers: HeaderMap::new(),
            status: None,
            head_only: method == Method::HEAD,
            body_bytes: 0,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn body_bytes(&self) -> u64 {
        self.body_bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        if let Some(sent) = self.status {
            log::warn!("Ignoring status {} after {} was already sent", status, sent);
            return Ok(());
        }
        self.status = Some(status);
        self.headers
            .insert(CONNECTION, HeaderValue::from_static("close"));

        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .into_bytes();
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.inner.write_all(&head)?;
        self.inner.flush()
    }

    /// Replies with a short plain-text error body.
    pub fn error(&mut self, msg: &str, status: StatusCode) -> io::Result<()> {
        let body = format!("{msg}\n");
        self.headers.remove(CONTENT_ENCODING);
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        self.headers
            .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        self.headers
            .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        self.write_head(status)?;
        self.write_all(body.as_bytes())
    }

    pub fn redirect(&mut self, location: &str) -> io::Result<()> {
        let location = HeaderValue::from_str(location).map_err(invalid_data)?;
        self.headers.insert(LOCATION, location);
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
        self.write_head(StatusCode::MOVED_PERMANENTLY)
    }

    /// Copies `reader` into the body until EOF, returning the bytes moved.
    /// Nothing is read for a `HEAD` request.
    pub fn copy_from<R: Read>(&mut self, reader: &mut R) -> io::Result<u64> {
        if self.head_only {
            if self.status.is_none() {
                self.write_head(StatusCode::OK)?;
            }
            return Ok(0);
        }
        io::copy(reader, self)
    }
}

impl<W: Write> Write for ResponseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.write_head(StatusCode::OK)?;
        }
        if self.head_only {
            return Ok(buf.len());
        }
        let n = self.inner.write(buf)?;
        self.body_bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    /// A response as a client would see it.
    #[derive(Debug)]
    pub struct RawResponse {
        pub status: u16,
        pub headers: HashMap<String, String>,
        pub body: Vec<u8>,
    }

    impl RawResponse {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
        }

        pub fn body_str(&self) -> &str {
            std::str::from_utf8(&self.body).unwrap()
        }
    }

    pub fn parse_response(raw: &[u8]) -> RawResponse {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header block");
        let head = std::str::from_utf8(&raw[..split]).unwrap();
        let mut lines = head.split("\r\n");
        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .expect("status line");
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        RawResponse {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }
}
