use http::{Method, StatusCode};
use log::{debug, info};
use std::io::{self, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::args::Args;
use crate::file_serving::LogServer;
use crate::transport::{read_request, ResponseWriter};
use crate::{log_error, log_request, log_response};

pub fn start_server(args: Args) -> io::Result<()> {
    let server = Arc::new(LogServer::new(&args.serve_dir)?);
    let listener = TcpListener::bind(&args.listen_addr)?;
    info!("Listening on: {}", listener.local_addr()?);
    info!("Serving directory: {}", server.root().display());

    serve_forever(listener, server)
}

pub fn serve_forever(listener: TcpListener, server: Arc<LogServer>) -> io::Result<()> {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log_error!(e, "Failed to accept connection");
                continue;
            }
        };
        let server = Arc::clone(&server);

        thread::spawn(move || {
            let peer = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            if let Err(e) = handle_tcp(stream, &server) {
                log_error!(e, format!("Error handling connection from {}", peer));
            }
        });
    }

    Ok(())
}

fn handle_tcp(stream: TcpStream, server: &LogServer) -> io::Result<()> {
    debug!("New connection received");
    handle_connection(&stream, &stream, server)
}

/// Reads one request from `reader` and writes its response to `writer`.
pub fn handle_connection<R: Read, W: Write>(
    reader: R,
    writer: W,
    server: &LogServer,
) -> io::Result<()> {
    let start_time = Instant::now();
    let mut reader = BufReader::new(reader);

    let (req, mut w) = match read_request(&mut reader) {
        Ok(req) => {
            log_request!(req.method(), req.uri());
            let w = ResponseWriter::new(writer, req.method());
            (req, w)
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("Connection closed before a request arrived");
            return Ok(());
        }
        Err(e) => {
            log_error!(e, "Malformed request");
            let mut w = ResponseWriter::new(writer, &Method::GET);
            w.error("400 Bad Request", StatusCode::BAD_REQUEST)?;
            return Ok(());
        }
    };

    let result = server.serve_http(&req, &mut w);
    log_response!(
        w.status().map_or(0, |status| status.as_u16()),
        start_time.elapsed(),
        w.body_bytes()
    );
    result?;

    w.into_inner().flush()
}
