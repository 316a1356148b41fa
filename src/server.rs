use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::executor::CommandExecutor;
use crate::proto::catalog::Catalog;
use crate::proto::wire;

/// Line-delimited JSON front end: one request per line, one reply per line.
#[derive(Clone)]
pub struct RequestServer {
    executor: Arc<CommandExecutor>,
    catalog: Arc<Catalog>,
}

impl RequestServer {
    pub fn new(executor: Arc<CommandExecutor>, catalog: Arc<Catalog>) -> Self {
        Self { executor, catalog }
    }

    /// Accept connections forever, one thread each.
    pub fn serve(&self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "accepting requests");
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let server = self.clone();
            thread::Builder::new()
                .name("request".into())
                .spawn(move || {
                    let peer = stream.peer_addr().ok();
                    if let Err(e) = server.handle_connection(stream) {
                        debug!(?peer, error = %e, "connection ended");
                    }
                })?;
        }
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream) -> io::Result<()> {
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            if let Some(reply) = self.handle_bytes(&buf) {
                writer.write_all(reply.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()?;
            }
        }
    }

    /// Like [`handle_line`](Self::handle_line), rejecting non-UTF-8 input as malformed.
    pub fn handle_bytes(&self, line: &[u8]) -> Option<String> {
        match std::str::from_utf8(line) {
            Ok(text) => self.handle_line(text),
            Err(e) => {
                let err = GatewayError::Malformed(format!("request is not valid UTF-8: {e}"));
                debug!(error = %err, "rejecting request");
                Some(encode_reply(wire::format_error(&err)))
            }
        }
    }

    /// Reply to one request line; `None` for blank lines.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        debug!(request = line, "got the request");
        let outcome = wire::parse_request(line, &self.catalog)
            .and_then(|request| self.executor.execute(request));
        let reply = match &outcome {
            Ok(result) => wire::format_result(result),
            Err(err) => {
                if !err.is_client_error() {
                    warn!(error = %err, "request failed");
                }
                wire::format_error(err)
            }
        };
        Some(encode_reply(reply))
    }
}

fn encode_reply(reply: serde_json::Result<String>) -> String {
    reply.unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode the reply");
        r#"{"status":500,"message":"failed to encode the reply"}"#.to_string()
    })
}
