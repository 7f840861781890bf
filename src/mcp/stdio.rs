//! MCP server - stdio transport
//!
//! Newline-delimited JSON-RPC frames. One session engine for the life of the
//! process. A bad frame gets a parse-error response and the loop carries on.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use super::protocol::{self, Response};
use super::server::LogicServer;
use crate::config::Config;
use crate::prolog::{CancelToken, SessionEngine};

/// How often the loop checks for shutdown while waiting on input.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Run MCP server over stdin/stdout until EOF or shutdown.
pub fn run(config: &Config, shutdown: CancelToken) -> Result<()> {
    let engine = SessionEngine::new(&config.solver).context("Failed to initialize Prolog engine")?;
    let server = LogicServer::new(engine, config.solver.query_timeout())
        .with_shutdown(shutdown.clone());

    tracing::info!("MCP server ready on stdio");

    let reader = BufReader::new(std::io::stdin());
    let mut stdout = std::io::stdout();
    let result = serve(&server, reader, &mut stdout, &shutdown);
    server.close();
    result
}

/// Serve frames from `reader`, writing responses to `writer`.
///
/// Reading happens on a helper thread so a blocked read never delays shutdown.
pub fn serve<R, W>(
    server: &LogicServer,
    reader: R,
    writer: &mut W,
    shutdown: &CancelToken,
) -> Result<()>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in reader.lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        if shutdown.is_cancelled() {
            tracing::info!("shutdown requested, leaving stdio loop");
            return Ok(());
        }

        let line = match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) if e.kind() == ErrorKind::InvalidData => {
                // Not UTF-8: answer like any other undecodable frame
                let resp = Response::error_with_data(
                    None,
                    protocol::PARSE_ERROR,
                    "Parse error",
                    e.to_string(),
                );
                write_response(writer, &resp)?;
                continue;
            }
            Ok(Err(e)) => return Err(e).context("Failed to read from stdin"),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("stdin closed");
                return Ok(());
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = server.handle_frame(&line) {
            write_response(writer, &response)?;
        }
    }
}

fn write_response(writer: &mut impl Write, response: &Response) -> Result<()> {
    writeln!(writer, "{}", serde_json::to_string(response)?).context("Failed to write response")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prolog::{InvokeError, QueryContext, SolverBackend, SolverRun};
    use serde_json::Value;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    struct AlwaysFalse;

    impl SolverBackend for AlwaysFalse {
        fn run(&self, _: &Path, _: &str, _: &QueryContext) -> Result<SolverRun, InvokeError> {
            Ok(SolverRun {
                exit_code: Some(0),
                output: "SUCCESS: false\n".to_string(),
            })
        }

        fn describe(&self) -> String {
            "always-false".to_string()
        }
    }

    fn run_frames(input: &[u8]) -> Vec<Value> {
        let engine = SessionEngine::with_backend(Arc::new(AlwaysFalse), None).unwrap();
        let server = LogicServer::new(engine, Duration::from_secs(5));
        let mut out = Vec::new();
        serve(&server, Cursor::new(input.to_vec()), &mut out, &CancelToken::new()).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_bad_frame_does_not_end_session() {
        let input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\
                      this is not json\n\
                      \n\
                      {\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                      {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n";
        let responses = run_frames(input);

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], protocol::PARSE_ERROR);
        assert_eq!(responses[2]["id"], 2);
    }

    #[test]
    fn test_invalid_utf8_frame() {
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n");
        let responses = run_frames(&input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], protocol::PARSE_ERROR);
        assert_eq!(responses[1]["id"], 9);
    }

    #[test]
    fn test_cancelled_before_start() {
        let engine = SessionEngine::with_backend(Arc::new(AlwaysFalse), None).unwrap();
        let server = LogicServer::new(engine, Duration::from_secs(5));
        let shutdown = CancelToken::new();
        shutdown.cancel();
        let mut out = Vec::new();
        let input = Cursor::new(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n".to_vec());
        serve(&server, input, &mut out, &shutdown).unwrap();
        assert!(out.is_empty());
    }
}
