use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, info};

use crate::dispatch::{self, Command, Reply};
use crate::engine::Engine;
use crate::limits::MAX_LINE_LEN;
use crate::model::Day;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

pub type ConnectionError = Box<dyn std::error::Error + Send + Sync>;

/// Serve one client: a JSON request per line in, a JSON reply per line out.
/// A bad line gets an error reply and the connection stays open.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), ConnectionError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(frame) = lines.next().await {
        let reply = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                debug!("request line over {MAX_LINE_LEN} bytes");
                record("unknown", "error");
                Reply::malformed("line_too_long")
            }
            Err(LinesCodecError::Io(e)) => return Err(e.into()),
        };
        lines.send(serde_json::to_string(&reply)?).await?;
    }
    Ok(())
}

/// Decode, execute and answer one request line.
pub async fn handle_line(engine: &Engine, line: &str) -> Reply {
    let cmd: Command = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            debug!("malformed request: {e}");
            record("unknown", "error");
            return Reply::malformed("malformed_request");
        }
    };

    let intent = dispatch::intent_label(&cmd);
    let started = Instant::now();
    let result = dispatch::execute(engine, cmd, Day::today()).await;
    metrics::histogram!(REQUEST_DURATION_SECONDS, "intent" => intent)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            record(intent, "ok");
            Reply::Ok { result: outcome }
        }
        Err(e) => {
            match e.kind() {
                "store" => error!("{intent} failed: {e}"),
                "conflict" => info!("{intent} rejected: {e}"),
                _ => debug!("{intent} rejected: {e}"),
            }
            record(intent, "error");
            Reply::from_error(&e)
        }
    }
}

fn record(intent: &'static str, status: &'static str) {
    metrics::counter!(REQUESTS_TOTAL, "intent" => intent, "status" => status).increment(1);
}
