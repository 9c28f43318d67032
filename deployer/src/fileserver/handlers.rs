//! HTTP request handlers

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use futures::stream::{self, Stream};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::fileserver::listener::PeerAddr;
use crate::fileserver::state::ServerState;

const CHUNK_SIZE: usize = 64 * 1024;

/// Serve the artifact when the requested name is the pull name
pub async fn pull_handler(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(remote): ConnectInfo<PeerAddr>,
    method: Method,
    Path(name): Path<String>,
) -> Response {
    if name != state.name {
        debug!("Unknown artifact '{}' requested by {}", name, remote);
        return StatusCode::NOT_FOUND.into_response();
    }

    let file = match state.file.open().await {
        Ok(file) => file,
        Err(e) => {
            error!("Unable to open {}: {}", state.file.path().display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let len = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            error!("Unable to stat {}: {}", state.file.path().display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(len)),
    ];

    // HEAD sends no body, so nothing is served and nothing is counted
    if method == Method::HEAD {
        debug!("HEAD '{}' from {}", state.name, remote);
        return (headers, Body::empty()).into_response();
    }

    info!("Serving '{}' ({} bytes) to {}", state.name, len, remote);

    let transfer = Transfer {
        file,
        remaining: len,
        state,
        remote,
    };

    (headers, Body::from_stream(transfer_stream(transfer))).into_response()
}

/// Anything but the pull path
pub async fn not_found_handler() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

/// One in-flight body.
///
/// The fetch is counted when the connection drops the body after taking its
/// last byte. A body dropped early (client gone, server stopped) or one that
/// hit a read error does not count.
struct Transfer {
    file: tokio::fs::File,
    remaining: u64,
    state: Arc<ServerState>,
    remote: PeerAddr,
}

impl Drop for Transfer {
    fn drop(&mut self) {
        if self.remaining > 0 {
            warn!(
                "Transfer of '{}' to {} ended with {} bytes unsent",
                self.state.name, self.remote, self.remaining
            );
            return;
        }
        if self.state.kill.is_killed() {
            return;
        }

        let count = self.state.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Served '{}' to {} (fetch #{})",
            self.state.name, self.remote, count
        );
    }
}

fn transfer_stream(transfer: Transfer) -> impl Stream<Item = io::Result<Bytes>> + Send {
    stream::try_unfold(transfer, |mut transfer| async move {
        if transfer.state.kill.is_killed() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "file server stopped",
            ));
        }
        if transfer.remaining == 0 {
            return Ok(None);
        }

        let want = transfer.remaining.min(CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; want];
        let n = transfer.file.read(&mut buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "artifact shrank while being served",
            ));
        }

        buf.truncate(n);
        transfer.remaining -= n as u64;
        Ok(Some((Bytes::from(buf), transfer)))
    })
}
