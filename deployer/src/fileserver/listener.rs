//! Listener whose connections can be torn down from outside
//!
//! `axum::serve` owns its connection tasks, so a graceful shutdown cannot
//! interrupt a transfer stuck on a stalled client. Every accepted stream here
//! shares a [`KillSwitch`]; once it is thrown, pending and future I/O on the
//! stream fails and the connection is dropped, closing the socket.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use futures::task::AtomicWaker;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// Shared abort flag for all connections of one server
#[derive(Debug, Default)]
pub struct KillSwitch {
    killed: AtomicBool,
    wakers: Mutex<Vec<Weak<AtomicWaker>>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Fail all current and future I/O on registered streams
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        let wakers = self.wakers.lock().unwrap_or_else(|e| e.into_inner());
        for waker in wakers.iter().filter_map(Weak::upgrade) {
            waker.wake();
        }
    }

    fn register(&self) -> Arc<AtomicWaker> {
        let waker = Arc::new(AtomicWaker::new());
        let mut wakers = self.wakers.lock().unwrap_or_else(|e| e.into_inner());
        wakers.retain(|w| w.strong_count() > 0);
        wakers.push(Arc::downgrade(&waker));
        waker
    }
}

/// TCP listener handing out killable streams
pub struct KillableListener {
    inner: TcpListener,
    switch: Arc<KillSwitch>,
}

impl KillableListener {
    pub fn new(inner: TcpListener, switch: Arc<KillSwitch>) -> Self {
        Self { inner, switch }
    }
}

impl axum::serve::Listener for KillableListener {
    type Io = KillableStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    let waker = self.switch.register();
                    return (
                        KillableStream {
                            inner: stream,
                            switch: self.switch.clone(),
                            waker,
                        },
                        addr,
                    );
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// Remote address of a connection accepted by [`KillableListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Connected<IncomingStream<'_, KillableListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, KillableListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

/// TCP stream that errors out once its server's kill switch is thrown
pub struct KillableStream {
    inner: TcpStream,
    switch: Arc<KillSwitch>,
    waker: Arc<AtomicWaker>,
}

impl KillableStream {
    fn check(&self, cx: &mut Context<'_>) -> io::Result<()> {
        // Register first so a concurrent kill cannot be missed
        self.waker.register(cx.waker());
        if self.switch.is_killed() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "file server stopped",
            ));
        }
        Ok(())
    }
}

impl AsyncRead for KillableStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Err(e) = self.check(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for KillableStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(e) = self.check(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        if let Err(e) = self.check(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Err(e) = self.check(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
