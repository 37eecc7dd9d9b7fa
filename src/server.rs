//! Accept loop of the library server.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::sync::WaitGroup;
use log::{error, info, warn};

use crate::codec::Codec;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::service::LibraryService;

/// Pause between accept attempts while no client is waiting.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Requests a running [`LibraryServer`] to stop accepting connections.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        info!("shutting down server...");
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Library server, one dispatcher thread per connection.
pub struct LibraryServer<S: LibraryService> {
    listener: TcpListener,
    service: S,
    codec: Codec,
    shutdown: Arc<AtomicBool>,
}

impl<S: LibraryService> LibraryServer<S> {
    pub fn new(addr: impl ToSocketAddrs, service: S, codec: Codec) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        // non-blocking so the loop can observe the shutdown flag
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            service,
            codec,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Accept connections until shutdown is requested, then wait for the
    /// active ones to finish.
    pub fn run(&self) -> Result<()> {
        info!("listening on {}", self.local_addr()?);
        let active = WaitGroup::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!("accepted connection from {peer}");
                    if let Err(e) = self.serve(stream, peer, active.clone()) {
                        warn!("failed to serve {peer}: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    return Err(e.into());
                }
            }
        }

        info!("stopped accepting connections, waiting for active connections to finish...");
        active.wait();
        Ok(())
    }

    fn serve(&self, stream: TcpStream, peer: SocketAddr, active: WaitGroup) -> Result<()> {
        // accepted sockets may inherit the listener's mode on some platforms
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let dispatcher = Dispatcher::new(stream, self.service.clone(), self.codec)?;
        thread::Builder::new()
            .name(format!("conn-{peer}"))
            .spawn(move || {
                dispatcher.run();
                drop(active);
            })?;
        Ok(())
    }
}
