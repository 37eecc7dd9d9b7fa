#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use library_rpc::{Catalog, Codec, LibraryObserver, LibraryServer, ShutdownHandle};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(300);

/// A server on an ephemeral loopback port, running on its own thread.
pub struct TestServer {
    pub addr: SocketAddr,
    pub catalog: Catalog,
    shutdown: ShutdownHandle,
    thread: JoinHandle<()>,
}

impl TestServer {
    pub fn start(codec: Codec) -> Self {
        let catalog = Catalog::demo();
        let server = LibraryServer::new("127.0.0.1:0", catalog.clone(), codec).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let thread = thread::spawn(move || server.run().unwrap());
        Self {
            addr,
            catalog,
            shutdown,
            thread,
        }
    }

    /// Stop accepting and wait for every connection to end.
    pub fn stop(self) {
        self.shutdown.shutdown();
        self.thread.join().unwrap();
    }
}

/// Notifications as seen by one client.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Updated(u32, u32),
    Returned(u32, String, String),
}

pub struct Recorder {
    events: Mutex<Sender<Event>>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self {
                events: Mutex::new(tx),
            }),
            rx,
        )
    }
}

impl LibraryObserver for Recorder {
    fn book_updated(&self, book_id: u32, new_quantity: u32) -> library_rpc::Result<()> {
        let _ = self.events.lock().unwrap().send(Event::Updated(book_id, new_quantity));
        Ok(())
    }

    fn book_returned(&self, book_id: u32, author: &str, title: &str) -> library_rpc::Result<()> {
        let _ = self.events.lock().unwrap().send(Event::Returned(
            book_id,
            author.to_string(),
            title.to_string(),
        ));
        Ok(())
    }
}
