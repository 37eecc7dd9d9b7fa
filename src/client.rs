//! Client proxy of the library server.
//!
//! [`LibraryClient`] turns every business operation into a blocking call.
//! Behind it, a reader thread drains the connection and sorts each inbound
//! message by tag:
//!
//! - `BORROW_BOOK` and `RETURN_BOOK` are push notifications and go to a
//!   notifier thread, which hands them to the observer registered at login;
//! - everything else is the reply to the one pending call and goes through a
//!   single-slot handoff to the caller.
//!
//! Methods take `&mut self`, so a second call cannot start before the first
//! one has its reply.

use std::net::{Shutdown, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::channel::{self, ChannelReader, ChannelWriter};
use crate::codec::Codec;
use crate::error::{LibraryError, Result};
use crate::model::{Book, Credentials, User, UserBook};
use crate::protocol::{OperationTag, Payload, Request, Response};
use crate::service::LibraryObserver;

type ObserverSlot = Arc<Mutex<Option<Arc<dyn LibraryObserver>>>>;

/// One live connection and the threads serving it.
struct Connection {
    writer: ChannelWriter<Request>,
    replies: Receiver<Response>,
    observer: ObserverSlot,
    finished: Arc<AtomicBool>,
    stream: TcpStream,
    reader: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
}

impl Connection {
    fn open(addr: &str, codec: Codec) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let (reader, writer) = channel::split::<Response, Request>(&stream, codec)?;

        let (reply_tx, replies) = mpsc::sync_channel(1);
        let (notify_tx, notifications) = mpsc::channel();
        let observer: ObserverSlot = Arc::new(Mutex::new(None));
        let finished = Arc::new(AtomicBool::new(false));

        let slot = observer.clone();
        let notifier = thread::Builder::new()
            .name("library-notifier".to_string())
            .spawn(move || notify_loop(notifications, slot))?;

        let done = finished.clone();
        let reader = thread::Builder::new()
            .name("library-reader".to_string())
            .spawn(move || read_loop(reader, reply_tx, notify_tx, done))?;

        debug!("connected to {addr}");
        Ok(Self {
            writer,
            replies,
            observer,
            finished,
            stream,
            reader: Some(reader),
            notifier: Some(notifier),
        })
    }

    fn is_alive(&self) -> bool {
        !self.finished.load(Ordering::Acquire)
    }

    fn set_observer(&self, observer: Option<Arc<dyn LibraryObserver>>) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    fn call(&mut self, request: &Request, timeout: Option<Duration>) -> Result<Response> {
        debug!("sending {request:?}");
        self.writer.send(request)?;
        match timeout {
            Some(timeout) => self.replies.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => LibraryError::ReplyTimeout,
                RecvTimeoutError::Disconnected => LibraryError::ChannelClosed,
            }),
            None => self.replies.recv().map_err(|_| LibraryError::ChannelClosed),
        }
    }

    fn close(self) {
        let Connection {
            replies,
            finished,
            stream,
            reader,
            notifier,
            ..
        } = self;
        finished.store(true, Ordering::Release);
        // unblocks the reader; the peer may already be gone
        let _ = stream.shutdown(Shutdown::Both);
        drop(replies);
        if let Some(reader) = reader {
            if reader.join().is_err() {
                warn!("reader thread panicked");
            }
        }
        // the reader owned the notification sender, so pending notifications drain first
        if let Some(notifier) = notifier {
            if notifier.join().is_err() {
                warn!("notifier thread panicked");
            }
        }
        debug!("connection closed");
    }
}

fn read_loop(
    mut reader: ChannelReader<Response>,
    replies: SyncSender<Response>,
    notifications: Sender<Response>,
    finished: Arc<AtomicBool>,
) {
    while !finished.load(Ordering::Acquire) {
        match reader.receive() {
            Ok(response) if response.tag.is_push() => {
                debug!("notification received {response:?}");
                if notifications.send(response).is_err() {
                    warn!("notifier thread is gone, dropping notification");
                }
            }
            Ok(response) => {
                debug!("reply received {response:?}");
                if replies.send(response).is_err() {
                    break;
                }
            }
            Err(LibraryError::ChannelClosed) => break,
            Err(e) => {
                if !finished.load(Ordering::Acquire) {
                    warn!("reading error {e}");
                }
                break;
            }
        }
    }
    finished.store(true, Ordering::Release);
}

fn notify_loop(notifications: Receiver<Response>, observer: ObserverSlot) {
    for notification in notifications {
        let current = observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(current) = current else {
            debug!("no observer registered, dropping {notification:?}");
            continue;
        };
        match catch_unwind(AssertUnwindSafe(|| deliver(current.as_ref(), notification))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("notification handler failed: {e}"),
            Err(_) => warn!("notification handler panicked"),
        }
    }
}

fn deliver(observer: &dyn LibraryObserver, notification: Response) -> Result<()> {
    match notification.tag {
        OperationTag::BorrowBook => {
            let update = notification.expect(Payload::into_book_quantity)?;
            observer.book_updated(update.book_id, update.new_quantity)
        }
        OperationTag::ReturnBook => {
            let book = notification.expect(Payload::into_book_info)?;
            observer.book_returned(book.id, &book.author, &book.title)
        }
        tag => Err(LibraryError::UnexpectedReply(tag)),
    }
}

/// Blocking proxy of the library server.
pub struct LibraryClient {
    addr: String,
    codec: Codec,
    reply_timeout: Option<Duration>,
    connection: Option<Connection>,
}

impl LibraryClient {
    /// A client for the server at `addr`. Nothing is connected until [`login`](Self::login).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            codec: Codec::default(),
            reply_timeout: None,
            connection: None,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Give up on a reply after `timeout` and drop the connection.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_alive)
    }

    /// Log in, connecting first when needed. `observer` receives the
    /// notifications of this session. A failed login closes the connection.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        observer: Arc<dyn LibraryObserver>,
    ) -> Result<User> {
        if !self.is_connected() {
            self.disconnect();
            self.connection = Some(Connection::open(&self.addr, self.codec)?);
        }
        if let Some(connection) = &self.connection {
            connection.set_observer(Some(observer));
        }
        let response = self.call(Request::new(
            OperationTag::Login,
            Payload::Credentials(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
        ))?;
        self.finish(response, OperationTag::Ok, true, |r| r.expect(Payload::into_user))
    }

    /// Log out. The connection is closed whatever the server answers.
    pub fn logout(&mut self, user_id: u32) -> Result<()> {
        let response = self.call(Request::new(OperationTag::Logout, Payload::UserId(user_id)));
        self.disconnect();
        self.finish(response?, OperationTag::Ok, true, |_| Ok(()))
    }

    pub fn available_books(&mut self) -> Result<Vec<Book>> {
        let response = self.call(Request::bare(OperationTag::GetAvailableBooks))?;
        self.finish(response, OperationTag::GetAvailableBooks, true, |r| {
            r.expect(Payload::into_books)
        })
    }

    pub fn user_books(&mut self, user_id: u32) -> Result<Vec<Book>> {
        let response = self.call(Request::new(OperationTag::GetUserBooks, Payload::UserId(user_id)))?;
        self.finish(response, OperationTag::GetUserBooks, true, |r| {
            r.expect(Payload::into_books)
        })
    }

    pub fn search_books(&mut self, keyword: &str) -> Result<Vec<Book>> {
        let response = self.call(Request::new(
            OperationTag::SearchBooks,
            Payload::Keyword(keyword.to_string()),
        ))?;
        // the server tags search results as user books
        self.finish(response, OperationTag::GetUserBooks, true, |r| {
            r.expect(Payload::into_books)
        })
    }

    pub fn borrow_book(&mut self, user_id: u32, book_id: u32) -> Result<()> {
        let response = self.call(Request::new(
            OperationTag::BorrowBook,
            Payload::UserBook(UserBook { user_id, book_id }),
        ))?;
        self.finish(response, OperationTag::Ok, false, |_| Ok(()))
    }

    pub fn return_book(&mut self, user_id: u32, book_id: u32) -> Result<()> {
        let response = self.call(Request::new(
            OperationTag::ReturnBook,
            Payload::UserBook(UserBook { user_id, book_id }),
        ))?;
        self.finish(response, OperationTag::Ok, false, |_| Ok(()))
    }

    /// Close the connection, if any.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }

    fn call(&mut self, request: Request) -> Result<Response> {
        let timeout = self.reply_timeout;
        let connection = self.connection.as_mut().ok_or(LibraryError::NotConnected)?;
        match connection.call(&request, timeout) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    /// Turn a reply into the call's result. `ERROR` becomes a
    /// [`ServiceError`](LibraryError::ServiceError) and closes the connection
    /// when `close_on_error` is set; a reply of any other unexpected shape
    /// always closes it.
    fn finish<T>(
        &mut self,
        response: Response,
        expected: OperationTag,
        close_on_error: bool,
        extract: impl FnOnce(Response) -> Result<T>,
    ) -> Result<T> {
        if response.tag == OperationTag::Error {
            if close_on_error {
                self.disconnect();
            }
            return Err(LibraryError::ServiceError(response.error_message()));
        }
        if response.tag != expected {
            self.disconnect();
            return Err(LibraryError::UnexpectedReply(response.tag));
        }
        match extract(response) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }
}

impl Drop for LibraryClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
