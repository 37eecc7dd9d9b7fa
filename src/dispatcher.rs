//! Server side of one connection.
//!
//! A [`Dispatcher`] reads requests in a blocking loop and answers each with
//! exactly one response. The [`ClientConnection`] it shares with the business
//! layer carries push notifications on the same stream; both paths go
//! through one send lock so their bytes never interleave.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};

use crate::channel::{self, ChannelReader, ChannelWriter};
use crate::codec::Codec;
use crate::error::{LibraryError, Result};
use crate::model::{BookInfo, BookQuantity};
use crate::protocol::{OperationTag, Payload, Request, Response};
use crate::service::{LibraryObserver, LibraryService};

/// Push handle of a connected client.
pub struct ClientConnection {
    peer: SocketAddr,
    writer: Mutex<ChannelWriter<Response>>,
    stream: TcpStream,
    connected: AtomicBool,
}

impl ClientConnection {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, response: &Response) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("sending {:?} to {}", response, self.peer);
        writer.send(response)
    }

    fn push(&self, response: Response) -> Result<()> {
        if !self.is_connected() {
            return Err(LibraryError::ChannelClosed);
        }
        self.send(&response)
    }

    /// Announce a new copy count with a `BORROW_BOOK` push.
    pub fn notify_quantity_changed(&self, book_id: u32, new_quantity: u32) -> Result<()> {
        self.push(Response::with(
            OperationTag::BorrowBook,
            Payload::BookQuantity(BookQuantity {
                book_id,
                new_quantity,
            }),
        ))
    }

    /// Announce a returned book with a `RETURN_BOOK` push.
    pub fn notify_book_returned(&self, book_id: u32, author: &str, title: &str) -> Result<()> {
        self.push(Response::with(
            OperationTag::ReturnBook,
            Payload::BookInfo(BookInfo {
                id: book_id,
                author: author.to_string(),
                title: title.to_string(),
            }),
        ))
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            // the peer may already be gone
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

impl LibraryObserver for ClientConnection {
    fn book_updated(&self, book_id: u32, new_quantity: u32) -> Result<()> {
        self.notify_quantity_changed(book_id, new_quantity)
    }

    fn book_returned(&self, book_id: u32, author: &str, title: &str) -> Result<()> {
        self.notify_book_returned(book_id, author, title)
    }
}

/// Request loop of one accepted connection.
pub struct Dispatcher<S: LibraryService> {
    service: S,
    reader: ChannelReader<Request>,
    connection: Arc<ClientConnection>,
    session: Option<u32>,
    running: bool,
}

impl<S: LibraryService> Dispatcher<S> {
    pub fn new(stream: TcpStream, service: S, codec: Codec) -> Result<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = channel::split(&stream, codec)?;
        Ok(Self {
            service,
            reader,
            connection: Arc::new(ClientConnection {
                peer,
                writer: Mutex::new(writer),
                stream,
                connected: AtomicBool::new(true),
            }),
            session: None,
            running: true,
        })
    }

    pub fn connection(&self) -> Arc<ClientConnection> {
        self.connection.clone()
    }

    /// Serve requests until logout, a fatal login error, or disconnect.
    pub fn run(mut self) {
        let peer = self.connection.peer();
        while self.running {
            let request = match self.reader.receive() {
                Ok(request) => request,
                Err(LibraryError::ChannelClosed) => {
                    debug!("{peer} disconnected");
                    break;
                }
                Err(e) => {
                    warn!("dropping {peer}: {e}");
                    break;
                }
            };
            debug!("received {request:?} from {peer}");
            let response = match self.handle_request(request) {
                Ok(response) => response,
                Err(e) => {
                    warn!("dropping {peer}: {e}");
                    break;
                }
            };
            if let Err(e) = self.connection.send(&response) {
                warn!("dropping {peer}: {e}");
                break;
            }
        }
        self.release();
    }

    fn sink(&self) -> Arc<dyn LibraryObserver> {
        self.connection.clone()
    }

    fn handle_request(&mut self, request: Request) -> Result<Response> {
        let response = match request.tag {
            OperationTag::Login => {
                let credentials = request.expect(Payload::into_credentials)?;
                info!("login request for {} from {}", credentials.username, self.connection.peer());
                if let Some(user_id) = self.session {
                    // one session per connection, the open one is ended on release
                    self.running = false;
                    return Ok(Response::error(format!(
                        "connection already carries the session of user {user_id}"
                    )));
                }
                match self
                    .service
                    .authenticate(&credentials.username, &credentials.password, self.sink())
                {
                    Ok(user) => {
                        self.session = Some(user.id);
                        Response::with(OperationTag::Ok, Payload::User(user))
                    }
                    Err(e) => {
                        self.running = false;
                        Response::error(e.to_string())
                    }
                }
            }
            OperationTag::Logout => {
                let user_id = request.expect(Payload::into_user_id)?;
                info!("logout request for user {user_id}");
                self.running = false;
                match self.service.end_session(user_id, &self.sink()) {
                    Ok(()) => {
                        self.session = None;
                        Response::ok()
                    }
                    Err(e) => Response::error(e.to_string()),
                }
            }
            OperationTag::GetAvailableBooks => match self.service.list_available() {
                Ok(books) => Response::with(OperationTag::GetAvailableBooks, Payload::Books(books)),
                Err(e) => Response::error(e.to_string()),
            },
            OperationTag::GetUserBooks => {
                let user_id = request.expect(Payload::into_user_id)?;
                match self.service.list_for_user(user_id) {
                    Ok(books) => Response::with(OperationTag::GetUserBooks, Payload::Books(books)),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            OperationTag::SearchBooks => {
                let keyword = request.expect(Payload::into_keyword)?;
                match self.service.search(&keyword) {
                    // search results travel under the user-books tag, clients decode them that way
                    Ok(books) => Response::with(OperationTag::GetUserBooks, Payload::Books(books)),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            OperationTag::BorrowBook => {
                let loan = request.expect(Payload::into_user_book)?;
                match self.service.borrow(loan.user_id, loan.book_id) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            OperationTag::ReturnBook => {
                let loan = request.expect(Payload::into_user_book)?;
                match self.service.return_book(loan.user_id, loan.book_id) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            tag @ (OperationTag::Ok | OperationTag::Error) => {
                return Err(LibraryError::MalformedMessage(format!(
                    "{tag} is not a request"
                )));
            }
        };
        Ok(response)
    }

    fn release(&mut self) {
        if let Some(user_id) = self.session.take() {
            let sink = self.sink();
            if let Err(e) = self.service.end_session(user_id, &sink) {
                debug!("ending session of user {user_id}: {e}");
            }
        }
        self.connection.close();
        info!("connection with {} closed", self.connection.peer());
    }
}
