//! Client-server communication protocol definitions.
//!
//! Every message on the wire, in either direction, is an envelope of an
//! [`OperationTag`] and an optional [`Payload`]. There is no correlation id:
//! a reply is matched to the pending call by channel order, and a push
//! notification is told apart from a reply by its tag alone (see
//! [`OperationTag::is_push`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LibraryError, Result};
use crate::model::{Book, BookInfo, BookQuantity, Credentials, User, UserBook};

/// Identifies the purpose of a message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationTag {
    Login,
    Logout,
    GetAvailableBooks,
    GetUserBooks,
    SearchBooks,
    BorrowBook,
    ReturnBook,
    Ok,
    Error,
}

impl OperationTag {
    /// Tags a client may send as a request.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            OperationTag::Login
                | OperationTag::Logout
                | OperationTag::GetAvailableBooks
                | OperationTag::GetUserBooks
                | OperationTag::SearchBooks
                | OperationTag::BorrowBook
                | OperationTag::ReturnBook
        )
    }

    /// Tags that answer a pending request.
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            OperationTag::Ok
                | OperationTag::Error
                | OperationTag::GetAvailableBooks
                | OperationTag::GetUserBooks
                | OperationTag::Login
        )
    }

    /// Tags that, travelling server to client, only ever announce another
    /// client's state change. A client's own borrow or return is answered
    /// with `OK`/`ERROR`, so these never complete a pending call.
    pub fn is_push(self) -> bool {
        matches!(self, OperationTag::BorrowBook | OperationTag::ReturnBook)
    }

    fn as_str(self) -> &'static str {
        match self {
            OperationTag::Login => "LOGIN",
            OperationTag::Logout => "LOGOUT",
            OperationTag::GetAvailableBooks => "GET_AVAILABLE_BOOKS",
            OperationTag::GetUserBooks => "GET_USER_BOOKS",
            OperationTag::SearchBooks => "SEARCH_BOOKS",
            OperationTag::BorrowBook => "BORROW_BOOK",
            OperationTag::ReturnBook => "RETURN_BOOK",
            OperationTag::Ok => "OK",
            OperationTag::Error => "ERROR",
        }
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag-dependent message body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `LOGIN` request.
    Credentials(Credentials),
    /// `OK` reply to a login.
    User(User),
    /// `LOGOUT` and `GET_USER_BOOKS` requests.
    UserId(u32),
    /// `SEARCH_BOOKS` request.
    Keyword(String),
    /// `BORROW_BOOK` and `RETURN_BOOK` requests.
    UserBook(UserBook),
    /// Listing replies.
    Books(Vec<Book>),
    /// `BORROW_BOOK` push.
    BookQuantity(BookQuantity),
    /// `RETURN_BOOK` push.
    BookInfo(BookInfo),
    /// `ERROR` reply text.
    Message(String),
}

impl Payload {
    pub fn into_credentials(self) -> Option<Credentials> {
        match self {
            Payload::Credentials(credentials) => Some(credentials),
            _ => None,
        }
    }

    pub fn into_user(self) -> Option<User> {
        match self {
            Payload::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn into_user_id(self) -> Option<u32> {
        match self {
            Payload::UserId(id) => Some(id),
            _ => None,
        }
    }

    pub fn into_keyword(self) -> Option<String> {
        match self {
            Payload::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }

    pub fn into_user_book(self) -> Option<UserBook> {
        match self {
            Payload::UserBook(user_book) => Some(user_book),
            _ => None,
        }
    }

    pub fn into_books(self) -> Option<Vec<Book>> {
        match self {
            Payload::Books(books) => Some(books),
            _ => None,
        }
    }

    pub fn into_book_quantity(self) -> Option<BookQuantity> {
        match self {
            Payload::BookQuantity(quantity) => Some(quantity),
            _ => None,
        }
    }

    pub fn into_book_info(self) -> Option<BookInfo> {
        match self {
            Payload::BookInfo(info) => Some(info),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<String> {
        match self {
            Payload::Message(message) => Some(message),
            _ => None,
        }
    }
}

fn expect_payload<T>(
    tag: OperationTag,
    payload: Option<Payload>,
    extract: impl FnOnce(Payload) -> Option<T>,
) -> Result<T> {
    payload
        .and_then(extract)
        .ok_or_else(|| LibraryError::MalformedMessage(format!("unexpected payload for {tag}")))
}

/// Client request message.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: OperationTag,
    pub payload: Option<Payload>,
}

impl Request {
    pub fn new(tag: OperationTag, payload: Payload) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }

    /// A request without payload.
    pub fn bare(tag: OperationTag) -> Self {
        Self { tag, payload: None }
    }

    /// Take the payload as the shape `extract` accepts, or fail as malformed.
    pub fn expect<T>(self, extract: impl FnOnce(Payload) -> Option<T>) -> Result<T> {
        expect_payload(self.tag, self.payload, extract)
    }
}

/// Server response message, either a reply or a push notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub tag: OperationTag,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn with(tag: OperationTag, payload: Payload) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }

    /// `OK` without payload.
    pub fn ok() -> Self {
        Self {
            tag: OperationTag::Ok,
            payload: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::with(OperationTag::Error, Payload::Message(message.into()))
    }

    /// Take the payload as the shape `extract` accepts, or fail as malformed.
    pub fn expect<T>(self, extract: impl FnOnce(Payload) -> Option<T>) -> Result<T> {
        expect_payload(self.tag, self.payload, extract)
    }

    /// Text of an `ERROR` reply.
    pub fn error_message(self) -> String {
        self.payload
            .and_then(Payload::into_message)
            .unwrap_or_else(|| "unknown error".to_string())
    }
}
