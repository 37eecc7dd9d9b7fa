//! The business capability behind the server dispatcher, and the
//! notification sink it talks back through.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{Book, User};

/// Receiver of state changes caused by other sessions.
///
/// On the server this is a connection's push handle; on the client it is
/// whatever the caller registered at login.
pub trait LibraryObserver: Send + Sync {
    /// The copy count of `book_id` changed to `new_quantity`.
    fn book_updated(&self, book_id: u32, new_quantity: u32) -> Result<()>;

    /// A copy of `book_id` was returned.
    fn book_returned(&self, book_id: u32, author: &str, title: &str) -> Result<()>;
}

/// A trait for the library catalog.
pub trait LibraryService: Clone + Send + 'static {
    /// Check credentials and register `observer` for the new session.
    fn authenticate(
        &self,
        username: &str,
        password: &str,
        observer: Arc<dyn LibraryObserver>,
    ) -> Result<User>;

    /// Close the session of `user_id` that `observer` was registered for.
    fn end_session(&self, user_id: u32, observer: &Arc<dyn LibraryObserver>) -> Result<()>;

    /// Books with at least one copy on the shelf.
    fn list_available(&self) -> Result<Vec<Book>>;

    /// Books currently borrowed by `user_id`.
    fn list_for_user(&self, user_id: u32) -> Result<Vec<Book>>;

    fn search(&self, keyword: &str) -> Result<Vec<Book>>;

    fn borrow(&self, user_id: u32, book_id: u32) -> Result<()>;

    fn return_book(&self, user_id: u32, book_id: u32) -> Result<()>;
}
