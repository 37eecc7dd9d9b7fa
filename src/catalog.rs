//! An in-memory library catalog.
//!
//! [`Catalog`] implements [`LibraryService`] over accounts, shelf counts and
//! loans held behind one mutex, so borrow and return requests coming from
//! different connections are applied one at a time. Every successful borrow
//! or return is announced to all *other* open sessions through the
//! [`SessionRegistry`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{LibraryError, Result};
use crate::model::{Account, Book, User};
use crate::service::{LibraryObserver, LibraryService};

/// Initial catalog content, as read from a seed file.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct CatalogSeed {
    pub users: Vec<Account>,
    pub books: Vec<Book>,
}

impl CatalogSeed {
    /// A small catalog for demos and tests.
    pub fn demo() -> Self {
        let account = |id, username: &str, password: &str| Account {
            id,
            username: username.to_string(),
            password: password.to_string(),
        };
        let book = |id, title: &str, author: &str, quantity| Book {
            id,
            title: title.to_string(),
            author: author.to_string(),
            quantity,
        };
        Self {
            users: vec![
                account(1, "alice", "pw"),
                account(2, "bob", "secret"),
                account(3, "carol", "hunter2"),
            ],
            books: vec![
                book(7, "The Fellowship of the Ring", "J.R.R. Tolkien", 1),
                book(13, "Dune", "Frank Herbert", 2),
                book(42, "The Hobbit", "J.R.R. Tolkien", 3),
                book(99, "Neuromancer", "William Gibson", 0),
            ],
        }
    }
}

/// Open sessions and the sink each one receives notifications on.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sinks: Arc<Mutex<HashMap<u32, Arc<dyn LibraryObserver>>>>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Arc<dyn LibraryObserver>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the sink of a new session. A user holds at most one session.
    pub fn add(&self, user_id: u32, sink: Arc<dyn LibraryObserver>) -> Result<()> {
        let mut sinks = self.lock();
        if sinks.contains_key(&user_id) {
            return Err(LibraryError::ServiceError(format!(
                "user {user_id} is already logged in"
            )));
        }
        sinks.insert(user_id, sink);
        Ok(())
    }

    /// Drop the session of `user_id`, provided `sink` is the one it registered.
    pub fn remove(&self, user_id: u32, sink: &Arc<dyn LibraryObserver>) -> Result<()> {
        let mut sinks = self.lock();
        match sinks.get(&user_id) {
            Some(registered) if Arc::ptr_eq(registered, sink) => {
                sinks.remove(&user_id);
                Ok(())
            }
            _ => Err(LibraryError::ServiceError(format!(
                "user {user_id} is not logged in"
            ))),
        }
    }

    /// Snapshot of every sink except the one of `user_id`.
    pub fn others(&self, user_id: u32) -> Vec<(u32, Arc<dyn LibraryObserver>)> {
        self.lock()
            .iter()
            .filter(|(id, _)| **id != user_id)
            .map(|(id, sink)| (*id, sink.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CatalogState {
    accounts: Vec<Account>,
    books: BTreeMap<u32, Book>,
    loans: HashSet<(u32, u32)>,
}

impl CatalogState {
    fn book(&self, book_id: u32) -> Result<&Book> {
        self.books
            .get(&book_id)
            .ok_or_else(|| LibraryError::ServiceError(format!("book {book_id} does not exist")))
    }
}

/// The library catalog.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Mutex<CatalogState>>,
    sessions: SessionRegistry,
    // taken while the state lock is still held, so fan-out follows mutation order
    notify_order: Arc<Mutex<()>>,
}

impl Catalog {
    pub fn new(seed: CatalogSeed) -> Self {
        let books = seed.books.into_iter().map(|b| (b.id, b)).collect();
        Self {
            inner: Arc::new(Mutex::new(CatalogState {
                accounts: seed.users,
                books,
                loans: HashSet::new(),
            })),
            sessions: SessionRegistry::default(),
            notify_order: Arc::new(Mutex::new(())),
        }
    }

    pub fn demo() -> Self {
        Self::new(CatalogSeed::demo())
    }

    /// Load a catalog from a JSON seed file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let seed: CatalogSeed = serde_json::from_str(&content)?;
        Ok(Self::new(seed))
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_order(&self) -> MutexGuard<'_, ()> {
        self.notify_order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fan a change out to every session but the one that caused it.
    fn broadcast(&self, origin: u32, notify: impl Fn(&dyn LibraryObserver) -> Result<()>) {
        for (user_id, sink) in self.sessions.others(origin) {
            if let Err(e) = notify(sink.as_ref()) {
                warn!("failed to notify user {user_id}: {e}");
            }
        }
    }
}

impl LibraryService for Catalog {
    fn authenticate(
        &self,
        username: &str,
        password: &str,
        observer: Arc<dyn LibraryObserver>,
    ) -> Result<User> {
        let user = {
            let state = self.state();
            state
                .accounts
                .iter()
                .find(|a| a.username == username && a.password == password)
                .map(|a| User {
                    id: a.id,
                    username: a.username.clone(),
                })
                .ok_or_else(|| {
                    LibraryError::ServiceError("invalid username or password".to_string())
                })?
        };
        self.sessions.add(user.id, observer)?;
        info!("user {} logged in", user.username);
        Ok(user)
    }

    fn end_session(&self, user_id: u32, observer: &Arc<dyn LibraryObserver>) -> Result<()> {
        self.sessions.remove(user_id, observer)?;
        info!("user {user_id} logged out");
        Ok(())
    }

    fn list_available(&self) -> Result<Vec<Book>> {
        Ok(self
            .state()
            .books
            .values()
            .filter(|b| b.quantity > 0)
            .cloned()
            .collect())
    }

    fn list_for_user(&self, user_id: u32) -> Result<Vec<Book>> {
        let state = self.state();
        Ok(state
            .books
            .values()
            .filter(|b| state.loans.contains(&(user_id, b.id)))
            .cloned()
            .collect())
    }

    fn search(&self, keyword: &str) -> Result<Vec<Book>> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(LibraryError::ServiceError(
                "search keyword must not be empty".to_string(),
            ));
        }
        Ok(self
            .state()
            .books
            .values()
            .filter(|b| {
                b.title.to_lowercase().contains(&keyword)
                    || b.author.to_lowercase().contains(&keyword)
            })
            .cloned()
            .collect())
    }

    fn borrow(&self, user_id: u32, book_id: u32) -> Result<()> {
        let (new_quantity, _order) = {
            let mut state = self.state();
            let book = state.book(book_id)?;
            if book.quantity == 0 {
                return Err(LibraryError::ServiceError(format!(
                    "no copies of \"{}\" left",
                    book.title
                )));
            }
            if !state.loans.insert((user_id, book_id)) {
                return Err(LibraryError::ServiceError(format!(
                    "book {book_id} is already borrowed by user {user_id}"
                )));
            }
            let book = state
                .books
                .get_mut(&book_id)
                .ok_or_else(|| LibraryError::ServiceError(format!("book {book_id} does not exist")))?;
            book.quantity -= 1;
            (book.quantity, self.notify_order())
        };
        debug!("user {user_id} borrowed book {book_id}, {new_quantity} left");
        self.broadcast(user_id, |sink| sink.book_updated(book_id, new_quantity));
        Ok(())
    }

    fn return_book(&self, user_id: u32, book_id: u32) -> Result<()> {
        let (returned, _order) = {
            let mut state = self.state();
            if !state.loans.remove(&(user_id, book_id)) {
                return Err(LibraryError::ServiceError(format!(
                    "user {user_id} has not borrowed book {book_id}"
                )));
            }
            let book = state
                .books
                .get_mut(&book_id)
                .ok_or_else(|| LibraryError::ServiceError(format!("book {book_id} does not exist")))?;
            book.quantity += 1;
            (book.clone(), self.notify_order())
        };
        debug!("user {user_id} returned book {book_id}");
        self.broadcast(user_id, |sink| {
            sink.book_returned(returned.id, &returned.author, &returned.title)
        });
        Ok(())
    }
}
