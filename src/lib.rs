pub mod protocol;

pub mod model;

pub mod codec;

pub mod channel;

pub mod service;

pub mod catalog;

pub mod dispatcher;

pub mod server;

pub mod client;

pub mod error;

pub use crate::catalog::{Catalog, CatalogSeed, SessionRegistry};
pub use crate::client::LibraryClient;
pub use crate::codec::Codec;
pub use crate::error::{LibraryError, Result};
pub use crate::server::{LibraryServer, ShutdownHandle};
pub use crate::service::{LibraryObserver, LibraryService};
