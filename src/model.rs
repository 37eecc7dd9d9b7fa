//! Records carried as message payloads.

use serde::{Deserialize, Serialize};

/// An authenticated library member.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Member id, used as the session identity.
    pub id: u32,
    /// Login name.
    pub username: String,
}

/// Server-side account entry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    pub id: u32,
    pub username: String,
    pub password: String,
}

/// A catalog title and the number of copies on the shelf.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: u32,
    pub title: String,
    pub author: String,
    pub quantity: u32,
}

/// Login credentials.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The member/book pair of a borrow or return.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserBook {
    pub user_id: u32,
    pub book_id: u32,
}

/// Push payload announcing a new copy count.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookQuantity {
    pub book_id: u32,
    pub new_quantity: u32,
}

/// Push payload announcing a returned book.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BookInfo {
    pub id: u32,
    pub author: String,
    pub title: String,
}
