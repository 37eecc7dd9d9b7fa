use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use library_rpc::model::Book;
use library_rpc::{Codec, LibraryClient, LibraryObserver};

#[derive(Parser, Debug)]
#[command(author, version)]
struct Cli {
    #[arg(short, long, default_value = "127.0.0.1:4000")]
    addr: String,
    #[arg(long, value_enum, default_value_t = Codec::Json)]
    codec: Codec,
    #[arg(short, long)]
    user: String,
    #[arg(short, long)]
    password: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List books with copies on the shelf
    Available,
    /// List the books you have borrowed
    Mine,
    Search {
        keyword: String,
    },
    Borrow {
        book_id: u32,
    },
    #[command(name = "return")]
    Return {
        book_id: u32,
    },
    /// Print notifications until stdin is closed
    Watch,
}

/// Prints notifications to stdout.
struct PrintObserver;

impl LibraryObserver for PrintObserver {
    fn book_updated(&self, book_id: u32, new_quantity: u32) -> library_rpc::Result<()> {
        println!("book {book_id} now has {new_quantity} copies");
        Ok(())
    }

    fn book_returned(&self, book_id: u32, author: &str, title: &str) -> library_rpc::Result<()> {
        println!("book {book_id} returned: {title} by {author}");
        Ok(())
    }
}

fn print_books(books: &[Book]) {
    if books.is_empty() {
        println!("No books found");
    }
    for book in books {
        println!("{}\t{}\t{}\t{}", book.id, book.title, book.author, book.quantity);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut client = LibraryClient::new(cli.addr).with_codec(cli.codec);
    let user = client.login(&cli.user, &cli.password, Arc::new(PrintObserver))?;

    let outcome = match cli.command {
        Commands::Available => client.available_books().map(|books| print_books(&books)),
        Commands::Mine => client.user_books(user.id).map(|books| print_books(&books)),
        Commands::Search { keyword } => client.search_books(&keyword).map(|books| print_books(&books)),
        Commands::Borrow { book_id } => client.borrow_book(user.id, book_id),
        Commands::Return { book_id } => client.return_book(user.id, book_id),
        Commands::Watch => {
            println!("watching as {}, close stdin to stop", user.username);
            let mut sink = Vec::new();
            io::stdin().read_to_end(&mut sink)?;
            Ok(())
        }
    };

    // list errors already closed the session on the server
    if client.is_connected() {
        client.logout(user.id)?;
    }
    outcome?;
    Ok(())
}
