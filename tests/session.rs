mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use common::{Event, QUIET, Recorder, TestServer, WAIT};
use crossbeam_utils::thread::scope;
use library_rpc::{Codec, LibraryClient, LibraryError, LibraryObserver, SessionRegistry};

fn ids(books: &[library_rpc::model::Book]) -> Vec<u32> {
    books.iter().map(|b| b.id).collect()
}

fn wait_until_empty(sessions: &SessionRegistry) {
    let start = Instant::now();
    while !sessions.is_empty() {
        assert!(start.elapsed() < WAIT, "sessions were not released");
        thread::sleep(QUIET / 10);
    }
}

#[test]
fn login_list_search_logout() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        let alice = client.login("alice", "pw", observer).unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(alice.username, "alice");
        assert!(client.is_connected());

        assert_eq!(ids(&client.available_books().unwrap()), [7, 13, 42]);
        assert_eq!(ids(&client.search_books("Tolkien").unwrap()), [7, 42]);
        assert!(client.user_books(alice.id).unwrap().is_empty());

        client.logout(alice.id).unwrap();
        assert!(!client.is_connected());
        assert!(server.catalog.sessions().is_empty());
    }
    server.stop();
}

#[test]
fn failed_login_closes_and_next_login_reconnects() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();

        let err = client.login("alice", "wrong", observer.clone()).unwrap_err();
        assert!(
            matches!(&err, LibraryError::ServiceError(m) if m == "invalid username or password"),
            "{err:?}"
        );
        assert!(!client.is_connected());
        assert!(matches!(
            client.available_books(),
            Err(LibraryError::NotConnected)
        ));

        let alice = client.login("alice", "pw", observer).unwrap();
        assert!(client.is_connected());
        client.logout(alice.id).unwrap();
    }
    server.stop();
}

#[test]
fn borrow_and_return_reach_every_other_session() {
    let server = TestServer::start(Codec::Json);
    {
        let mut alice = LibraryClient::new(server.addr.to_string());
        let mut bob = LibraryClient::new(server.addr.to_string());
        let mut carol = LibraryClient::new(server.addr.to_string());
        let (alice_sink, alice_events) = Recorder::new();
        let (bob_sink, bob_events) = Recorder::new();
        let (carol_sink, carol_events) = Recorder::new();
        let a = alice.login("alice", "pw", alice_sink).unwrap();
        let b = bob.login("bob", "secret", bob_sink).unwrap();
        let c = carol.login("carol", "hunter2", carol_sink).unwrap();

        alice.borrow_book(a.id, 42).unwrap();
        assert_eq!(bob_events.recv_timeout(WAIT).unwrap(), Event::Updated(42, 2));
        assert_eq!(carol_events.recv_timeout(WAIT).unwrap(), Event::Updated(42, 2));
        assert!(alice_events.recv_timeout(QUIET).is_err());

        bob.borrow_book(b.id, 13).unwrap();
        bob.return_book(b.id, 13).unwrap();
        assert_eq!(alice_events.recv_timeout(WAIT).unwrap(), Event::Updated(13, 1));
        assert_eq!(
            alice_events.recv_timeout(WAIT).unwrap(),
            Event::Returned(13, "Frank Herbert".into(), "Dune".into())
        );

        // pushes interleaved with replies never complete a call
        assert_eq!(ids(&alice.user_books(a.id).unwrap()), [42]);
        assert_eq!(ids(&alice.available_books().unwrap()), [7, 13, 42]);

        alice.logout(a.id).unwrap();
        bob.logout(b.id).unwrap();
        carol.logout(c.id).unwrap();
    }
    server.stop();
}

#[test]
fn borrow_errors_keep_the_connection() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        let alice = client.login("alice", "pw", observer).unwrap();

        assert!(matches!(
            client.borrow_book(alice.id, 99),
            Err(LibraryError::ServiceError(_))
        ));
        assert!(matches!(
            client.return_book(alice.id, 42),
            Err(LibraryError::ServiceError(_))
        ));
        assert!(client.is_connected());
        assert_eq!(ids(&client.available_books().unwrap()), [7, 13, 42]);
        client.logout(alice.id).unwrap();
    }
    server.stop();
}

#[test]
fn list_errors_close_the_connection() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        client.login("alice", "pw", observer).unwrap();

        assert!(matches!(
            client.search_books("   "),
            Err(LibraryError::ServiceError(_))
        ));
        assert!(!client.is_connected());
        wait_until_empty(server.catalog.sessions());
    }
    server.stop();
}

#[test]
fn logout_closes_even_when_refused() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        client.login("alice", "pw", observer).unwrap();

        assert!(matches!(
            client.logout(2),
            Err(LibraryError::ServiceError(_))
        ));
        assert!(!client.is_connected());
        wait_until_empty(server.catalog.sessions());
    }
    server.stop();
}

#[test]
fn second_login_on_a_connection_ends_it() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        client.login("alice", "pw", observer.clone()).unwrap();

        assert!(matches!(
            client.login("bob", "secret", observer.clone()),
            Err(LibraryError::ServiceError(_))
        ));
        assert!(!client.is_connected());
        wait_until_empty(server.catalog.sessions());

        let alice = client.login("alice", "pw", observer).unwrap();
        client.logout(alice.id).unwrap();
    }
    server.stop();
}

struct SlowObserver {
    started: Mutex<Sender<()>>,
    finished: AtomicBool,
}

impl LibraryObserver for SlowObserver {
    fn book_updated(&self, _book_id: u32, _new_quantity: u32) -> library_rpc::Result<()> {
        let _ = self.started.lock().unwrap().send(());
        thread::sleep(QUIET);
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn book_returned(&self, _book_id: u32, _author: &str, _title: &str) -> library_rpc::Result<()> {
        Ok(())
    }
}

#[test]
fn no_notification_runs_after_disconnect() {
    let server = TestServer::start(Codec::Json);
    {
        let mut alice = LibraryClient::new(server.addr.to_string());
        let mut bob = LibraryClient::new(server.addr.to_string());
        let (started_tx, started) = mpsc::channel();
        let slow = Arc::new(SlowObserver {
            started: Mutex::new(started_tx),
            finished: AtomicBool::new(false),
        });
        let (alice_sink, _) = Recorder::new();
        let a = alice.login("alice", "pw", alice_sink).unwrap();
        let b = bob.login("bob", "secret", slow.clone()).unwrap();

        alice.borrow_book(a.id, 42).unwrap();
        started.recv_timeout(WAIT).unwrap();
        bob.logout(b.id).unwrap();
        assert!(slow.finished.load(Ordering::SeqCst));

        alice.logout(a.id).unwrap();
    }
    server.stop();
}

#[test]
fn dropped_client_releases_its_session() {
    let server = TestServer::start(Codec::Json);
    {
        let mut client = LibraryClient::new(server.addr.to_string());
        let (observer, _) = Recorder::new();
        client.login("bob", "secret", observer).unwrap();
        assert_eq!(server.catalog.sessions().len(), 1);
    }
    wait_until_empty(server.catalog.sessions());
    server.stop();
}

#[test]
fn last_copy_goes_to_exactly_one_borrower() {
    let server = TestServer::start(Codec::Json);
    let addr = server.addr.to_string();
    let accounts = [("alice", "pw"), ("bob", "secret"), ("carol", "hunter2")];

    let granted = scope(|s| {
        let handles: Vec<_> = accounts
            .iter()
            .map(|(name, password)| {
                let addr = addr.clone();
                s.spawn(move |_| {
                    let mut client = LibraryClient::new(addr);
                    let (observer, _) = Recorder::new();
                    let user = client.login(name, password, observer).unwrap();
                    let granted = client.borrow_book(user.id, 7).is_ok();
                    client.logout(user.id).unwrap();
                    granted
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count()
    })
    .unwrap();

    assert_eq!(granted, 1);
    server.stop();
}

#[test]
fn bincode_sessions_carry_notifications() {
    let server = TestServer::start(Codec::Bincode);
    {
        let mut alice = LibraryClient::new(server.addr.to_string()).with_codec(Codec::Bincode);
        let mut bob = LibraryClient::new(server.addr.to_string()).with_codec(Codec::Bincode);
        let (alice_sink, _) = Recorder::new();
        let (bob_sink, bob_events) = Recorder::new();
        let a = alice.login("alice", "pw", alice_sink).unwrap();
        let b = bob.login("bob", "secret", bob_sink).unwrap();

        alice.borrow_book(a.id, 7).unwrap();
        assert_eq!(bob_events.recv_timeout(WAIT).unwrap(), Event::Updated(7, 0));
        assert_eq!(ids(&bob.available_books().unwrap()), [13, 42]);

        alice.logout(a.id).unwrap();
        bob.logout(b.id).unwrap();
    }
    server.stop();
}
