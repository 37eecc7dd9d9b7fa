//! Framed object channel over an ordered byte stream.
//!
//! A connection is split into one [`ChannelReader`] and one [`ChannelWriter`].
//! Each half is meant to be driven from a single thread; callers that push
//! from several threads wrap the writer in a mutex.

use std::io::{BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::net::TcpStream;

use serde::{Serialize, de::DeserializeOwned};

use crate::codec::Codec;
use crate::error::Result;

/// Receiving half, yields whole messages of type `T`.
pub struct ChannelReader<T, R: Read = TcpStream> {
    inner: BufReader<R>,
    codec: Codec,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned, R: Read> ChannelReader<T, R> {
    pub fn new(inner: R, codec: Codec) -> Self {
        Self {
            inner: BufReader::new(inner),
            codec,
            _message: PhantomData,
        }
    }

    /// Block until one full message is available.
    ///
    /// Fails with [`ChannelClosed`](crate::LibraryError::ChannelClosed) at end
    /// of stream and with
    /// [`TransportError`](crate::LibraryError::TransportError) on I/O faults.
    pub fn receive(&mut self) -> Result<T> {
        self.codec.decode(&mut self.inner)
    }
}

/// Sending half, writes whole messages of type `T`.
pub struct ChannelWriter<T, W: Write = TcpStream> {
    inner: BufWriter<W>,
    codec: Codec,
    _message: PhantomData<fn(&T)>,
}

impl<T: Serialize, W: Write> ChannelWriter<T, W> {
    pub fn new(inner: W, codec: Codec) -> Self {
        Self {
            inner: BufWriter::new(inner),
            codec,
            _message: PhantomData,
        }
    }

    /// Write one message and flush it to the peer.
    pub fn send(&mut self, message: &T) -> Result<()> {
        self.codec.encode(message, &mut self.inner)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

/// Split a connected stream into a reader of `I` and a writer of `O`.
pub fn split<I, O>(stream: &TcpStream, codec: Codec) -> Result<(ChannelReader<I>, ChannelWriter<O>)>
where
    I: DeserializeOwned,
    O: Serialize,
{
    let reader = ChannelReader::new(stream.try_clone()?, codec);
    let writer = ChannelWriter::new(stream.try_clone()?, codec);
    Ok((reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LibraryError;
    use crate::model::UserBook;
    use crate::protocol::{OperationTag, Payload, Request};

    #[test]
    fn sent_messages_arrive_in_order() {
        let mut writer = ChannelWriter::new(Vec::new(), Codec::Json);
        let borrow = Request::new(
            OperationTag::BorrowBook,
            Payload::UserBook(UserBook {
                user_id: 1,
                book_id: 42,
            }),
        );
        writer.send(&Request::bare(OperationTag::GetAvailableBooks)).unwrap();
        writer.send(&borrow).unwrap();

        let mut reader = ChannelReader::<Request, _>::new(writer.get_ref().as_slice(), Codec::Json);
        assert_eq!(reader.receive().unwrap().tag, OperationTag::GetAvailableBooks);
        assert_eq!(reader.receive().unwrap(), borrow);
        assert!(matches!(reader.receive(), Err(LibraryError::ChannelClosed)));
    }

    #[test]
    fn send_flushes_every_message() {
        let mut writer = ChannelWriter::new(Vec::new(), Codec::Bincode);
        writer.send(&Request::bare(OperationTag::GetAvailableBooks)).unwrap();
        assert!(!writer.get_ref().is_empty());
    }

    #[test]
    fn undecodable_input_is_malformed() {
        let mut reader = ChannelReader::<Request, _>::new(&b"not json at all"[..], Codec::Json);
        assert!(matches!(
            reader.receive(),
            Err(LibraryError::MalformedMessage(_))
        ));
    }
}
