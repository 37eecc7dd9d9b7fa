//! Self-delimiting message encodings.
//!
//! Messages carry no length prefix; each encoding delimits a value on its
//! own, so a reader consumes exactly one message per decode.

use std::io::{self, Read, Write};

use bincode::error::{DecodeError, EncodeError};
use clap::ValueEnum;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{LibraryError, Result};

/// Upper bound for a single bincode message.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Wire encoding. Both peers of a connection must agree on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Codec {
    /// One JSON object per message, newline separated.
    #[default]
    Json,
    /// bincode serde encoding with the standard configuration.
    Bincode,
}

impl Codec {
    /// Write one message. Does not flush.
    pub fn encode<T: Serialize, W: Write>(self, message: &T, writer: &mut W) -> Result<()> {
        match self {
            Codec::Json => {
                serde_json::to_writer(&mut *writer, message).map_err(from_json)?;
                writer.write_all(b"\n")?;
            }
            Codec::Bincode => {
                let config = bincode::config::standard().with_limit::<MAX_MESSAGE_SIZE>();
                bincode::serde::encode_into_std_write(message, writer, config)
                    .map_err(from_encode)?;
            }
        }
        Ok(())
    }

    /// Read exactly one message, blocking until it is complete.
    pub fn decode<T: DeserializeOwned, R: Read>(self, reader: &mut R) -> Result<T> {
        match self {
            Codec::Json => {
                let mut de = serde_json::Deserializer::from_reader(reader);
                Deserialize::deserialize(&mut de).map_err(from_json)
            }
            Codec::Bincode => {
                let config = bincode::config::standard().with_limit::<MAX_MESSAGE_SIZE>();
                bincode::serde::decode_from_std_read(reader, config).map_err(from_decode)
            }
        }
    }
}

fn from_json(e: serde_json::Error) -> LibraryError {
    if e.is_eof() {
        LibraryError::ChannelClosed
    } else if e.is_io() {
        LibraryError::TransportError(io::Error::from(e))
    } else {
        LibraryError::MalformedMessage(e.to_string())
    }
}

fn from_io(e: io::Error) -> LibraryError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LibraryError::ChannelClosed
    } else {
        LibraryError::TransportError(e)
    }
}

fn from_decode(e: DecodeError) -> LibraryError {
    match e {
        DecodeError::Io { inner, .. } => from_io(inner),
        DecodeError::UnexpectedEnd { .. } => LibraryError::ChannelClosed,
        other => LibraryError::MalformedMessage(other.to_string()),
    }
}

fn from_encode(e: EncodeError) -> LibraryError {
    match e {
        EncodeError::Io { inner, .. } => LibraryError::TransportError(inner),
        other => LibraryError::MalformedMessage(other.to_string()),
    }
}
