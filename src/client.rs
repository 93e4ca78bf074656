//! Client helpers
//!
//! Thin wrappers over the wire protocol, used by the `publish` and `tail`
//! commands and by tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::broker::{BrokerError, BrokerResult, ProducerFraming, ACK, OP_READ, OP_WRITE};

/// Publish one blob and wait for the broker's `ack`.
///
/// `framing` must match the broker's `producer_framing`.
pub async fn publish<A: ToSocketAddrs>(
    addr: A,
    framing: ProducerFraming,
    payload: &[u8],
) -> BrokerResult<()> {
    let mut stream = TcpStream::connect(addr).await?;

    stream.write_u8(OP_WRITE).await?;
    if framing == ProducerFraming::LengthPrefixed {
        let len = u32::try_from(payload.len()).map_err(|_| BrokerError::PayloadTooLarge {
            size: payload.len() as u64,
            max: u32::MAX as usize,
        })?;
        stream.write_u32(len).await?;
    }
    stream.write_all(payload).await?;
    if framing == ProducerFraming::UntilEof {
        stream.shutdown().await?;
    }

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    if reply == ACK {
        Ok(())
    } else {
        Err(BrokerError::NotAcknowledged(
            String::from_utf8_lossy(&reply).into_owned(),
        ))
    }
}

/// Register as a subscriber. Every merged payload is then pushed, unframed,
/// on the returned stream.
pub async fn subscribe<A: ToSocketAddrs>(addr: A) -> BrokerResult<TcpStream> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_u8(OP_READ).await?;
    stream.flush().await?;
    Ok(stream)
}
