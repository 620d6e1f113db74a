use crate::constants::MAX_FRAME_BYTES;
use crate::error::{Error, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LEN_PREFIX_BYTES: usize = 4;

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Writes one message as a u32 length prefix followed by its bincode body.
pub async fn write_frame<W, M>(stream: &mut W, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let body = wire_options()
        .serialize(message)
        .map_err(|e| Error::Protocol(e.to_string()))?;

    if body.len() > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit {}",
            body.len(),
            MAX_FRAME_BYTES
        )));
    }

    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;

    Ok(())
}

/// Reads one length-prefixed message. Oversized or garbled frames are
/// protocol errors; short reads surface as transport errors.
pub async fn read_frame<R, M>(stream: &mut R) -> Result<M>
where
    R: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    let mut prefix = [0u8; LEN_PREFIX_BYTES];
    stream.read_exact(&mut prefix).await?;

    let body_len = u32::from_be_bytes(prefix) as usize;

    if body_len > MAX_FRAME_BYTES {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds limit {}",
            body_len, MAX_FRAME_BYTES
        )));
    }

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;

    wire_options()
        .deserialize(&body)
        .map_err(|e| Error::Protocol(e.to_string()))
}
