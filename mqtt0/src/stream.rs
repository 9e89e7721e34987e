// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Packet framing helpers on top of async byte streams.

use codec::{DecodeError, EncodePacket};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

/// Initial capacity of per-connection packet buffers; packets up to the
/// configured maximum packet size spill into a larger allocation.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Read one complete MQTT packet into `buf`.
///
/// The fixed header is read byte-by-byte to respect the variable-length
/// remaining-length field, then the advertised number of bytes follows.
/// On success `buf` holds the whole packet including the fixed header.
///
/// # Errors
///
/// Returns error if the stream ends, the remaining-length field is
/// malformed, or the packet exceeds `max_packet_size`.
pub async fn read_packet<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_packet_size: usize,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.push(reader.read_u8().await?);

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut terminated = false;
    for _ in 0..4 {
        let byte = reader.read_u8().await?;
        buf.push(byte);
        remaining_length += ((byte & 0x7f) as usize) * multiplier;
        if byte & 0x80 == 0 {
            terminated = true;
            break;
        }
        multiplier *= 128;
    }
    if !terminated {
        return Err(DecodeError::InvalidVarInt.into());
    }

    if remaining_length > max_packet_size {
        return Err(DecodeError::PacketTooLarge.into());
    }

    let header_len = buf.len();
    buf.resize(header_len + remaining_length, 0);
    reader.read_exact(&mut buf[header_len..]).await?;

    Ok(())
}

/// Serialize `packet` and write it to `writer`.
///
/// # Errors
///
/// Returns error if encoding fails or the stream is broken.
pub async fn write_packet<W, P>(writer: &mut W, packet: &P) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    P: EncodePacket,
{
    let mut buf = Vec::with_capacity(READ_BUFFER_SIZE);
    packet.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::v3::PingRequestPacket;

    #[test]
    fn test_read_packet() {
        tokio_test::block_on(async {
            let data: &[u8] = &[0xc0, 0x00, 0x30, 0x04, 0x00, 0x01, b'a', b'x'];
            let mut reader = data;

            let mut buf = Vec::new();
            read_packet(&mut reader, &mut buf, 1024).await.unwrap();
            assert_eq!(&buf, &[0xc0, 0x00]);

            read_packet(&mut reader, &mut buf, 1024).await.unwrap();
            assert_eq!(&buf, &[0x30, 0x04, 0x00, 0x01, b'a', b'x']);

            let err = read_packet(&mut reader, &mut buf, 1024).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::ConnectionClosed);
        });
    }

    #[test]
    fn test_read_packet_too_large() {
        tokio_test::block_on(async {
            // Remaining length of 128 with a 1-byte cap.
            let data: &[u8] = &[0x30, 0x80, 0x01];
            let mut reader = data;
            let mut buf = Vec::new();
            let err = read_packet(&mut reader, &mut buf, 1).await.unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
        });
    }

    #[test]
    fn test_write_packet() {
        tokio_test::block_on(async {
            let mut writer = Vec::new();
            write_packet(&mut writer, &PingRequestPacket::new())
                .await
                .unwrap();
            assert_eq!(&writer, &[0xc0, 0x00]);
        });
    }
}
