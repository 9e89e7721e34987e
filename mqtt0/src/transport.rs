// Copyright (c) 2025 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The connection-oriented byte stream consumed by broker and client.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// A connection-oriented byte stream supplied by the host.
///
/// Anything readable and writable qualifies: a `TcpStream`, a TLS or
/// WebSocket stream wrapper, or an in-memory duplex pipe in tests. The
/// library never opens connections itself.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An owned, type-erased transport.
pub(crate) type BoxedTransport = Box<dyn Transport>;

/// Read half of a split transport; owned by the connection's read loop.
pub(crate) type TransportReader = ReadHalf<BoxedTransport>;

/// Write half of a split transport; shared behind a write mutex.
pub(crate) type TransportWriter = WriteHalf<BoxedTransport>;

/// Split a transport into its read and write halves.
pub(crate) fn split(transport: BoxedTransport) -> (TransportReader, TransportWriter) {
    tokio::io::split(transport)
}
