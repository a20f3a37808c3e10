//! Moving timestamps between machines over TCP.
//!
//! The wire format is as small as it gets: a fresh connection per message,
//! carrying the sender's logical clock as ASCII decimal followed by a newline.
//! There is no handshake and no acknowledgement.
//!
//! Sends and accepts are not bounded by any timeout. A peer that stalls a
//! connect or write holds up only the send it is part of, but it does hold it
//! up for as long as the operating system lets it.

use crate::{logging, peer::PeerAddress, queues::InboundQueue, Shutdown};
use std::{io, net::SocketAddr};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::Instrument;

/// Longest line the handler will consider. `u64::MAX` is 20 digits, so
/// anything longer is garbage and is discarded without being buffered.
pub const MAX_LINE_LEN: u64 = 32;

/// A source of incoming connections.
#[async_trait::async_trait]
pub trait Acceptor: Send + 'static {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait::async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

#[async_trait::async_trait]
impl<A: Acceptor + ?Sized> Acceptor for Box<A> {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        (**self).accept().await
    }
}

/// Spawns the accept loop for `listener`.
///
/// Every accepted connection gets its own handler task which feeds `queue`.
/// The loop ends when `shutdown` is signalled, dropping (and so closing) the
/// listener, or on the first accept error. An accept error is logged and takes
/// down only the listener: the owning machine keeps ticking without the
/// ability to receive.
pub fn spawn_listener<A: Acceptor>(
    machine_id: u64,
    listener: A,
    queue: InboundQueue,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(accept_loop(machine_id, listener, queue, shutdown).in_current_span())
}

/// The body of [`spawn_listener`]. Returns once the listener is finished.
pub async fn accept_loop<A: Acceptor>(
    machine_id: u64,
    mut listener: A,
    queue: InboundQueue,
    shutdown: Shutdown,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                tracing::trace!(machine_id, %remote, "accepted connection");
                tokio::spawn(
                    handle_connection(stream, queue.clone(), shutdown.clone()).in_current_span(),
                );
            }
            Err(e) => {
                logging::accept_error_event(machine_id, &e);
                break;
            }
        }
    }
}

/// Reads newline-delimited timestamps from one connection until the peer
/// closes it, the read fails, or the machine shuts down.
///
/// Lines that are not a non-negative decimal integer are dropped, as are
/// lines longer than [`MAX_LINE_LEN`].
pub async fn handle_connection<S>(stream: S, queue: InboundQueue, shutdown: Shutdown)
where
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut overlong = false;
    while !shutdown.is_shut_down() {
        line.clear();
        match (&mut reader)
            .take(MAX_LINE_LEN)
            .read_until(b'\n', &mut line)
            .await
        {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if !line.ends_with(b"\n") && line.len() as u64 == MAX_LINE_LEN {
                    overlong = true;
                    continue;
                }
                // The tail of an overlong line.
                if std::mem::take(&mut overlong) {
                    continue;
                }
                if let Some(timestamp) = parse_timestamp(&line) {
                    queue.push(timestamp);
                }
            }
        }
    }
}

/// Parses one line of the wire format.
pub fn parse_timestamp(line: &[u8]) -> Option<u64> {
    std::str::from_utf8(line).ok()?.trim().parse().ok()
}

/// Opens a connection to `peer`, writes `clock` as one line and closes it.
pub async fn send_clock(peer: &PeerAddress, clock: u64) -> io::Result<()> {
    let mut stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
    stream.write_all(format!("{clock}\n").as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_wire_lines() {
        assert_eq!(parse_timestamp(b"42\n"), Some(42));
        assert_eq!(parse_timestamp(b"  7 \r\n"), Some(7));
        assert_eq!(parse_timestamp(b"hello\n"), None);
        assert_eq!(parse_timestamp(b"-3\n"), None);
        assert_eq!(parse_timestamp(b"\n"), None);
        assert_eq!(parse_timestamp(&[0xff, 0xfe, b'\n']), None);
    }

    #[tokio::test]
    async fn handler_skips_malformed_lines() {
        let queue = InboundQueue::new();
        let input: &[u8] = b"5\nnot a number\n\n12\n3.5\n9";
        handle_connection(input, queue.clone(), Shutdown::new()).await;
        assert_eq!(queue.pop(), Some((5, 2)));
        assert_eq!(queue.pop(), Some((12, 1)));
        assert_eq!(queue.pop(), Some((9, 0)));
    }

    #[tokio::test]
    async fn handler_accepts_largest_timestamp() {
        let queue = InboundQueue::new();
        let input = format!("{}\n", u64::MAX);
        handle_connection(input.as_bytes(), queue.clone(), Shutdown::new()).await;
        assert_eq!(queue.pop(), Some((u64::MAX, 0)));
    }

    #[tokio::test]
    async fn handler_discards_overlong_lines() {
        let queue = InboundQueue::new();
        let mut input = vec![b'1'; 1000];
        input.extend_from_slice(b"\n7\n");
        input.extend_from_slice(&[b'9'; 40]);
        input.extend_from_slice(b"\n8");
        handle_connection(&input[..], queue.clone(), Shutdown::new()).await;
        assert_eq!(queue.pop(), Some((7, 1)));
        assert_eq!(queue.pop(), Some((8, 0)));
        assert!(queue.is_empty());
    }

    struct FailingAcceptor;

    #[async_trait::async_trait]
    impl Acceptor for FailingAcceptor {
        async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
            Err(io::Error::new(io::ErrorKind::Other, "too many open files"))
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn accept_error_ends_listener() {
        let shutdown = Shutdown::new();
        tokio::time::timeout(
            Duration::from_secs(1),
            accept_loop(3, FailingAcceptor, InboundQueue::new(), shutdown.clone()),
        )
        .await
        .expect("the accept loop should end on its own");
        assert!(!shutdown.is_shut_down());
        assert!(logs_contain("error accepting connection, listener stopped"));
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn spawned_listener_finishes_after_accept_error() {
        let task = spawn_listener(3, FailingAcceptor, InboundQueue::new(), Shutdown::new());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handler_stops_after_shutdown() {
        let queue = InboundQueue::new();
        let shutdown = Shutdown::new();
        shutdown.shut_down();
        handle_connection(&b"1\n2\n"[..], queue.clone(), shutdown).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn sent_clocks_arrive_in_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let queue = InboundQueue::new();
        let shutdown = Shutdown::new();
        let task = spawn_listener(1, listener, queue.clone(), shutdown.clone());

        let peer = PeerAddress::new("127.0.0.1", port);
        send_clock(&peer, 17).await.unwrap();
        send_clock(&peer, 18).await.unwrap();

        while queue.len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let mut received = vec![queue.pop().unwrap().0, queue.pop().unwrap().0];
        received.sort();
        assert_eq!(received, vec![17, 18]);

        shutdown.shut_down();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn send_to_closed_port_fails() {
        // Bind and immediately release a port so nothing is listening on it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let peer = PeerAddress::new("127.0.0.1", port);
        assert!(send_clock(&peer, 1).await.is_err());
    }
}
