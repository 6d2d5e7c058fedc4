//! A transport is very simply a source and sink of text messages.  Connection setup, framing
//! choices beyond "one message per line", retries and authentication all belong to whoever
//! constructs the transport; [`serve`] only moves messages between it and a [`DuplexPeer`].
use std::borrow::Cow;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{DuplexError, Result};
use crate::peer::DuplexPeer;

/// A source and sink of messages, backed by some connection the caller already established.
pub trait Transport: Send + Sized + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transport-specific identifier of the remote peer, for logging
    fn remote_peer(&self) -> Cow<'static, str>;

    /// Should not complete until the message has been handed to the underlying connection.
    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

    /// Receive the next message, or `Ok(None)` once the transport is closed.
    ///
    /// Must be cancel safe: dropping the future before it completes must not lose a message.
    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;
}

/// Pull one line off a stream of lines.  `next()` only borrows the stream, so dropping the future
/// part way through leaves whatever was already read buffered in the stream.
async fn next_line<S, E>(lines: &mut S) -> Result<Option<String>>
where
    S: Stream<Item = Result<String, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    lines.next().await.transpose().map_err(DuplexError::transport)
}

async fn push_line<S>(sink: &mut S, line: String) -> Result<()>
where
    S: Sink<String> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    sink.send(line).await.map_err(DuplexError::transport)
}

/// An inbound stream and an outbound sink of whole messages; handy for in-process plumbing.
impl<In, InErr, Out> Transport for (In, Out)
where
    In: Stream<Item = Result<String, InErr>> + Unpin + Send + 'static,
    InErr: std::error::Error + Send + Sync + 'static,
    Out: Sink<String> + Unpin + Send + 'static,
    Out::Error: std::error::Error + Send + Sync + 'static,
{
    type Error = DuplexError;

    fn remote_peer(&self) -> Cow<'static, str> {
        Cow::Owned(format!(
            "stream {} / sink {}",
            std::any::type_name::<In>(),
            std::any::type_name::<Out>()
        ))
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<()>> + Send + '_ {
        let (_, outbound) = self;
        push_line(outbound, message)
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>>> + Send + '_ {
        let (inbound, _) = self;
        next_line(inbound)
    }
}

/// One message per line over an async byte stream: a socket, a pipe, or stdio joined with
/// [`tokio::io::join`].
impl<Io> Transport for Framed<Io, LinesCodec>
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = DuplexError;

    fn remote_peer(&self) -> Cow<'static, str> {
        Cow::Owned(format!("lines over {}", std::any::type_name::<Io>()))
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<()>> + Send + '_ {
        push_line(self, message)
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>>> + Send + '_ {
        next_line(self)
    }
}

/// Run a peer over a transport until the transport closes or `cancel` fires.
///
/// `outbound` is the receiver from [`DuplexPeerBuilder::bind_channel`](crate::DuplexPeerBuilder::bind_channel).
/// Each inbound message is handled in its own task so that a slow method never holds up the
/// responses the peer is waiting for.  Tasks still running when the loop ends are aborted; the
/// peer itself is left alone, so destroy it if it won't be reused.
pub async fn serve<T: Transport>(
    peer: DuplexPeer,
    mut transport: T,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) -> Result<()> {
    let span = tracing::debug_span!("serve", peer = %peer.name(), remote = %transport.remote_peer());
    let mut inbound = JoinSet::new();

    let result = event_loop(&peer, &mut transport, &mut outbound, &mut inbound, &cancel)
        .instrument(span)
        .await;

    inbound.shutdown().await;
    result
}

async fn event_loop<T: Transport>(
    peer: &DuplexPeer,
    transport: &mut T,
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: &mut JoinSet<Result<()>>,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::debug!("Transport loop starting");

    loop {
        tokio::select! {
            raw = outbound.recv() => {
                let Some(raw) = raw else {
                    tracing::debug!("Outbound channel closed; transport loop terminating");
                    break Ok(());
                };

                let message = String::from_utf8(raw).map_err(|source| DuplexError::NotText { source })?;
                tracing::trace!(%message, "Sending message");
                transport.send_message(message).await.map_err(DuplexError::transport)?;
            },
            received = transport.receive_message() => {
                match received {
                    Ok(Some(message)) => {
                        tracing::trace!(%message, "Received message");
                        let peer = peer.clone();
                        inbound.spawn(
                            async move { peer.handle_message(message.as_bytes()).await }.in_current_span(),
                        );
                    }
                    Ok(None) => {
                        tracing::debug!("Remote peer closed the transport; transport loop terminating");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::error!(err = %e, "Error receiving message from transport");
                        break Err(DuplexError::transport(e));
                    }
                }
            },
            Some(joined) = inbound.join_next(), if !inbound.is_empty() => {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!(err = %e, "Inbound message not handled"),
                    Err(join_err) if join_err.is_panic() => {
                        tracing::error!(%join_err, "Inbound message handler panicked");
                    }
                    Err(join_err) => tracing::debug!(%join_err, "Inbound message handler cancelled"),
                }
            },
            _ = cancel.cancelled() => {
                tracing::debug!("Cancellation signal received; transport loop terminating");
                break Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_test_logging;
    use assert_matches::assert_matches;
    use rpcwire_jsonrpc::{MethodError, Params};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio_util::codec::LinesCodec;

    fn peer(name: &str) -> (DuplexPeer, mpsc::UnboundedReceiver<Vec<u8>>) {
        let name = name.to_string();
        DuplexPeer::builder()
            .with_name(name.clone())
            .with_method("echo", |params: Params| async move { Ok::<_, MethodError>(params.into_value()) })
            .with_method("whoami", move |_: Params| {
                let name = name.clone();
                async move { Ok::<_, MethodError>(name) }
            })
            .with_method("sleep", |params: Params| async move {
                let (ms,): (u64,) = params.parse()?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, MethodError>(ms)
            })
            .bind_channel()
            .unwrap()
    }

    #[tokio::test]
    async fn stream_sink_transport() {
        let (tx1, rx1) = futures::channel::mpsc::channel(10);
        let (tx2, rx2) = futures::channel::mpsc::channel(10);

        let mut left = (rx2.map(Ok::<String, std::io::Error>), tx1);
        let mut right = (rx1.map(Ok::<String, std::io::Error>), tx2);

        assert!(left.remote_peer().contains("mpsc::Receiver"));
        assert!(left.remote_peer().contains("mpsc::Sender"));

        left.send_message("hello".to_string()).await.unwrap();
        assert_eq!(right.receive_message().await.unwrap(), Some("hello".to_string()));

        drop(left);
        assert_eq!(right.receive_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn framed_transport() {
        let (a, b) = duplex(1024);
        let mut left = Framed::new(a, LinesCodec::new());
        let mut right = Framed::new(b, LinesCodec::new());

        assert!(!left.remote_peer().is_empty());

        left.send_message(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            right.receive_message().await.unwrap().as_deref(),
            Some(r#"{"jsonrpc":"2.0","method":"ping"}"#)
        );
    }

    #[tokio::test]
    async fn peers_talk_over_a_pipe() {
        init_test_logging();
        let (a, b) = duplex(4096);
        let cancel = CancellationToken::new();

        let (left, left_out) = peer("left");
        let (right, right_out) = peer("right");

        let left_loop = tokio::spawn(serve(
            left.clone(),
            Framed::new(a, LinesCodec::new()),
            left_out,
            cancel.clone(),
        ));
        let right_loop = tokio::spawn(serve(
            right.clone(),
            Framed::new(b, LinesCodec::new()),
            right_out,
            cancel.clone(),
        ));

        let name: String = left.call("whoami").await.unwrap();
        assert_eq!(name, "right");
        let name: String = right.call("whoami").await.unwrap();
        assert_eq!(name, "left");

        // A slow call on one side doesn't hold up a fast one
        let slow = left.request("sleep", json!([200])).unwrap();
        let fast = left.request("echo", json!({"fast": true})).unwrap().await.unwrap();
        assert_eq!(fast, json!({"fast": true}));
        assert_eq!(slow.await.unwrap(), json!(200));

        cancel.cancel();
        left_loop.await.unwrap().unwrap();
        right_loop.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_transport_ends_the_loop() {
        init_test_logging();
        let (a, b) = duplex(1024);
        let (left, left_out) = peer("left");

        let left_loop = tokio::spawn(serve(
            left,
            Framed::new(a, LinesCodec::new()),
            left_out,
            CancellationToken::new(),
        ));

        drop(b);
        assert_matches!(left_loop.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn receive_errors_end_the_loop_with_a_transport_error() {
        init_test_logging();
        let (left, left_out) = peer("left");

        let inbound = futures::stream::iter([Err::<String, _>(std::io::Error::other("connection reset"))]);
        let (sink, _keep) = futures::channel::mpsc::unbounded::<String>();

        let outcome = serve(left, (inbound, sink), left_out, CancellationToken::new()).await;
        assert_matches!(outcome, Err(DuplexError::Transport { source }) if source.to_string() == "connection reset");
    }

    #[tokio::test]
    async fn garbage_on_the_wire_gets_a_parse_error() {
        init_test_logging();
        let (a, b) = duplex(1024);
        let (left, left_out) = peer("left");
        let cancel = CancellationToken::new();

        let left_loop = tokio::spawn(serve(left, Framed::new(a, LinesCodec::new()), left_out, cancel.clone()));

        let mut remote = Framed::new(b, LinesCodec::new());
        remote.send_message("this is not json".to_string()).await.unwrap();
        let response: serde_json::Value =
            serde_json::from_str(&remote.receive_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(
            response,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "Parse error"}})
        );

        cancel.cancel();
        left_loop.await.unwrap().unwrap();
    }
}
