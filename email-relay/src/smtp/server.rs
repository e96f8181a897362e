use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use super::handlers::{Action, CommandHandler};
use super::reply::Reply;
use super::session::{Envelope, Session};
use super::DataError;

/// Receives every accepted message. Delivery runs after the client has its
/// `250`, so failures are the sink's to log. Deliveries are tracked by the
/// server and awaited by [`SmtpServer::drain`].
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, envelope: Envelope);
}

#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Longest command line accepted, CRLF included.
    pub max_line_length: usize,
    pub max_message_bytes: usize,
    pub idle_timeout: Duration,
    pub data_timeout: Duration,
}

enum Line {
    Eof,
    TooLong,
    Text(String),
}

/// How a plaintext conversation ended.
enum Flow<S> {
    Closed,
    StartTls(S),
}

pub struct SmtpServer {
    hostname: String,
    handler: CommandHandler,
    limits: Limits,
    tls: Option<TlsAcceptor>,
    sink: Arc<dyn MessageSink>,
    deliveries: TaskTracker,
}

impl SmtpServer {
    pub fn new(
        handler: CommandHandler,
        limits: Limits,
        tls: Option<TlsAcceptor>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            hostname: handler.policy().hostname.clone(),
            handler,
            limits,
            tls,
            sink,
            deliveries: TaskTracker::new(),
        }
    }

    /// Accept connections until `shutdown` resolves. Each connection runs on
    /// its own task.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("SMTP listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept SMTP connection");
                            continue;
                        }
                    };
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
            }
        }
    }

    /// Wait up to `grace` for accepted messages still being delivered.
    /// Returns `false` when some were still in flight at the deadline.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.deliveries.close();
        let pending = self.deliveries.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight deliveries");
        }
        match tokio::time::timeout(grace, self.deliveries.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    pending = self.deliveries.len(),
                    "Shutdown grace elapsed with accepted messages undelivered"
                );
                false
            }
        }
    }

    /// Run one client conversation to completion, including a STARTTLS upgrade.
    pub async fn handle_connection<S>(&self, mut io: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = tracing::info_span!("smtp_session", peer = %peer, tls = tracing::field::Empty);
        async move {
            metrics::counter!("smtp_sessions_total").increment(1);
            tracing::debug!("SMTP connection opened");

            if let Err(e) = write_reply(&mut io, &Reply::greeting(&self.hostname)).await {
                tracing::debug!(error = %e, "Client went away before the greeting");
                return;
            }

            let raw = match self.converse(io, Session::new(false)).await {
                Ok(Flow::Closed) => return,
                Ok(Flow::StartTls(raw)) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, "SMTP session failed");
                    return;
                }
            };

            let Some(acceptor) = &self.tls else {
                return;
            };
            match acceptor.accept(raw).await {
                Ok(stream) => {
                    tracing::Span::current().record("tls", true);
                    // Nothing from the plaintext phase survives the upgrade
                    if let Err(e) = self.converse(stream, Session::new(true)).await {
                        tracing::warn!(error = %e, "SMTP session failed after STARTTLS");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "TLS handshake failed"),
            }
        }
        .instrument(span)
        .await
    }

    async fn converse<S>(&self, io: S, mut session: Session) -> std::io::Result<Flow<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(io);

        loop {
            let line = match self.next_line(&mut reader).await? {
                Some(Line::Text(line)) => line,
                Some(Line::TooLong) => {
                    write_reply(reader.get_mut(), &Reply::line_too_long()).await?;
                    continue;
                }
                Some(Line::Eof) => return Ok(Flow::Closed),
                None => {
                    write_reply(reader.get_mut(), &Reply::timeout()).await?;
                    return Ok(Flow::Closed);
                }
            };

            match self.handler.handle(&mut session, &line) {
                Action::Reply(reply) => write_reply(reader.get_mut(), &reply).await?,
                Action::Quit => {
                    write_reply(reader.get_mut(), &Reply::closing()).await?;
                    return Ok(Flow::Closed);
                }
                Action::StartTls => {
                    write_reply(reader.get_mut(), &Reply::go_ahead()).await?;
                    // Anything pipelined behind STARTTLS is plaintext and dropped
                    return Ok(Flow::StartTls(reader.into_inner()));
                }
                Action::AuthChallenge => {
                    write_reply(reader.get_mut(), &Reply::auth_continue()).await?;
                    let reply = match self.next_line(&mut reader).await? {
                        Some(Line::Text(response)) => self.handler.auth_response(&mut session, &response),
                        Some(Line::TooLong) => Reply::line_too_long(),
                        Some(Line::Eof) => return Ok(Flow::Closed),
                        None => {
                            write_reply(reader.get_mut(), &Reply::timeout()).await?;
                            return Ok(Flow::Closed);
                        }
                    };
                    write_reply(reader.get_mut(), &reply).await?;
                }
                Action::Data => {
                    write_reply(reader.get_mut(), &Reply::start_data()).await?;
                    let outcome = self.receive(&mut reader, &session).await;
                    session.rset();
                    match outcome {
                        Ok(reply) => write_reply(reader.get_mut(), &reply).await?,
                        Err(DataError::Timeout) => {
                            metrics::counter!("smtp_messages_rejected_total", "reason" => "timeout").increment(1);
                            write_reply(reader.get_mut(), &Reply::timeout()).await?;
                            return Ok(Flow::Closed);
                        }
                        Err(DataError::ConnectionClosed) => return Ok(Flow::Closed),
                        Err(DataError::Io(e)) => return Err(e),
                        Err(DataError::MaxBodyExceeded(_)) => {
                            write_reply(reader.get_mut(), &Reply::message_too_large()).await?
                        }
                    }
                }
            }
        }
    }

    /// Read the body of one DATA command and hand the envelope to the sink.
    async fn receive<R>(&self, reader: &mut R, session: &Session) -> Result<Reply, DataError>
    where
        R: AsyncBufRead + Unpin,
    {
        let body = tokio::time::timeout(
            self.limits.data_timeout,
            read_body(reader, self.limits.max_message_bytes),
        )
        .await
        .map_err(|_| DataError::Timeout)?;

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                if let DataError::MaxBodyExceeded(limit) = &e {
                    metrics::counter!("smtp_messages_rejected_total", "reason" => "size").increment(1);
                    tracing::info!(limit, "Rejected oversized message");
                }
                return Err(e);
            }
        };

        let envelope = session.envelope(body);
        tracing::info!(
            sender = %envelope.sender,
            recipients = envelope.recipients.len(),
            bytes = envelope.body.len(),
            "Message accepted"
        );
        metrics::counter!("smtp_messages_accepted_total").increment(1);

        let sink = Arc::clone(&self.sink);
        self.deliveries.spawn(
            async move { sink.deliver(envelope).await }.instrument(tracing::Span::current()),
        );

        Ok(Reply::new(250, "OK: queued"))
    }

    /// `None` when the idle timeout elapses.
    async fn next_line<R>(&self, reader: &mut R) -> std::io::Result<Option<Line>>
    where
        R: AsyncBufRead + Unpin,
    {
        match tokio::time::timeout(
            self.limits.idle_timeout,
            read_line(reader, self.limits.max_line_length),
        )
        .await
        {
            Ok(line) => line.map(Some),
            Err(_) => Ok(None),
        }
    }
}

async fn write_reply<W>(io: &mut W, reply: &Reply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    io.write_all(reply.to_string().as_bytes()).await?;
    io.flush().await
}

/// Read one command line, CRLF stripped. Overlong lines are consumed
/// through their terminator and reported as [`Line::TooLong`].
async fn read_line<R>(reader: &mut R, max: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader).take(max as u64).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(Line::Eof);
    }

    if !buf.ends_with(b"\n") {
        if n < max {
            // EOF mid-line
            return Ok(Line::Eof);
        }
        loop {
            buf.clear();
            let n = (&mut *reader).take(max as u64).read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Ok(Line::Eof);
            }
            if buf.ends_with(b"\n") {
                return Ok(Line::TooLong);
            }
        }
    }

    let text = String::from_utf8_lossy(&buf);
    Ok(Line::Text(text.trim_end_matches(['\r', '\n']).to_string()))
}

/// Read a dot-terminated DATA body, undoing dot-stuffing. Once the body
/// passes `max` bytes the remainder is drained up to the terminator.
async fn read_body<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, DataError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    let mut chunk = Vec::new();
    let mut at_line_start = true;
    let mut exceeded = false;

    loop {
        chunk.clear();
        // Bounded so a single endless line cannot grow the buffer
        let n = (&mut *reader)
            .take(max as u64 + 3)
            .read_until(b'\n', &mut chunk)
            .await?;
        if n == 0 {
            return Err(DataError::ConnectionClosed);
        }

        let starts_line = at_line_start;
        at_line_start = chunk.ends_with(b"\n");

        let content: &[u8] = if starts_line {
            if chunk == b".\r\n" || chunk == b".\n" {
                break;
            }
            chunk.strip_prefix(b".").unwrap_or(&chunk)
        } else {
            &chunk
        };

        if exceeded {
            continue;
        }
        if body.len() + content.len() > max {
            exceeded = true;
            body = Vec::new();
        } else {
            body.extend_from_slice(content);
        }
    }

    if exceeded {
        Err(DataError::MaxBodyExceeded(max))
    } else {
        Ok(body)
    }
}
