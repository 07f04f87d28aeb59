use crate::context::AppContext;
use crate::error::Result;
use crate::smtp::reply;
use crate::smtp::session::SmtpSession;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 4096;

pub struct SmtpServer {
    ctx: Arc<AppContext>,
    listener: TcpListener,
    connections: Arc<Semaphore>,
    idle_timeout: Duration,
}

impl SmtpServer {
    pub async fn bind(ctx: Arc<AppContext>) -> Result<Self> {
        let addr = ctx.config().server.listen_addr.clone();
        let listener = TcpListener::bind(&addr).await?;
        info!("SMTP server listening on {}", listener.local_addr()?);

        let connections = Arc::new(Semaphore::new(ctx.config().server.max_connections));
        let idle_timeout = ctx.config().session_timeout();
        Ok(Self {
            ctx,
            listener,
            connections,
            idle_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => self.accept(socket, addr),
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    fn accept(&self, mut socket: TcpStream, addr: SocketAddr) {
        info!("New connection from {}", addr);
        let ctx = Arc::clone(&self.ctx);

        let permit = match Arc::clone(&self.connections).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Connection limit reached, declining {}", addr);
                tokio::spawn(async move { decline(&mut socket, ctx.domain()).await });
                return;
            }
        };

        let now = chrono::Utc::now().timestamp();
        let admission = ctx.admit(&addr.ip().to_string(), now);
        if !admission.is_accepted() {
            info!("Connection from {} declined ({:?})", addr, admission);
            tokio::spawn(async move { decline(&mut socket, ctx.domain()).await });
            return;
        }
        debug!("Connection from {} accepted", addr);

        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            let session = SmtpSession::new(ctx);
            if let Err(e) = drive_session(session, socket, idle_timeout).await {
                error!("Session with {} failed: {}", addr, e);
            }
            info!("Connection from {} closed", addr);
            drop(permit);
        });
    }
}

async fn decline(socket: &mut TcpStream, domain: &str) {
    let line = format!("{}\r\n", reply::not_available(domain));
    let _ = socket.write_all(line.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Pump bytes between `stream` and `session` until the session is done.
///
/// A read that stays silent for `idle_timeout` ends the session with a
/// 421 reply. Pending replies are always written out before closing.
pub async fn drive_session<S>(
    mut session: SmtpSession,
    mut stream: S,
    idle_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let pending = session.data_to_transmit();
        if !pending.is_empty() {
            let len = pending.len();
            stream.write_all(pending).await?;
            stream.flush().await?;
            session.transmitted(len);
        }

        if session.should_close() {
            break;
        }

        match timeout(idle_timeout, stream.read(&mut buf)).await {
            Err(_) => session.timed_out(),
            Ok(Ok(0)) => session.remote_eot(),
            Ok(Ok(n)) => session.eat_received_data(&buf[..n]),
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    let _ = stream.shutdown().await;
    Ok(())
}
