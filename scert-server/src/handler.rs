use crate::component::ComponentServer;
use crate::transport::{TcpTransport, Transport};
use bytes::BytesMut;
use scert_proto::{FragmentAssembler, ProtocolError, ScertCodec};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Turns accepted sockets into component connections.
pub struct ConnectionHandler {
    server: Arc<ComponentServer>,
    codec: ScertCodec,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(
        server: Arc<ComponentServer>,
        codec: ScertCodec,
        read_timeout_secs: u64,
        write_timeout_secs: u64,
    ) -> Self {
        Self {
            server,
            codec,
            read_timeout: Duration::from_secs(read_timeout_secs),
            write_timeout: Duration::from_secs(write_timeout_secs),
        }
    }

    /// Runs one connection until either side closes it
    pub async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
        }

        let (mut reader, writer) = stream.into_split();
        let transport = Arc::new(TcpTransport::new(
            writer,
            peer,
            self.codec.clone(),
            self.write_timeout,
        ));
        let closed = transport.closed();
        let session = self.server.on_active(transport.clone()).await;
        let conn_id = session.id();

        let mut codec = self.codec.clone();
        let mut assembler = FragmentAssembler::default();
        let mut buf = BytesMut::with_capacity(4096);

        let reason = 'read: loop {
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(message)) => match assembler.accept(message) {
                        Ok(Some(message)) => self.server.on_message(conn_id, message).await,
                        Ok(None) => {}
                        Err(e) => warn!(conn = conn_id, "Dropping fragment: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => break 'read format!("framing error: {}", e),
                }
            }

            let read = tokio::select! {
                _ = closed.cancelled() => break 'read "closed by server".to_string(),
                read = timeout(self.read_timeout, reader.read_buf(&mut buf)) => read,
            };

            match read {
                Ok(Ok(0)) => break 'read "closed by peer".to_string(),
                Ok(Ok(n)) => debug!(conn = conn_id, "Read {} bytes", n),
                Ok(Err(e)) => break 'read ProtocolError::from(e).to_string(),
                Err(_) => break 'read "read timeout".to_string(),
            }
        };

        debug!(conn = conn_id, "Read loop ended: {}", reason);
        transport.close().await;
        self.server.on_inactive(conn_id).await;
    }
}

/// Accepts connections until `shutdown` is cancelled, then closes every
/// transport and waits for the connection tasks to finish.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    max_conns: usize,
    shutdown: CancellationToken,
) {
    let connection_semaphore = Arc::new(Semaphore::new(max_conns.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = connection_semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let handler = handler.clone();
        tasks.spawn(async move {
            handler.handle(stream, remote_addr).await;
            drop(permit);
        });

        // Reap finished connections so the set does not grow unbounded
        while tasks.try_join_next().is_some() {}
    }

    info!("Stopped accepting, closing {} connections", tasks.len());
    handler.server.close_all().await;
    while tasks.join_next().await.is_some() {}
}
