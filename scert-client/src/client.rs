use bytes::{Bytes, BytesMut};
use rand::RngCore;
use scert_proto::{
    encode_frames, AppMessage, Cipher, CipherContext, ClientAppToServer, ClientConnectReadyRequire,
    ClientConnectReadyTcp, ClientConnectTcp, ClientCryptKeyPublic, ClientDisconnectWithReason,
    ClientEcho, ClientHello, FragmentAssembler, HmacCipher, ProtocolError, Result, ScertCodec,
    ScertMessage, CRYPTKEY_LEN,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration, Instant};
use tokio_util::codec::Decoder;
use tracing::{debug, info};

macro_rules! expect_message {
    ($client:expr, $stream:expr, $variant:ident) => {
        match $client.read_message($stream).await? {
            ScertMessage::$variant(body) => body,
            other => return Err(unexpected(stringify!($variant), &other)),
        }
    };
}

fn unexpected(expected: &'static str, got: &ScertMessage) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        expected,
        got: got.id().to_string(),
    }
}

/// What the server told us while connecting
#[derive(Debug, Clone)]
pub struct HandshakeReport {
    pub session_key: Vec<u8>,
    pub observed_ip: Option<Ipv4Addr>,
    pub client_count: u16,
    pub elapsed: Duration,
}

/// Client side of a SCERT component connection.
pub struct ScertClient {
    app_id: i32,
    target_world_id: u32,
    codec: ScertCodec,
    auth_cipher: Option<Arc<dyn Cipher>>,
    session_cipher: Option<Arc<dyn Cipher>>,
    encrypt_session: bool,
    read_buf: BytesMut,
    assembler: FragmentAssembler,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ScertClient {
    pub fn new(
        app_id: i32,
        target_world_id: u32,
        read_timeout_secs: u64,
        write_timeout_secs: u64,
    ) -> Self {
        Self {
            app_id,
            target_world_id,
            codec: ScertCodec::default(),
            auth_cipher: None,
            session_cipher: None,
            encrypt_session: false,
            read_buf: BytesMut::with_capacity(4096),
            assembler: FragmentAssembler::default(),
            read_timeout: Duration::from_secs(read_timeout_secs),
            write_timeout: Duration::from_secs(write_timeout_secs),
        }
    }

    /// Encrypts the public key exchange under the deployment auth key
    pub fn with_auth_key(mut self, key: &[u8]) -> Result<Self> {
        self.auth_cipher = Some(Arc::new(HmacCipher::new(key, CipherContext::RsaAuth)?));
        Ok(self)
    }

    /// Encrypts everything after the key exchange with the session key the server hands out
    pub fn with_session_encryption(mut self, enabled: bool) -> Self {
        self.encrypt_session = enabled;
        self
    }

    /// Runs the connect handshake, hello through connect-complete
    pub async fn handshake<S>(&mut self, stream: &mut S) -> Result<HandshakeReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let started = Instant::now();

        self.write_message(stream, &ClientHello::default().into()).await?;
        expect_message!(self, stream, ServerHello);
        debug!("HELLO -> SERVER_HELLO");

        let mut public = [0u8; CRYPTKEY_LEN];
        rand::thread_rng().fill_bytes(&mut public);
        let auth = self.auth_cipher.clone();
        self.write_with(stream, &ClientCryptKeyPublic { key: public }.into(), auth.as_deref())
            .await?;
        let peer = expect_message!(self, stream, ServerCryptKeyPeer);
        debug!("CRYPTKEY_PUBLIC -> SERVER_CRYPTKEY_PEER");

        if self.encrypt_session {
            self.session_cipher = Some(Arc::new(HmacCipher::new(
                &peer.key,
                CipherContext::RcClientSession,
            )?));
        }

        let connect = ClientConnectTcp {
            target_world_id: self.target_world_id,
            app_id: self.app_id,
            trailer: Bytes::new(),
        };
        self.write_message(stream, &connect.into()).await?;
        expect_message!(self, stream, ServerConnectRequire);

        self.write_message(stream, &ClientConnectReadyRequire::default().into())
            .await?;
        expect_message!(self, stream, ServerCryptKeyGame);
        let accept = expect_message!(self, stream, ServerConnectAcceptTcp);

        self.write_message(stream, &ClientConnectReadyTcp::default().into())
            .await?;
        let complete = expect_message!(self, stream, ServerConnectComplete);
        expect_message!(self, stream, ServerEcho);

        let report = HandshakeReport {
            session_key: peer.key.to_vec(),
            observed_ip: accept.ip,
            client_count: complete.client_count,
            elapsed: started.elapsed(),
        };
        info!(
            "Connected in {:?}, server sees us as {:?}",
            report.elapsed, report.observed_ip
        );
        Ok(report)
    }

    /// Sends an echo and waits for the same value to come back
    pub async fn echo<S>(&mut self, stream: &mut S) -> Result<Duration>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut value = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut value);
        let started = Instant::now();

        self.write_message(
            stream,
            &ClientEcho {
                value: Bytes::copy_from_slice(&value),
            }
            .into(),
        )
        .await?;

        loop {
            match self.read_message(stream).await? {
                ScertMessage::ClientEcho(echo) if echo.value[..] == value => {
                    let rtt = started.elapsed();
                    debug!("ECHO {} in {:?}", hex::encode(value), rtt);
                    return Ok(rtt);
                }
                other => debug!("Skipping {} while waiting for echo", other),
            }
        }
    }

    /// Sends an application envelope, fragmenting it when oversized
    pub async fn send_app<S>(&mut self, stream: &mut S, app: AppMessage) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.write_message(stream, &ClientAppToServer { app }.into())
            .await
    }

    pub async fn disconnect<S>(&mut self, stream: &mut S, reason: u8) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.write_message(stream, &ClientDisconnectWithReason { reason }.into())
            .await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Next message from the server, with fragments already reassembled
    pub async fn read_message<S>(&mut self, stream: &mut S) -> Result<ScertMessage>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            while let Some(message) = self.codec.decode(&mut self.read_buf)? {
                if let Some(message) = self.assembler.accept(message)? {
                    return Ok(message);
                }
            }

            let read = timeout(self.read_timeout, stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| {
                    ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "read timeout",
                    ))
                })??;

            if read == 0 {
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    async fn write_message<S>(&self, stream: &mut S, message: &ScertMessage) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        self.write_with(stream, message, self.session_cipher.as_deref())
            .await
    }

    async fn write_with<S>(
        &self,
        stream: &mut S,
        message: &ScertMessage,
        cipher: Option<&dyn Cipher>,
    ) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let frames = encode_frames(message, cipher)?;
        timeout(self.write_timeout, async {
            for frame in &frames {
                stream.write_all(frame).await?;
            }
            stream.flush().await
        })
        .await
        .map_err(|_| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write timeout",
            ))
        })??;
        Ok(())
    }
}
