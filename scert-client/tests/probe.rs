use async_trait::async_trait;
use bytes::Bytes;
use scert_client::ScertClient;
use scert_proto::{
    AppMessage, Cipher, CipherContext, CipherSelector, HmacCipher, MessageClass, MessageRegistry,
    ScertCodec, ScertMessage, ServerApp,
};
use scert_server::component::spawn_tick_loop;
use scert_server::{
    serve, AppMessageHandler, ComponentServer, ComponentSettings, ConnectionHandler,
    DispatchContext, DispatchError, HandshakeDispatcher, NoHooks, StaticPersistence,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const SESSION_KEY: &[u8] = b"component-session-key";
const AUTH_KEY: &[u8] = b"deployment-auth-key";

/// Records uploads and answers each with an oversized reply
struct Mirror {
    uploads: Mutex<Vec<AppMessage>>,
}

fn reply_body() -> Bytes {
    (0..2000u32).map(|i| (i * 7 % 256) as u8).collect()
}

#[async_trait]
impl AppMessageHandler for Mirror {
    async fn handle_app(
        &self,
        app: AppMessage,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), DispatchError> {
        let reply = AppMessage::new(app.class, app.kind.wrapping_add(1), reply_body());
        self.uploads.lock().unwrap().push(app);
        ctx.queue(ServerApp { app: reply });
        Ok(())
    }
}

async fn start_server(mirror: Arc<Mirror>) -> (std::net::SocketAddr, CancellationToken) {
    let session: Arc<dyn Cipher> =
        Arc::new(HmacCipher::new(SESSION_KEY, CipherContext::RcClientSession).unwrap());
    let auth: Arc<dyn Cipher> =
        Arc::new(HmacCipher::new(AUTH_KEY, CipherContext::RsaAuth).unwrap());
    let codec = ScertCodec::new(
        MessageRegistry::shared(),
        CipherSelector::new(Some(session), Some(auth)),
    );

    let server = Arc::new(ComponentServer::new(
        ComponentSettings::default(),
        Arc::new(HandshakeDispatcher::new(
            "MUIS",
            SESSION_KEY.to_vec(),
            true,
            mirror,
        )),
        Arc::new(NoHooks),
        Arc::new(StaticPersistence::default()),
    ));
    let handler = Arc::new(ConnectionHandler::new(server.clone(), codec, 30, 5));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    spawn_tick_loop(server, Duration::from_millis(5), shutdown.clone());
    tokio::spawn(serve(listener, handler, 8, shutdown.clone()));
    (addr, shutdown)
}

#[tokio::test]
async fn test_encrypted_session_with_fragmented_traffic() {
    let mirror = Arc::new(Mirror {
        uploads: Mutex::new(Vec::new()),
    });
    let (addr, shutdown) = start_server(mirror.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut client = ScertClient::new(10684, 1, 5, 5)
        .with_auth_key(AUTH_KEY)
        .unwrap()
        .with_session_encryption(true);

    let report = client.handshake(&mut stream).await.unwrap();
    assert_eq!(&report.session_key[..SESSION_KEY.len()], SESSION_KEY);
    assert_eq!(report.observed_ip, Some("127.0.0.1".parse().unwrap()));
    assert_eq!(report.client_count, 1);

    client.echo(&mut stream).await.unwrap();

    let upload = AppMessage::new(
        MessageClass::LOBBY_EXT,
        0x20,
        (0..1500u32).map(|i| (i % 199) as u8).collect(),
    );
    client.send_app(&mut stream, upload.clone()).await.unwrap();

    let reply = loop {
        match client.read_message(&mut stream).await.unwrap() {
            ScertMessage::ServerApp(reply) => break reply.app,
            _ => continue,
        }
    };
    assert_eq!(reply.kind, 0x21);
    assert_eq!(reply.body, reply_body());
    assert_eq!(*mirror.uploads.lock().unwrap(), vec![upload]);

    client.disconnect(&mut stream, 0).await.unwrap();
    shutdown.cancel();
}

#[tokio::test]
async fn test_wrong_auth_key_still_gets_session_key() {
    let mirror = Arc::new(Mirror {
        uploads: Mutex::new(Vec::new()),
    });
    let (addr, shutdown) = start_server(mirror).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut client = ScertClient::new(0, 1, 5, 5)
        .with_auth_key(b"not-the-deployment-key")
        .unwrap();

    let report = client.handshake(&mut stream).await.unwrap();
    assert_eq!(&report.session_key[..SESSION_KEY.len()], SESSION_KEY);

    shutdown.cancel();
}
