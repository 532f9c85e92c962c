use scert_proto::{Cipher, CipherContext, CipherSelector, HmacCipher, MessageRegistry, ScertCodec};
use scert_server::component::spawn_tick_loop;
use scert_server::{
    serve, ComponentServer, ComponentSettings, ConnectionHandler, HandshakeDispatcher, NoHooks,
    ServerConfig, StaticPersistence, UnhandledApp,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    init_logging(&config);

    info!(
        "SCERT {} v{} starting...",
        config.server.name,
        env!("CARGO_PKG_VERSION")
    );

    let session_key = hex::decode(&config.security.session_key)
        .map_err(|_| anyhow::anyhow!("Invalid session key: must be hex-encoded"))?;
    let auth_key = hex::decode(&config.security.auth_key)
        .map_err(|_| anyhow::anyhow!("Invalid auth key: must be hex-encoded"))?;

    if session_key.len() < 16 {
        warn!(
            "Session key is shorter than recommended (16 bytes). Using length: {} bytes",
            session_key.len()
        );
    }

    let session_cipher: Arc<dyn Cipher> = Arc::new(HmacCipher::new(
        &session_key,
        CipherContext::RcClientSession,
    )?);
    let auth_cipher: Arc<dyn Cipher> =
        Arc::new(HmacCipher::new(&auth_key, CipherContext::RsaAuth)?);
    let selector = CipherSelector::new(Some(session_cipher), Some(auth_cipher));
    let codec = ScertCodec::new(MessageRegistry::shared(), selector)
        .with_max_frame_size(config.limits.max_frame_bytes);

    let dispatcher = Arc::new(HandshakeDispatcher::new(
        config.server.name.clone(),
        session_key,
        config.security.strict_state,
        Arc::new(UnhandledApp),
    ));
    if config.security.strict_state {
        info!("Strict handshake ordering enabled");
    }

    let server = Arc::new(ComponentServer::new(
        ComponentSettings::from(&config),
        dispatcher,
        Arc::new(NoHooks),
        Arc::new(StaticPersistence::from_config(&config.moderation)),
    ));

    let handler = Arc::new(ConnectionHandler::new(
        server.clone(),
        codec,
        config.limits.read_timeout_secs,
        config.limits.write_timeout_secs,
    ));

    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;

    info!("Listening on {}", listen_addr);
    info!("Maximum concurrent connections: {}", config.limits.max_conns);

    let shutdown = CancellationToken::new();
    let ticker = spawn_tick_loop(server.clone(), config.tick.tick_interval(), shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    serve(listener, handler, config.limits.max_conns, shutdown.clone()).await;

    shutdown.cancel();
    ticker.await?;
    server.tick().await;

    info!("{} stopped", config.server.name);
    Ok(())
}

fn load_config() -> anyhow::Result<ServerConfig> {
    for path in [
        "/etc/scert/server.toml",
        "configs/server.toml",
        "server.toml",
    ] {
        if let Ok(config) = ServerConfig::from_file(path) {
            info!("Loaded config from {}", path);
            return Ok(config);
        }
    }

    warn!("No config file found, using default configuration");
    warn!("IMPORTANT: Change the session and auth keys in production!");
    Ok(ServerConfig::default_config())
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }
}
