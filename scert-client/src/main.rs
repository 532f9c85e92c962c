use bytes::Bytes;
use scert_client::{ClientConfig, ScertClient};
use scert_proto::{AppMessage, MessageClass};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("SCERT probe v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let server_addr = config.server_addr();
    info!("Connecting to {}...", server_addr);

    let mut stream = match tokio::time::timeout(
        Duration::from_secs(config.timeouts.connect_timeout_secs),
        TcpStream::connect(&server_addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("Connection timeout");
            return Err(anyhow::anyhow!("Connection timeout"));
        }
    };

    info!("Connected to {}", server_addr);

    let mut client = ScertClient::new(
        config.client.app_id,
        config.client.target_world_id,
        config.timeouts.read_timeout_secs,
        config.timeouts.write_timeout_secs,
    )
    .with_session_encryption(config.security.encrypt_session);

    if let Some(auth_key) = &config.security.auth_key {
        let auth_key = hex::decode(auth_key)
            .map_err(|_| anyhow::anyhow!("Invalid auth key: must be hex-encoded"))?;
        client = client.with_auth_key(&auth_key)?;
    }

    let report = match client.handshake(&mut stream).await {
        Ok(report) => report,
        Err(e) => {
            error!("Handshake failed: {}", e);
            return Err(e.into());
        }
    };

    println!("\nHandshake complete in {:?}", report.elapsed);
    println!("  session key:  {}", hex::encode(&report.session_key));
    println!("  observed ip:  {:?}", report.observed_ip);
    println!("  client count: {}", report.client_count);

    for i in 0..config.client.echo_count {
        match client.echo(&mut stream).await {
            Ok(rtt) => println!("  echo {}: {:?}", i + 1, rtt),
            Err(e) => {
                warn!("Echo failed: {}", e);
                return Err(e.into());
            }
        }
    }

    println!("\nCommands: echo, app <class> <type> <hex body>, listen <secs>, quit");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(cmd) = parts.first() else {
            continue;
        };

        match cmd.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "echo" => match client.echo(&mut stream).await {
                Ok(rtt) => println!("[OK] {:?}", rtt),
                Err(e) => println!("[ERROR] {}", e),
            },
            "app" => match parse_app(&parts[1..]) {
                Ok(app) => match client.send_app(&mut stream, app).await {
                    Ok(()) => println!("[OK] sent"),
                    Err(e) => println!("[ERROR] {}", e),
                },
                Err(e) => println!("Error: {}", e),
            },
            "listen" => {
                let secs = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(5);
                listen(&mut client, &mut stream, Duration::from_secs(secs)).await;
            }
            other => println!("Unknown command: {}", other),
        }
    }

    info!("Disconnecting...");
    if let Err(e) = client.disconnect(&mut stream, 0).await {
        warn!("Disconnect failed: {}", e);
    }

    Ok(())
}

/// `app <class> <type> <hex body>`
fn parse_app(args: &[&str]) -> anyhow::Result<AppMessage> {
    let [class, kind, rest @ ..] = args else {
        anyhow::bail!("app requires <class> <type> [hex body]");
    };
    let body = match rest.first() {
        Some(body) => hex::decode(body)?,
        None => Vec::new(),
    };
    Ok(AppMessage::new(
        MessageClass(class.parse()?),
        kind.parse()?,
        Bytes::from(body),
    ))
}

/// Prints every message received for `period`
async fn listen(client: &mut ScertClient, stream: &mut TcpStream, period: Duration) {
    let deadline = tokio::time::Instant::now() + period;
    loop {
        match tokio::time::timeout_at(deadline, client.read_message(stream)).await {
            Ok(Ok(message)) => println!("  <- {} {:?}", message, message),
            Ok(Err(e)) => {
                println!("[ERROR] {}", e);
                return;
            }
            Err(_) => return,
        }
    }
}

fn load_config() -> anyhow::Result<ClientConfig> {
    for path in ["configs/client.toml", "client.toml"] {
        if let Ok(config) = ClientConfig::from_file(path) {
            info!("Loaded config from {}", path);
            return Ok(config);
        }
    }

    warn!("No config file found, using default configuration");
    Ok(ClientConfig::default_config())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
