use std::path::PathBuf;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use gatekeeper_core::keys::agree_and_derive;
use gatekeeper_core::wire::{Request, Response};
use rand::rngs::OsRng;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use x25519_dalek::{EphemeralSecret, PublicKey};

const DEFAULT_SERVER: &str = "ws://127.0.0.1:8080";

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", about = "Talk to a gatekeeper server", version)]
struct Cli {
    /// Server WebSocket URL
    #[arg(long, global = true, default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a key exchange and report whether the key was released
    Handshake {
        /// Skip the key-confirmation signature
        #[arg(long, conflicts_with = "bad_sign")]
        no_sign: bool,
        /// Send a signature that does not verify
        #[arg(long)]
        bad_sign: bool,
    },
    /// Upload a file and print the gate's decision
    Upload {
        /// File to upload
        path: PathBuf,
        /// Claimed MIME type
        #[arg(long = "type")]
        claimed_type: Option<String>,
        /// Filename to send instead of the path's file name
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (mut ws, _) = connect_async(cli.server.as_str())
        .await
        .with_context(|| format!("connecting to {}", cli.server))?;

    let accepted = match cli.command {
        Command::Handshake { no_sign, bad_sign } => handshake(&mut ws, no_sign, bad_sign).await?,
        Command::Upload {
            path,
            claimed_type,
            name,
        } => upload(&mut ws, path, claimed_type, name).await?,
    };

    ws.close(None).await.ok();
    if !accepted {
        std::process::exit(2);
    }
    Ok(())
}

async fn handshake(ws: &mut Ws, no_sign: bool, bad_sign: bool) -> anyhow::Result<bool> {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let client_public = PublicKey::from(&secret).to_bytes();

    let init = Request::HandshakeInit {
        client_public: client_public.to_vec(),
    };
    let (handshake_id, server_public) = match roundtrip(ws, &init).await? {
        Response::HandshakeStarted {
            handshake_id,
            server_public,
        } => (handshake_id, server_public),
        Response::Error(code) => bail!("init refused: {}", code),
        other => bail!("unexpected response to init: {:?}", other),
    };
    println!("handshake    {}", handshake_id);
    println!("server key   {}", URL_SAFE_NO_PAD.encode(server_public));

    let client_key = agree_and_derive(
        secret,
        &PublicKey::from(server_public),
        &handshake_id,
        &client_public,
        &server_public,
    )?;
    let signature = if no_sign {
        None
    } else if bad_sign {
        Some([0u8; 32])
    } else {
        Some(client_key.confirmation_tag(&handshake_id)?)
    };

    let validate = Request::HandshakeValidate {
        handshake_id,
        signature,
    };
    match roundtrip(ws, &validate).await? {
        Response::HandshakeAccepted {
            session_key,
            report,
        } => {
            println!("outcome      ACCEPT (score {:.3})", report.combined_score);
            println!("fingerprint  {}", session_key.fingerprint());
            println!(
                "key match    {}",
                if session_key == client_key { "yes" } else { "NO" }
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(true)
        }
        Response::HandshakeSuspicious(report) => {
            println!("outcome      REJECT (score {:.3})", report.combined_score);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(false)
        }
        Response::Error(code) => bail!("validate refused: {}", code),
        other => bail!("unexpected response to validate: {:?}", other),
    }
}

async fn upload(
    ws: &mut Ws,
    path: PathBuf,
    claimed_type: Option<String>,
    name: Option<String>,
) -> anyhow::Result<bool> {
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = name.or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });

    let request = Request::Upload {
        filename,
        claimed_type,
        data,
    };
    match roundtrip(ws, &request).await? {
        Response::FileDecision(report) => {
            let verdict = if report.is_accept() { "ACCEPT" } else { "REJECT" };
            println!("outcome      {} (score {:.3})", verdict, report.combined_score);
            println!(
                "detected     {} level {} entropy {:.3}",
                report.assessment.detected_type,
                report.assessment.criticality_level,
                report.assessment.entropy
            );
            for issue in &report.assessment.issues {
                println!("issue        {}", issue);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.is_accept())
        }
        Response::Error(code) => bail!("upload refused: {}", code),
        other => bail!("unexpected response to upload: {:?}", other),
    }
}

async fn roundtrip(ws: &mut Ws, request: &Request) -> anyhow::Result<Response> {
    let wire = request
        .to_wire()
        .map_err(|code| anyhow::anyhow!("cannot encode request: {}", code))?;
    ws.send(Message::Binary(wire)).await?;
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Binary(data) => {
                return Response::parse(&data)
                    .map_err(|code| anyhow::anyhow!("malformed response: {}", code));
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    bail!("server closed the connection")
}
