//! Send command lines to a running relay over its socket server.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use relay_core::RelayConfig;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

#[derive(Parser, Debug)]
pub struct SendArgs {
    /// Command lines to send, e.g. `play,HeartBeat`
    pub lines: Vec<String>,

    /// Relay URL (defaults to ws://127.0.0.1:<configured port>)
    #[arg(long)]
    pub url: Option<String>,

    /// Fire the configured test event
    #[arg(long)]
    pub test: bool,

    /// Seconds to wait for each reply
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,
}

fn default_url(config: &RelayConfig) -> Result<String> {
    match config.port() {
        0 => bail!("socket server is disabled in config; pass --url"),
        port => Ok(format!("ws://127.0.0.1:{port}")),
    }
}

/// The lines to send, with the test event first when requested.
fn outgoing_lines(args: &SendArgs, test_event: Option<&str>) -> Vec<String> {
    let mut lines = Vec::with_capacity(args.lines.len() + 1);
    if let Some(event) = test_event {
        lines.push(format!("play,{event}"));
    }
    lines.extend(args.lines.iter().cloned());
    lines
}

pub async fn execute(config_path: &Path, args: SendArgs) -> Result<()> {
    // The config is only needed for the default URL and the test event.
    let config = if args.url.is_none() || args.test {
        Some(
            RelayConfig::from_file(config_path)
                .with_context(|| format!("loading {}", config_path.display()))?,
        )
    } else {
        None
    };
    let url = match (&args.url, &config) {
        (Some(url), _) => url.clone(),
        (None, Some(config)) => default_url(config)?,
        (None, None) => bail!("no relay URL; pass --url"),
    };

    let test_event = match (&config, args.test) {
        (Some(config), true) => Some(config.test_event()),
        _ => None,
    };
    let lines = outgoing_lines(&args, test_event);
    if lines.is_empty() {
        bail!("nothing to send; pass command lines or --test");
    }

    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    debug!(%url, "Connected to relay");

    let wait = Duration::from_secs(args.timeout.max(1));
    for line in lines {
        socket.send(Message::Text(line.clone())).await?;
        let reply = loop {
            match tokio::time::timeout(wait, socket.next()).await {
                Err(_) => bail!("no reply to `{line}` within {}s", wait.as_secs()),
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => bail!("relay closed the connection"),
                Ok(Some(Err(err))) => return Err(err).context("reading reply"),
                Ok(Some(Ok(Message::Text(reply)))) => break reply,
                Ok(Some(Ok(_))) => {}
            }
        };
        println!("{line} -> {reply}");
    }

    socket.close(None).await.ok();
    Ok(())
}
