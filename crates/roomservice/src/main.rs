//! # roomservice
//!
//! `serve` runs the order notification server; `watch` connects a client
//! and prints the alerts it would surface.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use roomservice_client::{
    Alert, Audience, BusEvent, ClientConfig, ConnectionNotice, NotificationChannel,
    NotificationClient, WsTransport,
};
use roomservice_core::OrderContext;
use roomservice_core::logging::{init_json_subscriber, init_subscriber};
use roomservice_server::config::ServerConfig;
use roomservice_server::metrics::install_recorder;
use roomservice_server::orders::InMemoryOrders;
use roomservice_server::server::RoomserviceServer;
use roomservice_settings::{RoomserviceSettings, load_settings_from_path, settings_path};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Real-time order notifications.
#[derive(Parser, Debug)]
#[command(name = "roomservice", about = "Room service order notifications")]
struct Cli {
    /// Settings file (defaults to `~/.roomservice/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level, unless `RUST_LOG` is set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the notification server.
    Serve(ServeArgs),
    /// Connect and print surfaced alerts.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Channel URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Watch as staff: alert on every order.
    #[arg(long)]
    admin: bool,

    /// Guest room number to alert on.
    #[arg(long, conflicts_with = "admin")]
    room: Option<String>,

    /// Guest mobile number to alert on.
    #[arg(long, conflicts_with = "admin")]
    mobile: Option<String>,
}

impl WatchArgs {
    fn audience(&self) -> Audience {
        if self.admin {
            return Audience::admin();
        }
        let context = OrderContext {
            room_number: self.room.clone(),
            mobile_number: self.mobile.clone(),
        };
        if context == OrderContext::default() {
            Audience::default()
        } else {
            Audience::guest(context)
        }
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<RoomserviceSettings> {
    let path = path.unwrap_or_else(settings_path);
    load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        init_json_subscriber(&cli.log_level);
    } else {
        init_subscriber(&cli.log_level);
    }
    let settings = load_settings(cli.settings)?;

    match cli.command {
        Command::Serve(args) => serve(settings, args).await,
        Command::Watch(args) => watch(settings, args).await,
    }
}

async fn serve(settings: RoomserviceSettings, args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let drain_timeout = config.shutdown_timeout();

    let mut server = RoomserviceServer::new(config, Arc::new(InMemoryOrders::new()));
    match install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("failed to start server")?;
    info!(%addr, "serving order notifications");

    server.shutdown().shutdown_on_ctrl_c().await;
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(drain_timeout))
        .await;
    Ok(())
}

async fn watch(settings: RoomserviceSettings, args: WatchArgs) -> Result<()> {
    let mut client_settings = settings.client;
    if let Some(url) = args.url.clone() {
        client_settings.url = Some(url);
    }
    let config = ClientConfig::from(&client_settings);
    info!(url = %config.url, "watching order notifications");

    let channel = NotificationChannel::new(args.audience());
    let mut bus = channel.dispatcher().bus();
    let client = NotificationClient::mount(config, Arc::new(WsTransport), &channel);

    loop {
        tokio::select! {
            event = bus.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "watcher fell behind"),
                Err(RecvError::Closed) => break,
            },
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    client.unmount().await;
    Ok(())
}

fn print_event(event: &BusEvent) {
    match event {
        BusEvent::Alert(Alert::NewOrder(order)) => {
            println!("new order {} ({:.2})", order.id, order.total);
        }
        BusEvent::Alert(Alert::OrderStatusUpdate(order)) => {
            println!("order {} is now {}", order.id, order.status);
        }
        BusEvent::Notice(ConnectionNotice::Connected) => println!("connected"),
        BusEvent::Notice(ConnectionNotice::Unavailable {
            consecutive_failures,
        }) => {
            println!("notifications unavailable ({consecutive_failures} failed attempts), retrying");
        }
        BusEvent::Envelope(_) => {}
    }
}
