use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dh_coap_bridge::config::{self, BridgeSettings};
use dh_coap_bridge::{BridgeError, BridgeResult, DeviceHiveClient, DeviceSpec, Event};
use env_logger::Env;
use log::{info, warn};

/// CoAP client for a DeviceHive gateway
#[derive(Parser)]
#[command(name = "dh-coap")]
#[command(version)]
#[command(about = "CoAP client for a DeviceHive gateway")]
struct Cli {
    /// Settings file (default: $XDG_CONFIG_HOME/dh-coap/dh-coap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Gateway host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Gateway port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Access token for the `authenticate` action
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the device, subscribe to its commands and exchange a command and a notification
    Demo {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Send one command to a device and print its id
    SendCommand {
        /// Command name (e.g., reboot)
        command: String,

        /// Target device (default: device.device_id from the settings)
        #[arg(long)]
        device: Option<String>,
    },
    /// Send one notification from a device
    Notify {
        /// Notification name
        notification: String,

        /// Source device (default: device.device_id from the settings)
        #[arg(long)]
        device: Option<String>,
    },
    /// Print the user settings file location
    ConfigPath,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> BridgeResult<()> {
    if let Commands::ConfigPath = cli.command {
        match config::user_config_path() {
            Some(path) => println!("{}", path.display()),
            None => {
                return Err(BridgeError::config(
                    "could not determine the user config directory",
                ));
            }
        }
        return Ok(());
    }

    let settings = load_settings(&cli)?;
    let (client, _transport) = DeviceHiveClient::connect_coap(&settings).await?;
    login(&client, &settings).await?;

    match cli.command {
        Commands::Demo { duration } => demo(client, &settings, duration).await,
        Commands::SendCommand { command, device } => {
            let device = device.unwrap_or_else(|| settings.device.device_id.clone());
            let command_id = client.send_command(&device, &command).await?;
            println!("{}", command_id);
            Ok(())
        }
        Commands::Notify {
            notification,
            device,
        } => {
            let device = device.unwrap_or_else(|| settings.device.device_id.clone());
            client.send_notification(&device, &notification).await?;
            Ok(())
        }
        Commands::ConfigPath => Ok(()),
    }
}

/// File settings (explicit path, else the user file, else defaults) with CLI overrides.
fn load_settings(cli: &Cli) -> BridgeResult<BridgeSettings> {
    let mut settings = match &cli.config {
        Some(path) => config::load_config_file(path)?,
        None => config::load_user_config()?.unwrap_or_default(),
    };

    if let Some(host) = &cli.host {
        settings.gateway.host = host.clone();
    }
    if let Some(port) = cli.port {
        settings.gateway.port = port;
    }
    if let Some(token) = &cli.token {
        settings.device.access_token = Some(token.clone());
    }

    settings.validate()?;
    Ok(settings)
}

/// Authenticate with the configured token, or obtain one from login/password first.
async fn login(client: &DeviceHiveClient, settings: &BridgeSettings) -> BridgeResult<()> {
    let device = &settings.device;
    let token = match (&device.access_token, &device.login, &device.password) {
        (Some(token), _, _) => token.clone(),
        (None, Some(login), Some(password)) => {
            client.create_token(login, password).await?.access_token
        }
        _ => {
            return Err(BridgeError::config(
                "no access token; set device.access_token, pass --token, or configure device.login and device.password",
            ));
        }
    };

    client.authenticate(&token).await?;
    info!(target: "dh_coap::cli", "Authenticated");
    Ok(())
}

async fn demo(
    client: DeviceHiveClient,
    settings: &BridgeSettings,
    duration: Option<u64>,
) -> BridgeResult<()> {
    let device_id = settings.device.device_id.clone();
    let name = settings
        .device
        .device_name
        .clone()
        .unwrap_or_else(|| device_id.clone());

    let mut spec = DeviceSpec::named(name);
    spec.network_id = settings.device.network_id;
    client.save_device(&device_id, &spec).await?;
    info!(target: "dh_coap::cli", "Device {} saved", device_id);

    // Handlers run on the reader task; follow-up requests go to a spawned task.
    let responder = client.downgrade();
    let responder_device = device_id.clone();
    client.on_command_insert(Some(move |event: &Event| {
        info!(target: "dh_coap::cli", "Command inserted: {}", event.raw());
        let Some(command_id) = event.command_id() else {
            warn!(target: "dh_coap::cli", "command/insert event without command id");
            return;
        };
        let Some(client) = responder.upgrade() else {
            return;
        };
        let device_id = responder_device.clone();
        tokio::spawn(async move {
            match client.update_command(&device_id, &command_id, "Done").await {
                Ok(_) => info!(target: "dh_coap::cli", "Command {} updated", command_id),
                Err(e) => warn!(target: "dh_coap::cli", "Updating command {} failed: {}", command_id, e),
            }
        });
    }));
    client.on_command_update(Some(|event: &Event| {
        info!(target: "dh_coap::cli", "Command updated: {}", event.raw());
    }));
    client.on_notification(Some(|event: &Event| {
        info!(target: "dh_coap::cli", "Notification: {}", event.raw());
    }));

    let commands = client.subscribe_commands(&device_id, true).await?;
    let notifications = client.subscribe_notifications(&device_id).await?;
    info!(
        target: "dh_coap::cli",
        "Subscribed (commands: {}, notifications: {})",
        commands,
        notifications
    );

    let command_id = client.send_command(&device_id, "coap-test-command").await?;
    info!(target: "dh_coap::cli", "Command {} sent", command_id);

    client
        .send_notification(&device_id, "coap-test-notification")
        .await?;
    info!(target: "dh_coap::cli", "Notification sent");

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => {
            info!(target: "dh_coap::cli", "Waiting for events, press Ctrl-C to exit");
            tokio::signal::ctrl_c().await?;
        }
    }

    client.close();
    Ok(())
}
