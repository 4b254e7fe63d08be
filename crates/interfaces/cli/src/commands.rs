use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use onoffpc_config::AppConfig;
use onoffpc_control::{AllowList, ControlContext, ControlParts, StatusSnapshot};
use onoffpc_host::{HostProber, MacAddress, PingProber, UdpWakeSender, WakeSender};
use onoffpc_link::{LinkSettings, RemoteLink};
use onoffpc_telegram::{TelegramApi, TelegramSurface, start_bot};

pub async fn run(config: AppConfig) -> Result<()> {
    let mac = parse_mac(&config)?;
    let poll_timeout = Duration::from_secs(config.telegram.poll_timeout_secs);
    let api = Arc::new(
        TelegramApi::new(&config.telegram.bot_token, poll_timeout)
            .context("failed to build the telegram client")?,
    );

    if config.access.allowed_users.is_empty() {
        warn!("ALLOWED_USERS is empty; every request will be rejected");
    }

    let ctx = Arc::new(ControlContext::new(ControlParts {
        link: Arc::new(RemoteLink::new(LinkSettings::from(&config.link))),
        prober: Arc::new(PingProber::new(config.host.ping_count)),
        waker: Arc::new(UdpWakeSender::new(config.wake_target())),
        editor: Arc::new(TelegramSurface::new(Arc::clone(&api))),
        mac,
        host_address: config.host.ip_address.clone(),
        allowed_users: AllowList::new(config.access.allowed_users.iter().copied()),
        status_interval: config.status.poll_interval(),
    }));
    ctx.start_link().await;
    info!(
        pc = %config.host.ip_address,
        agent = %LinkSettings::from(&config.link).address(),
        users = config.access.allowed_users.len(),
        "onoffpc started"
    );

    let outcome = tokio::select! {
        result = start_bot(Arc::clone(&api), Arc::clone(&ctx)) => result,
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            signal.context("failed to listen for ctrl-c")
        }
    };
    ctx.shutdown().await;
    outcome
}

pub fn wake(config: &AppConfig) -> Result<()> {
    let mac = parse_mac(config)?;
    UdpWakeSender::new(config.wake_target())
        .wake(&mac)
        .context("failed to send the Wake-on-LAN packet")?;
    println!("magic packet for {mac} sent to {}", config.wake_target());
    Ok(())
}

pub async fn probe(config: &AppConfig) -> Result<()> {
    let prober = PingProber::new(config.host.ping_count);
    let link = RemoteLink::new(LinkSettings::from(&config.link));

    let (host_up, link_connected) = tokio::join!(prober.is_up(&config.host.ip_address), link.try_connect());
    let snapshot = StatusSnapshot {
        host_up,
        link_connected,
    };
    println!("{}", snapshot.render());
    Ok(())
}

pub async fn send(config: &AppConfig, command: &str) -> Result<()> {
    let link = RemoteLink::new(LinkSettings::from(&config.link));
    let reply = link.send(command).await;
    println!("{reply}");
    Ok(())
}

pub fn print_config(config: &AppConfig) -> Result<()> {
    print!("{}", config.redacted().to_toml_string()?);
    if let Err(err) = config.validate() {
        eprintln!("warning: {err}");
    }
    Ok(())
}

fn parse_mac(config: &AppConfig) -> Result<MacAddress> {
    config
        .host
        .mac_address
        .parse::<MacAddress>()
        .with_context(|| format!("PC_MAC_ADDRESS {:?} is not a MAC address", config.host.mac_address))
}
