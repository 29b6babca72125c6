use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duo_call::config::CliArgs;
use duo_call::media::SyntheticDevices;
use duo_call::relay::WsRelay;
use duo_call::room::RoomName;
use duo_call::rtc::RtcPeerFactory;
use duo_call::{CallHandle, CallSession, CallStatus, Control};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CliArgs::parse().into_config();
    let room = RoomName::resolve(config.room_secret.as_deref());
    println!("Invite link fragment: {}", room.invite_fragment());

    let (relay, relay_events) = WsRelay::connect(&config.relay_url, room.clone()).await?;
    let session = CallSession::new(
        room,
        Arc::new(relay),
        Arc::new(RtcPeerFactory::new(config.ice_servers.clone())),
        Arc::new(SyntheticDevices::new()),
        &config,
    );
    let handle = session.handle();
    let mut call = tokio::spawn(session.run(relay_events));

    tokio::spawn(read_commands(handle.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, leaving call");
            handle.leave();
            call.await?;
        }
        result = &mut call => result?,
    }
    Ok(())
}

async fn read_commands(handle: CallHandle) {
    println!("Commands: mute, camera, share, record, status, leave");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("status") {
            print_status(&handle.status().borrow());
            continue;
        }
        match line.parse::<Control>() {
            Ok(control) => {
                if !handle.send(control) {
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }
}

fn print_status(status: &CallStatus) {
    println!(
        "phase={} ice={} participants={} grid={}x{} muted={} camera={} sharing={} recording={}",
        status.phase,
        status.ice_state,
        status.participants,
        status.layout.columns,
        status.layout.rows,
        status.muted,
        status.camera_on,
        status.screen_sharing,
        status.recording.as_deref().unwrap_or("off"),
    );
    if status.room_full {
        println!("Room is full");
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }
}
