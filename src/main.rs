/*
 *  Copyright (C) 2024 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use clap::Parser;
use miette::{miette, IntoDiagnostic, Result};
use nic_phc::{
    config::HwTstampRecord,
    device::{DeviceInfo, PtpDevice, PtpDeviceConfig, TxSubmit, SIOCSHWTSTAMP},
    rx::{PacketMetadata, RxDescTimestamp},
    sim::SimulatedNic,
    time::{SystemWallClock, Timestamp, WallClock},
    tx_capture::TxTimestampSink,
    PtpClockOps,
};
use rand::Rng;
use std::{io, sync::Arc, time::Duration};
#[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
use tikv_jemallocator::Jemalloc;
use tokio::{
    select,
    time::{interval, sleep, Instant},
};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing_subscriber::EnvFilter;

#[cfg(all(not(target_env = "msvc"), feature = "jemalloc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(about = "Runs the NIC PTP clock core against a simulated NIC")]
struct Args {
    /// MAC address of the simulated NIC
    #[arg(short, long, default_value = "00:e0:4c:68:12:6b")]
    mac: String,
    /// Interval between PTP event packets in milliseconds
    #[arg(short, long, default_value = "1000")]
    interval: u64,
    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,
    /// Run the hardware clock in master mode
    #[arg(long)]
    master: bool,
    /// Frequency correction to apply to the hardware clock in ppb
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    ppb: i64,
    /// Share of transmit timestamps the simulated NIC never latches
    #[arg(long, default_value = "0.0")]
    loss_rate: f64,
    /// Timestamping config to request, as JSON
    #[arg(long, default_value = r#"{"txType":1,"rxFilter":12}"#)]
    hwtstamp: String,
}

struct EventPacket {
    seq: u16,
}

struct LoggingSink;

impl TxTimestampSink<EventPacket> for LoggingSink {
    fn deliver(&self, packet: &EventPacket, timestamp: Timestamp) {
        log::info!("Tx timestamp of packet {}: {timestamp}", packet.seq);
    }
}

type SimDevice = PtpDevice<SimulatedNic, EventPacket>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("nic-phc-sim", move |s| run(s, args)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(1000))
    .await?;

    Ok(())
}

fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let bytes = hex::decode(mac.replace([':', '-'], "")).into_diagnostic()?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| miette!("MAC address must have 6 bytes, got {}", b.len()))
}

async fn run(subsys: SubsystemHandle, args: Args) -> Result<()> {
    let mac = parse_mac(&args.mac)?;
    let request: HwTstampRecord = serde_json::from_str(&args.hwtstamp).into_diagnostic()?;
    let loss_rate = args.loss_rate.clamp(0.0, 1.0);

    let nic = SimulatedNic::new();
    let config = PtpDeviceConfig {
        master_mode: args.master,
        ..Default::default()
    };
    let mut device = PtpDevice::init(
        DeviceInfo {
            name: "sim0".to_owned(),
            mac,
            ptp_version: 1,
        },
        nic.clone(),
        Arc::new(SystemWallClock),
        Arc::new(LoggingSink),
        config,
        subsys.create_cancellation_token(),
    )
    .into_diagnostic()?;

    let clock_info = serde_json::to_string(device.clock().into_diagnostic()?.handle().info())
        .into_diagnostic()?;
    log::info!("PHC: {clock_info}");
    log::info!("Timestamping capabilities: {:?}", device.ts_info());

    let mut buffer = Vec::new();
    request.write_to(&mut buffer).into_diagnostic()?;
    device.ioctl(SIOCSHWTSTAMP, &mut buffer).into_diagnostic()?;
    let applied = HwTstampRecord::read_from(&buffer).into_diagnostic()?;
    log::info!(
        "Applied timestamping config {} ({:?})",
        serde_json::to_string(&applied).into_diagnostic()?,
        device.hwtstamp_config()
    );

    if args.ppb != 0 {
        device.adjust_frequency(args.ppb).into_diagnostic()?;
        log::info!("Applied frequency correction of {} ppb.", args.ppb);
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut ticker = interval(Duration::from_millis(1));
    let mut events = interval(Duration::from_millis(args.interval.max(1)));
    let mut last_tick = Instant::now();
    let mut seq = 0u16;

    loop {
        select! {
            _ = subsys.on_shutdown_requested() => break,
            now = ticker.tick() => {
                nic.advance(now.saturating_duration_since(last_tick));
                last_tick = now;
                if deadline.is_some_and(|it| now >= it) {
                    log::info!("Run time is up, shutting down …");
                    subsys.request_shutdown();
                }
            },
            _ = events.tick() => {
                send_event(&device, &nic, seq, loss_rate).await?;
                seq = seq.wrapping_add(1);
            },
        }
    }

    log::info!(
        "{} tx timestamp(s) timed out.",
        device.tx_hwtstamp_timeouts()
    );
    device.stop().await.into_diagnostic()?;

    Ok(())
}

async fn send_event(
    device: &SimDevice,
    nic: &SimulatedNic,
    seq: u16,
    loss_rate: f64,
) -> Result<()> {
    let phc = device.get_time().into_diagnostic()?;
    let system = SystemWallClock.now().into_diagnostic()?;
    log::debug!(
        "PHC {phc}, system {system}, offset {} ns",
        phc.offset_from(&system)
    );

    match device
        .transmit_event(EventPacket { seq })
        .await
        .into_diagnostic()?
    {
        TxSubmit::Capturing => {
            let (lost, latency) = {
                let mut rng = rand::thread_rng();
                (
                    rng.gen_bool(loss_rate),
                    Duration::from_micros(rng.gen_range(5..500)),
                )
            };
            if lost {
                log::debug!("Simulated NIC drops tx timestamp of packet {seq}.");
            } else {
                let nic = nic.clone();
                tokio::spawn(async move {
                    sleep(latency).await;
                    nic.complete_tx_now();
                });
            }
        }
        TxSubmit::Busy(packet) => log::warn!(
            "Tx timestamp capture busy, packet {} goes out without timestamp.",
            packet.seq
        ),
        TxSubmit::NotTimestamped(packet) => {
            log::debug!("Packet {} sent without tx timestamp.", packet.seq)
        }
    }

    // loop the packet back into the receive path
    let now = nic.local_time();
    let desc = RxDescTimestamp {
        timestamp_low: now.nanoseconds().to_le(),
        timestamp_high: (now.seconds() as u32).to_le(),
        timestamp_hhigh: ((now.seconds() >> 32) as u32).to_le(),
    };
    let mut metadata = PacketMetadata::default();
    device.receive(&mut metadata, &desc);
    if let Some(timestamp) = metadata.hw_timestamp {
        log::info!("Rx timestamp of packet {seq}: {timestamp}");
    }

    Ok(())
}
