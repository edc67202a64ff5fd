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

//! The PTP side of one network device: its hardware clock, timestamping
//! configuration and the transmit capture task, tied to the device's
//! lifecycle.

use crate::{
    clock::{ClockRequest, PhcClock, PtpClockHandle, PtpClockOps},
    config::{HwTimestampConfig, HwTimestamping, HwTstampRecord, RxFilter, TxType, UserBuffer},
    error::{PhcError, PhcResult, TxCaptureError},
    registers::{PtpRegisters, RegisterIo, SharedRegisters},
    rx::{attach_rx_timestamp, PacketMetadata, RxDescTimestamp},
    time::{Timestamp, WallClock},
    tx_capture::{TxCaptureApi, TxCaptureConfig, TxTimestampSink},
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub const SIOCSHWTSTAMP: u32 = 0x89b0;
pub const SIOCGHWTSTAMP: u32 = 0x89b1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub mac: [u8; 6],
    /// PTP revision of the hardware, 0 if it has no PTP support.
    pub ptp_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtpDeviceConfig {
    /// Run the hardware clock in master mode.
    pub master_mode: bool,
    #[serde(default)]
    pub tx_capture: TxCaptureConfig,
}

bitflags! {
    /// `SOF_TIMESTAMPING_*` capability bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SofTimestamping: u32 {
        const TX_HARDWARE = 1 << 0;
        const TX_SOFTWARE = 1 << 1;
        const RX_HARDWARE = 1 << 2;
        const RX_SOFTWARE = 1 << 3;
        const SOFTWARE = 1 << 4;
        const RAW_HARDWARE = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampingInfo {
    pub so_timestamping: SofTimestamping,
    pub phc_index: Option<u32>,
    pub tx_types: Vec<TxType>,
    pub rx_filters: Vec<RxFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwTstampRequest {
    Set,
    Get,
}

impl HwTstampRequest {
    pub fn from_ioctl(cmd: u32) -> Option<Self> {
        match cmd {
            SIOCSHWTSTAMP => Some(HwTstampRequest::Set),
            SIOCGHWTSTAMP => Some(HwTstampRequest::Get),
            _ => None,
        }
    }
}

/// What happened to an event packet handed to [`PtpDevice::transmit_event`].
#[derive(Debug, PartialEq, Eq)]
pub enum TxSubmit<P> {
    /// The capture task owns the packet until its timestamp is known.
    Capturing,
    /// Another capture is still in flight.
    Busy(P),
    /// Transmit timestamping is off.
    NotTimestamped(P),
}

pub struct PtpDevice<R, P> {
    info: DeviceInfo,
    regs: SharedRegisters<R>,
    wall_clock: Arc<dyn WallClock>,
    clock: Option<PhcClock<R>>,
    hwtstamp: Mutex<HwTimestamping>,
    tx_capture: Option<TxCaptureApi<P>>,
    tx_task: Option<JoinHandle<Result<(), TxCaptureError>>>,
    cancel_token: CancellationToken,
}

impl<R: RegisterIo + 'static, P: Send + 'static> PtpDevice<R, P> {
    /// Registers the hardware clock and starts the capture task. Devices
    /// without PTP support come up without a clock and only ever report
    /// software timestamping.
    ///
    /// The capture task is spawned onto the current tokio runtime, so a
    /// PTP capable device fails with [`PhcError::Runtime`] outside of one.
    pub fn init(
        info: DeviceInfo,
        io: R,
        wall_clock: Arc<dyn WallClock>,
        sink: Arc<dyn TxTimestampSink<P>>,
        config: PtpDeviceConfig,
        cancel_token: CancellationToken,
    ) -> PhcResult<Self> {
        let regs = PtpRegisters::shared(io);
        let cancel_token = cancel_token.child_token();

        let (clock, tx_capture, tx_task) = if info.ptp_version == 0 {
            log::info!("{} has no PTP support, not registering a PHC.", info.name);
            (None, None, None)
        } else {
            Handle::try_current()?;
            let handle = PtpClockHandle::register(info.mac);
            log::info!(
                "Registered PHC {} (index {}) on {}.",
                handle.name(),
                handle.index(),
                info.name
            );
            let clock = PhcClock::new(regs.clone(), handle);
            let (api, task) = TxCaptureApi::spawn(
                regs.clone(),
                sink,
                config.tx_capture,
                cancel_token.clone(),
            );
            (Some(clock), Some(api), Some(task))
        };

        let device = Self {
            info,
            regs,
            wall_clock,
            clock,
            hwtstamp: Mutex::new(HwTimestamping::new(config.master_mode)),
            tx_capture,
            tx_task,
            cancel_token,
        };
        device.reset();
        Ok(device)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn registers(&self) -> &SharedRegisters<R> {
        &self.regs
    }

    pub fn clock(&self) -> PhcResult<&PhcClock<R>> {
        self.clock
            .as_ref()
            .ok_or(PhcError::Unsupported("device has no hardware clock"))
    }

    fn hwtstamp(&self) -> MutexGuard<'_, HwTimestamping> {
        self.hwtstamp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn hwtstamp_config(&self) -> HwTimestampConfig {
        self.hwtstamp().config()
    }

    /// Must be called with the configuration lock held.
    fn sync_tx_capture(&self, hwtstamp: &HwTimestamping) {
        if let Some(tx_capture) = &self.tx_capture {
            tx_capture.set_suspended(!hwtstamp.config().tx_enabled);
        }
    }

    fn disable_hwtstamp(&self) {
        let mut hwtstamp = self.hwtstamp();
        hwtstamp.disable(&self.regs);
        self.sync_tx_capture(&hwtstamp);
    }

    /// Switches hardware timestamping off.
    pub fn reset(&self) {
        if self.clock.is_none() {
            return;
        }
        log::info!("Resetting PHC on {}.", self.info.name);
        self.disable_hwtstamp();
    }

    /// Switches hardware timestamping off and waits until the capture task
    /// has let go of any pending packet.
    pub async fn suspend(&self) -> PhcResult<()> {
        if self.clock.is_none() {
            return Ok(());
        }
        log::info!("Suspending PHC on {}.", self.info.name);
        self.disable_hwtstamp();

        if let Some(tx_capture) = &self.tx_capture {
            match tx_capture.cancel().await {
                Ok(()) => (),
                // the task only stops after dropping whatever it held
                Err(TxCaptureError::SendError) => {
                    log::debug!("Tx capture task of {} already stopped.", self.info.name)
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Suspends the device, stops the capture task and unregisters the
    /// clock. Stopping a stopped device does nothing.
    pub async fn stop(&mut self) -> PhcResult<()> {
        if self.clock.is_none() && self.tx_task.is_none() {
            return Ok(());
        }
        log::info!("Stopping PHC on {}.", self.info.name);

        self.suspend().await?;

        self.tx_capture = None;
        self.cancel_token.cancel();
        if let Some(task) = self.tx_task.take() {
            match task.await {
                Ok(Ok(())) => (),
                Ok(Err(e)) => log::error!("Tx capture task ended with error: {e}"),
                Err(e) => log::error!("Tx capture task panicked: {e}"),
            }
        }

        if let Some(clock) = self.clock.take() {
            let handle = clock.into_handle();
            log::info!("Removed PHC {} from {}.", handle.name(), self.info.name);
        }

        Ok(())
    }

    pub fn ts_info(&self) -> TimestampingInfo {
        if self.info.ptp_version == 0 {
            return TimestampingInfo {
                so_timestamping: SofTimestamping::TX_SOFTWARE
                    | SofTimestamping::RX_SOFTWARE
                    | SofTimestamping::SOFTWARE,
                phc_index: None,
                tx_types: Vec::new(),
                rx_filters: vec![RxFilter::None],
            };
        }

        TimestampingInfo {
            so_timestamping: SofTimestamping::all(),
            phc_index: self.clock.as_ref().map(|c| c.handle().index()),
            tx_types: vec![TxType::Off, TxType::On],
            rx_filters: vec![
                RxFilter::None,
                RxFilter::PtpV2Event,
                RxFilter::PtpV2L4Event,
                RxFilter::PtpV2Sync,
                RxFilter::PtpV2L4Sync,
                RxFilter::PtpV2DelayReq,
                RxFilter::PtpV2L4DelayReq,
            ],
        }
    }

    /// Reads a timestamping request from `buffer`, applies it and writes the
    /// resulting record back.
    pub fn set_hwtstamp<B: UserBuffer + ?Sized>(&self, buffer: &mut B) -> PhcResult<()> {
        self.clock()?;
        let request = HwTstampRecord::read_from(buffer)?;
        let record = {
            let mut hwtstamp = self.hwtstamp();
            let applied = hwtstamp.apply(&self.regs, self.wall_clock.as_ref(), &request);
            self.sync_tx_capture(&hwtstamp);
            applied?;
            hwtstamp.record()
        };
        record.write_to(buffer)
    }

    pub fn get_hwtstamp<B: UserBuffer + ?Sized>(&self, buffer: &mut B) -> PhcResult<()> {
        self.clock()?;
        let record = self.hwtstamp().record();
        record.write_to(buffer)
    }

    pub fn ioctl<B: UserBuffer + ?Sized>(&self, cmd: u32, buffer: &mut B) -> PhcResult<()> {
        match HwTstampRequest::from_ioctl(cmd) {
            Some(HwTstampRequest::Set) => self.set_hwtstamp(buffer),
            Some(HwTstampRequest::Get) => self.get_hwtstamp(buffer),
            None => Err(PhcError::Unsupported("ioctl")),
        }
    }

    /// Hands a PTP event packet that was just queued for transmission to the
    /// capture task.
    pub async fn transmit_event(&self, packet: P) -> PhcResult<TxSubmit<P>> {
        let Some(tx_capture) = &self.tx_capture else {
            return Ok(TxSubmit::NotTimestamped(packet));
        };
        let tx_enabled = self.hwtstamp().config().tx_enabled;
        if !tx_enabled {
            return Ok(TxSubmit::NotTimestamped(packet));
        }
        if !tx_capture.try_claim() {
            return Ok(TxSubmit::Busy(packet));
        }

        if let Err(e) = tx_capture.start(packet).await {
            if !matches!(e, TxCaptureError::Busy) {
                tx_capture.release_claim();
            }
            return Err(e.into());
        }

        Ok(TxSubmit::Capturing)
    }

    /// Attaches the descriptor's hardware timestamp to a received packet if
    /// receive timestamping is on.
    pub fn receive(&self, metadata: &mut PacketMetadata, desc: &RxDescTimestamp) {
        if self.hwtstamp().config().rx_enabled() {
            attach_rx_timestamp(metadata, desc);
        }
    }

    pub fn tx_hwtstamp_timeouts(&self) -> u64 {
        self.tx_capture
            .as_ref()
            .map(TxCaptureApi::timeouts)
            .unwrap_or_default()
    }
}

impl<R: RegisterIo + 'static, P: Send + 'static> PtpClockOps for PtpDevice<R, P> {
    fn get_time(&self) -> PhcResult<Timestamp> {
        self.clock()?.get_time()
    }

    fn set_time(&self, time: Timestamp) -> PhcResult<()> {
        self.clock()?.set_time(time)
    }

    fn adjust_time(&self, delta_ns: i64) -> PhcResult<()> {
        self.clock()?.adjust_time(delta_ns)
    }

    fn adjust_frequency(&self, ppb: i64) -> PhcResult<()> {
        self.clock()?.adjust_frequency(ppb)
    }

    fn enable(&self, request: ClockRequest, on: bool) -> PhcResult<()> {
        self.clock()?.enable(request, on)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::RxFilterMode,
        registers::PtpControl,
        sim::{FixedWallClock, SimulatedNic},
    };
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::time::sleep;

    const MAC: [u8; 6] = [0x00, 0xe0, 0x4c, 0x68, 0x12, 0x6b];
    const WALL_TIME: Timestamp = Timestamp::new(1_700_000_000, 0);

    struct Packet {
        seq: u16,
        releases: Arc<AtomicUsize>,
    }

    impl Drop for Packet {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Sink {
        delivered: Mutex<Vec<(u16, Timestamp)>>,
    }

    impl TxTimestampSink<Packet> for Sink {
        fn deliver(&self, packet: &Packet, timestamp: Timestamp) {
            self.delivered.lock().unwrap().push((packet.seq, timestamp));
        }
    }

    struct Fixture {
        nic: SimulatedNic,
        sink: Arc<Sink>,
        releases: Arc<AtomicUsize>,
        device: PtpDevice<SimulatedNic, Packet>,
    }

    impl Fixture {
        fn new(ptp_version: u8) -> Self {
            let nic = SimulatedNic::new();
            let sink = Arc::new(Sink::default());
            let device = PtpDevice::init(
                DeviceInfo {
                    name: "eth0".to_owned(),
                    mac: MAC,
                    ptp_version,
                },
                nic.clone(),
                Arc::new(FixedWallClock(WALL_TIME)),
                sink.clone(),
                PtpDeviceConfig::default(),
                CancellationToken::new(),
            )
            .expect("init device");
            Self {
                nic,
                sink,
                releases: Arc::new(AtomicUsize::new(0)),
                device,
            }
        }

        fn packet(&self, seq: u16) -> Packet {
            Packet {
                seq,
                releases: self.releases.clone(),
            }
        }

        fn set(&self, tx_type: TxType, rx_filter: RxFilter) -> PhcResult<HwTstampRecord> {
            let mut buffer = HwTstampRecord::new(tx_type, rx_filter).to_bytes();
            self.device.ioctl(SIOCSHWTSTAMP, &mut buffer[..])?;
            Ok(HwTstampRecord::from_bytes(buffer))
        }
    }

    #[tokio::test]
    async fn device_without_ptp_reports_software_timestamping_only() {
        let fixture = Fixture::new(0);

        let info = fixture.device.ts_info();
        assert_eq!(info.phc_index, None);
        assert!(!info.so_timestamping.contains(SofTimestamping::TX_HARDWARE));
        assert_eq!(info.rx_filters, vec![RxFilter::None]);

        assert!(matches!(
            fixture.device.get_time(),
            Err(PhcError::Unsupported(_))
        ));
        assert!(matches!(
            fixture.set(TxType::On, RxFilter::None),
            Err(PhcError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn device_with_ptp_reports_its_clock() {
        let fixture = Fixture::new(3);

        let info = fixture.device.ts_info();
        let clock = fixture.device.clock().expect("clock registered");
        assert_eq!(info.phc_index, Some(clock.handle().index()));
        assert_eq!(clock.handle().name(), "00e04c68126b");
        assert_eq!(info.so_timestamping, SofTimestamping::all());
        assert_eq!(info.tx_types, vec![TxType::Off, TxType::On]);
        assert!(info.rx_filters.contains(&RxFilter::None));
        assert!(info.rx_filters.contains(&RxFilter::PtpV2L4Sync));
    }

    #[tokio::test]
    async fn init_leaves_timestamping_disabled() {
        let fixture = Fixture::new(3);
        assert_eq!(fixture.nic.ptp_control(), 0);
        assert_eq!(fixture.nic.ctrl_writes(), 1);
        assert_eq!(
            fixture.device.hwtstamp_config(),
            HwTimestampConfig::default()
        );
    }

    #[tokio::test]
    async fn set_writes_back_and_get_returns_coalesced_record() {
        let fixture = Fixture::new(3);

        let written = fixture
            .set(TxType::On, RxFilter::PtpV2L2DelayReq)
            .expect("valid config");
        assert_eq!(written, HwTstampRecord::new(TxType::On, RxFilter::PtpV2Event));

        let mut buffer = vec![0u8; HwTstampRecord::SIZE];
        fixture
            .device
            .ioctl(SIOCGHWTSTAMP, &mut buffer)
            .expect("get config");
        assert_eq!(
            HwTstampRecord::from_bytes(buffer.try_into().expect("12 bytes")),
            written
        );

        assert_eq!(fixture.nic.ptp_control(), PtpControl::TIMESTAMPING.bits());
        assert_eq!(fixture.device.get_time().expect("clock"), WALL_TIME);
    }

    #[tokio::test]
    async fn other_ioctls_are_unsupported() {
        let fixture = Fixture::new(3);
        let mut buffer = [0u8; HwTstampRecord::SIZE];
        assert!(matches!(
            fixture.device.ioctl(0x8946, &mut buffer[..]),
            Err(PhcError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn transmit_without_tx_timestamping_hands_packet_back() {
        let fixture = Fixture::new(3);
        fixture
            .set(TxType::Off, RxFilter::PtpV2Event)
            .expect("valid config");

        let submit = fixture
            .device
            .transmit_event(fixture.packet(1))
            .await
            .expect("actor running");
        assert!(matches!(submit, TxSubmit::NotTimestamped(Packet { seq: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn event_packet_gets_its_transmit_timestamp() {
        let fixture = Fixture::new(3);
        fixture
            .set(TxType::On, RxFilter::None)
            .expect("valid config");

        let submit = fixture
            .device
            .transmit_event(fixture.packet(7))
            .await
            .expect("actor running");
        assert!(matches!(submit, TxSubmit::Capturing));

        let busy = fixture
            .device
            .transmit_event(fixture.packet(8))
            .await
            .expect("actor running");
        assert!(matches!(busy, TxSubmit::Busy(Packet { seq: 8, .. })));
        drop(busy);

        fixture.nic.advance(Duration::from_micros(20));
        let ts = fixture.nic.complete_tx_now();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(*fixture.sink.delivered.lock().unwrap(), vec![(7, ts)]);
        assert_eq!(fixture.releases.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.device.tx_hwtstamp_timeouts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_transmit_timestamp_is_counted() {
        let fixture = Fixture::new(3);
        fixture
            .set(TxType::On, RxFilter::None)
            .expect("valid config");

        fixture
            .device
            .transmit_event(fixture.packet(1))
            .await
            .expect("actor running");
        sleep(Duration::from_secs(16)).await;

        assert_eq!(fixture.device.tx_hwtstamp_timeouts(), 1);
        assert_eq!(fixture.releases.load(Ordering::SeqCst), 1);
        assert!(fixture.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rx_timestamps_are_only_attached_when_enabled() {
        let fixture = Fixture::new(3);
        let desc = RxDescTimestamp {
            timestamp_low: 500u32.to_le(),
            timestamp_high: 42u32.to_le(),
            timestamp_hhigh: 0,
        };

        let mut metadata = PacketMetadata::default();
        fixture.device.receive(&mut metadata, &desc);
        assert_eq!(metadata.hw_timestamp, None);

        fixture
            .set(TxType::Off, RxFilter::PtpV2L4Event)
            .expect("valid config");
        assert_eq!(
            fixture.device.hwtstamp_config().rx_filter,
            RxFilterMode::PtpV2Event
        );
        fixture.device.receive(&mut metadata, &desc);
        assert_eq!(metadata.hw_timestamp, Some(Timestamp::new(42, 500)));
    }

    #[tokio::test(start_paused = true)]
    async fn suspend_disables_and_drops_pending_capture() {
        let fixture = Fixture::new(3);
        fixture
            .set(TxType::On, RxFilter::PtpV2Event)
            .expect("valid config");
        fixture
            .device
            .transmit_event(fixture.packet(3))
            .await
            .expect("actor running");

        fixture.device.suspend().await.expect("suspend");

        assert_eq!(fixture.nic.ptp_control(), 0);
        assert_eq!(fixture.releases.load(Ordering::SeqCst), 1);
        assert_eq!(
            fixture.device.hwtstamp_config(),
            HwTimestampConfig::default()
        );

        fixture.nic.complete_tx_now();
        sleep(Duration::from_millis(10)).await;
        assert!(fixture.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_that_races_with_suspend_is_refused() {
        let fixture = Fixture::new(3);
        fixture
            .set(TxType::On, RxFilter::None)
            .expect("valid config");

        // transmit_event has claimed the capture but not yet handed over the packet
        let tx_capture = fixture.device.tx_capture.clone().expect("capture task");
        assert!(tx_capture.try_claim());

        fixture.device.suspend().await.expect("suspend");

        let result = tx_capture.start(fixture.packet(4)).await;
        assert!(matches!(result, Err(TxCaptureError::Suspended)));
        assert_eq!(fixture.releases.load(Ordering::SeqCst), 1);
        assert!(!tx_capture.is_in_progress());

        fixture.nic.complete_tx_now();
        sleep(Duration::from_millis(10)).await;
        assert!(fixture.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_task_follows_tx_timestamping_config() {
        let fixture = Fixture::new(3);
        let tx_capture = fixture.device.tx_capture.clone().expect("capture task");
        assert!(tx_capture.is_suspended());

        fixture
            .set(TxType::On, RxFilter::None)
            .expect("valid config");
        assert!(!tx_capture.is_suspended());

        fixture
            .set(TxType::Off, RxFilter::PtpV2Event)
            .expect("valid config");
        assert!(tx_capture.is_suspended());

        fixture
            .set(TxType::On, RxFilter::None)
            .expect("valid config");
        fixture.device.reset();
        assert!(tx_capture.is_suspended());
    }

    #[test]
    fn init_without_runtime_fails_for_ptp_devices() {
        let init = |ptp_version| {
            PtpDevice::<SimulatedNic, Packet>::init(
                DeviceInfo {
                    name: "eth0".to_owned(),
                    mac: MAC,
                    ptp_version,
                },
                SimulatedNic::new(),
                Arc::new(FixedWallClock(WALL_TIME)),
                Arc::new(Sink::default()),
                PtpDeviceConfig::default(),
                CancellationToken::new(),
            )
        };

        assert!(matches!(init(3), Err(PhcError::Runtime(_))));
        // nothing to spawn without PTP support
        assert!(init(0).is_ok());
    }

    #[tokio::test]
    async fn stop_unregisters_clock_and_is_idempotent() {
        let mut fixture = Fixture::new(3);

        fixture.device.stop().await.expect("stop");
        assert!(matches!(
            fixture.device.clock(),
            Err(PhcError::Unsupported(_))
        ));
        assert_eq!(fixture.device.ts_info().phc_index, None);

        fixture.device.stop().await.expect("second stop");

        let submit = fixture
            .device
            .transmit_event(fixture.packet(1))
            .await
            .expect("no capture task");
        assert!(matches!(submit, TxSubmit::NotTimestamped(_)));
    }
}
