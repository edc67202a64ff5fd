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

use crate::{
    error::{PhcError, PhcResult},
    registers::{lock_registers, PtpControl, PtpRegisters, RegisterIo, SharedRegisters},
    time::WallClock,
};
use serde::{Deserialize, Serialize};

/// Transmit timestamping modes, numbered like Linux' `hwtstamp_tx_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TxType {
    Off = 0,
    On = 1,
    OnestepSync = 2,
    OnestepP2p = 3,
}

impl TryFrom<i32> for TxType {
    type Error = PhcError;

    fn try_from(value: i32) -> PhcResult<Self> {
        Ok(match value {
            0 => TxType::Off,
            1 => TxType::On,
            2 => TxType::OnestepSync,
            3 => TxType::OnestepP2p,
            other => {
                return Err(PhcError::InvalidArgument(format!("unknown tx type {other}")))
            }
        })
    }
}

/// Receive filters, numbered like Linux' `hwtstamp_rx_filters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum RxFilter {
    None = 0,
    All = 1,
    Some = 2,
    PtpV1L4Event = 3,
    PtpV1L4Sync = 4,
    PtpV1L4DelayReq = 5,
    PtpV2L4Event = 6,
    PtpV2L4Sync = 7,
    PtpV2L4DelayReq = 8,
    PtpV2L2Event = 9,
    PtpV2L2Sync = 10,
    PtpV2L2DelayReq = 11,
    PtpV2Event = 12,
    PtpV2Sync = 13,
    PtpV2DelayReq = 14,
    NtpAll = 15,
}

impl RxFilter {
    pub fn is_ptp_v2(self) -> bool {
        matches!(
            self,
            RxFilter::PtpV2L4Event
                | RxFilter::PtpV2L4Sync
                | RxFilter::PtpV2L4DelayReq
                | RxFilter::PtpV2L2Event
                | RxFilter::PtpV2L2Sync
                | RxFilter::PtpV2L2DelayReq
                | RxFilter::PtpV2Event
                | RxFilter::PtpV2Sync
                | RxFilter::PtpV2DelayReq
        )
    }
}

impl TryFrom<i32> for RxFilter {
    type Error = PhcError;

    fn try_from(value: i32) -> PhcResult<Self> {
        Ok(match value {
            0 => RxFilter::None,
            1 => RxFilter::All,
            2 => RxFilter::Some,
            3 => RxFilter::PtpV1L4Event,
            4 => RxFilter::PtpV1L4Sync,
            5 => RxFilter::PtpV1L4DelayReq,
            6 => RxFilter::PtpV2L4Event,
            7 => RxFilter::PtpV2L4Sync,
            8 => RxFilter::PtpV2L4DelayReq,
            9 => RxFilter::PtpV2L2Event,
            10 => RxFilter::PtpV2L2Sync,
            11 => RxFilter::PtpV2L2DelayReq,
            12 => RxFilter::PtpV2Event,
            13 => RxFilter::PtpV2Sync,
            14 => RxFilter::PtpV2DelayReq,
            15 => RxFilter::NtpAll,
            other => {
                return Err(PhcError::InvalidArgument(format!(
                    "unknown rx filter {other}"
                )))
            }
        })
    }
}

/// Timestamping configuration as it crosses the host boundary, laid out
/// like Linux' `struct hwtstamp_config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HwTstampRecord {
    #[serde(default)]
    pub flags: u32,
    pub tx_type: i32,
    pub rx_filter: i32,
}

impl HwTstampRecord {
    pub const SIZE: usize = 12;

    pub fn new(tx_type: TxType, rx_filter: RxFilter) -> Self {
        Self {
            flags: 0,
            tx_type: tx_type as i32,
            rx_filter: rx_filter as i32,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.flags.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.tx_type.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.rx_filter.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        Self {
            flags: u32::from_le_bytes(word(0)),
            tx_type: i32::from_le_bytes(word(4)),
            rx_filter: i32::from_le_bytes(word(8)),
        }
    }

    pub fn read_from<B: UserBuffer + ?Sized>(buffer: &B) -> PhcResult<Self> {
        let mut bytes = [0u8; Self::SIZE];
        buffer.copy_in(&mut bytes)?;
        Ok(Self::from_bytes(bytes))
    }

    pub fn write_to<B: UserBuffer + ?Sized>(&self, buffer: &mut B) -> PhcResult<()> {
        buffer.copy_out(&self.to_bytes())
    }
}

/// Memory owned by the caller of a configuration request.
///
/// Failing transfers report [`PhcError::TransferFault`].
pub trait UserBuffer {
    fn copy_in(&self, dst: &mut [u8]) -> PhcResult<()>;
    fn copy_out(&mut self, src: &[u8]) -> PhcResult<()>;
}

impl UserBuffer for [u8] {
    fn copy_in(&self, dst: &mut [u8]) -> PhcResult<()> {
        let src = self.get(..dst.len()).ok_or_else(|| {
            PhcError::TransferFault(format!(
                "need {} bytes, buffer holds {}",
                dst.len(),
                self.len()
            ))
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn copy_out(&mut self, src: &[u8]) -> PhcResult<()> {
        let len = self.len();
        let dst = self.get_mut(..src.len()).ok_or_else(|| {
            PhcError::TransferFault(format!(
                "need {} bytes, buffer holds {len}",
                src.len()
            ))
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }
}

impl UserBuffer for Vec<u8> {
    fn copy_in(&self, dst: &mut [u8]) -> PhcResult<()> {
        self.as_slice().copy_in(dst)
    }

    fn copy_out(&mut self, src: &[u8]) -> PhcResult<()> {
        self.clear();
        self.extend_from_slice(src);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RxFilterMode {
    #[default]
    None,
    PtpV2Event,
}

/// The timestamping state the hardware is actually in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HwTimestampConfig {
    pub tx_enabled: bool,
    pub rx_filter: RxFilterMode,
}

impl HwTimestampConfig {
    pub fn is_enabled(&self) -> bool {
        self.tx_enabled || self.rx_filter != RxFilterMode::None
    }

    pub fn rx_enabled(&self) -> bool {
        self.rx_filter != RxFilterMode::None
    }

    /// Validates a request and returns the config it maps to together with
    /// the record that is stored for it.
    pub fn negotiate(request: &HwTstampRecord) -> PhcResult<(Self, HwTstampRecord)> {
        if request.flags != 0 {
            return Err(PhcError::InvalidArgument(format!(
                "flags must be 0, got {:#x}",
                request.flags
            )));
        }

        let tx_enabled = match TxType::try_from(request.tx_type)? {
            TxType::On => true,
            TxType::Off => false,
            other => {
                return Err(PhcError::InvalidArgument(format!(
                    "tx type {other:?} is not supported"
                )))
            }
        };

        let rx_filter = match RxFilter::try_from(request.rx_filter)? {
            RxFilter::None => RxFilter::None,
            filter if filter.is_ptp_v2() => RxFilter::PtpV2Event,
            other => {
                return Err(PhcError::InvalidArgument(format!(
                    "rx filter {other:?} is not supported"
                )))
            }
        };

        let config = HwTimestampConfig {
            tx_enabled,
            rx_filter: match rx_filter {
                RxFilter::None => RxFilterMode::None,
                _ => RxFilterMode::PtpV2Event,
            },
        };
        let record = HwTstampRecord {
            flags: 0,
            tx_type: request.tx_type,
            rx_filter: rx_filter as i32,
        };

        Ok((config, record))
    }
}

/// Owns the last successfully applied timestamping configuration.
#[derive(Debug, Clone, Default)]
pub struct HwTimestamping {
    record: HwTstampRecord,
    effective: HwTimestampConfig,
    master_mode: bool,
}

impl HwTimestamping {
    pub fn new(master_mode: bool) -> Self {
        Self {
            master_mode,
            ..Default::default()
        }
    }

    pub fn config(&self) -> HwTimestampConfig {
        self.effective
    }

    pub fn record(&self) -> HwTstampRecord {
        self.record
    }

    pub fn master_mode(&self) -> bool {
        self.master_mode
    }

    /// Applies a configuration request. The hardware is only touched when the
    /// resulting config differs from the current one. If priming the clock
    /// fails, hardware and stored config end up disabled.
    pub fn apply<R: RegisterIo>(
        &mut self,
        regs: &SharedRegisters<R>,
        wall_clock: &dyn WallClock,
        request: &HwTstampRecord,
    ) -> PhcResult<HwTimestampConfig> {
        let (config, record) = HwTimestampConfig::negotiate(request)?;

        if config == self.effective {
            log::debug!("Timestamping config unchanged: {config:?}");
            self.record = record;
            return Ok(config);
        }

        log::debug!("Applying timestamping config {config:?}");

        let mut regs = lock_registers(regs);
        disable_hw(&mut regs);
        if config.is_enabled() {
            if let Err(e) = enable_hw(&mut regs, wall_clock, self.master_mode) {
                log::error!("Could not enable hardware timestamping: {e}");
                disable_hw(&mut regs);
                self.effective = HwTimestampConfig::default();
                self.record = HwTstampRecord::default();
                return Err(e);
            }
        }

        self.effective = config;
        self.record = record;
        Ok(config)
    }

    /// Switches hardware timestamping off and forgets the stored config.
    pub fn disable<R: RegisterIo>(&mut self, regs: &SharedRegisters<R>) {
        disable_hw(&mut lock_registers(regs));
        self.effective = HwTimestampConfig::default();
        self.record = HwTstampRecord::default();
    }
}

fn disable_hw<R: RegisterIo>(regs: &mut PtpRegisters<R>) {
    regs.set_ptp_control(PtpControl::empty());
}

fn enable_hw<R: RegisterIo>(
    regs: &mut PtpRegisters<R>,
    wall_clock: &dyn WallClock,
    master_mode: bool,
) -> PhcResult<()> {
    regs.clear_interrupts();
    regs.select_mac_time_source();

    let mut ctrl = PtpControl::TIMESTAMPING;
    ctrl.set(PtpControl::MASTER, master_mode);
    regs.set_ptp_control(ctrl);

    let now = wall_clock.now()?;
    regs.write_local_time(now);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        registers::{PtpInterrupts, OCP_PTP_SOURCE, OCP_PTP_SOURCE_MAC},
        sim::{FixedWallClock, SimulatedNic},
        time::Timestamp,
    };
    use std::time::SystemTime;

    struct BrokenWallClock;

    impl WallClock for BrokenWallClock {
        fn now(&self) -> PhcResult<Timestamp> {
            let before_epoch = SystemTime::UNIX_EPOCH
                .duration_since(SystemTime::now())
                .expect_err("now is after the epoch");
            Err(before_epoch.into())
        }
    }

    const WALL: FixedWallClock = FixedWallClock(Timestamp::new(1_700_000_000, 0));

    fn request(tx_type: TxType, rx_filter: RxFilter) -> HwTstampRecord {
        HwTstampRecord::new(tx_type, rx_filter)
    }

    fn setup() -> (SimulatedNic, SharedRegisters<SimulatedNic>) {
        let nic = SimulatedNic::new();
        let regs = PtpRegisters::shared(nic.clone());
        (nic, regs)
    }

    #[test]
    fn ptp_v2_filters_coalesce_to_event() {
        let (_, regs) = setup();
        let mut hwts = HwTimestamping::new(false);

        let config = hwts
            .apply(&regs, &WALL, &request(TxType::On, RxFilter::PtpV2L4Sync))
            .expect("valid config");

        assert_eq!(
            config,
            HwTimestampConfig {
                tx_enabled: true,
                rx_filter: RxFilterMode::PtpV2Event
            }
        );
        assert_eq!(
            hwts.record(),
            request(TxType::On, RxFilter::PtpV2Event),
            "stored record is the coalesced request"
        );
    }

    #[test]
    fn every_ptp_v2_variant_is_accepted() {
        for filter in 6..=14 {
            let request = HwTstampRecord {
                flags: 0,
                tx_type: TxType::Off as i32,
                rx_filter: filter,
            };
            let (config, record) = HwTimestampConfig::negotiate(&request).expect("ptp v2");
            assert_eq!(config.rx_filter, RxFilterMode::PtpV2Event);
            assert_eq!(record.rx_filter, RxFilter::PtpV2Event as i32);
        }
    }

    #[test]
    fn unsupported_requests_leave_stored_config_alone() {
        let (nic, regs) = setup();
        let mut hwts = HwTimestamping::new(false);
        hwts.apply(&regs, &WALL, &request(TxType::On, RxFilter::None))
            .expect("valid config");
        let writes = nic.ctrl_writes();

        let rejected = [
            request(TxType::On, RxFilter::All),
            request(TxType::On, RxFilter::PtpV1L4Event),
            request(TxType::OnestepSync, RxFilter::None),
            HwTstampRecord {
                flags: 0,
                tx_type: 1,
                rx_filter: 99,
            },
            HwTstampRecord {
                flags: 0,
                tx_type: -1,
                rx_filter: 0,
            },
            HwTstampRecord {
                flags: 1,
                tx_type: 1,
                rx_filter: 0,
            },
        ];

        for request in rejected {
            assert!(matches!(
                hwts.apply(&regs, &WALL, &request),
                Err(PhcError::InvalidArgument(_))
            ));
        }

        assert!(hwts.config().tx_enabled);
        assert_eq!(hwts.record(), request(TxType::On, RxFilter::None));
        assert_eq!(nic.ctrl_writes(), writes);
    }

    #[test]
    fn unchanged_config_does_not_touch_hardware() {
        let (nic, regs) = setup();
        let mut hwts = HwTimestamping::new(false);

        hwts.apply(&regs, &WALL, &request(TxType::On, RxFilter::PtpV2Event))
            .expect("valid config");
        let writes = nic.ctrl_writes();
        let commands = nic.commands().len();

        hwts.apply(&regs, &WALL, &request(TxType::On, RxFilter::PtpV2L2Event))
            .expect("valid config");

        assert_eq!(nic.ctrl_writes(), writes);
        assert_eq!(nic.commands().len(), commands);
    }

    #[test]
    fn enabling_runs_the_hardware_sequence() {
        let (nic, regs) = setup();
        nic.raise_tx_status(PtpInterrupts::TOK | PtpInterrupts::TER);
        let mut hwts = HwTimestamping::new(true);

        hwts.apply(&regs, &WALL, &request(TxType::On, RxFilter::None))
            .expect("valid config");

        assert_eq!(
            nic.ptp_control(),
            (PtpControl::TIMESTAMPING | PtpControl::MASTER).bits()
        );
        assert_eq!(nic.ptp_control(), 0x145b);
        assert!(nic.tx_status().is_empty());
        assert_eq!(nic.ocp(OCP_PTP_SOURCE) & OCP_PTP_SOURCE_MAC, OCP_PTP_SOURCE_MAC);
        assert_eq!(nic.local_time(), Timestamp::new(1_700_000_000, 0));
    }

    #[test]
    fn slave_mode_leaves_master_bit_clear() {
        let (nic, regs) = setup();
        let mut hwts = HwTimestamping::new(false);
        hwts.apply(&regs, &WALL, &request(TxType::Off, RxFilter::PtpV2Event))
            .expect("valid config");
        assert_eq!(nic.ptp_control(), PtpControl::TIMESTAMPING.bits());
    }

    #[test]
    fn switching_everything_off_clears_control() {
        let (nic, regs) = setup();
        let mut hwts = HwTimestamping::new(false);
        hwts.apply(&regs, &WALL, &request(TxType::On, RxFilter::PtpV2Event))
            .expect("valid config");

        let config = hwts
            .apply(&regs, &WALL, &request(TxType::Off, RxFilter::None))
            .expect("valid config");

        assert!(!config.is_enabled());
        assert_eq!(nic.ptp_control(), 0);
    }

    #[test]
    fn failing_reprime_rolls_back_to_disabled() {
        let (nic, regs) = setup();
        let mut hwts = HwTimestamping::new(false);

        let res = hwts.apply(
            &regs,
            &BrokenWallClock,
            &request(TxType::On, RxFilter::PtpV2Event),
        );

        assert!(matches!(res, Err(PhcError::WallClock(_))));
        assert_eq!(hwts.config(), HwTimestampConfig::default());
        assert_eq!(hwts.record(), HwTstampRecord::default());
        assert_eq!(nic.ptp_control(), 0);
    }

    #[test]
    fn record_uses_hwtstamp_config_layout() {
        let record = request(TxType::On, RxFilter::PtpV2Event);
        assert_eq!(record.to_bytes(), [0, 0, 0, 0, 1, 0, 0, 0, 12, 0, 0, 0]);
    }

    #[test]
    fn short_buffers_are_transfer_faults() {
        let short = [0u8; 8];
        assert!(matches!(
            HwTstampRecord::read_from(&short[..]),
            Err(PhcError::TransferFault(_))
        ));

        let mut short = [0u8; 4];
        assert!(matches!(
            HwTstampRecord::default().write_to(&mut short[..]),
            Err(PhcError::TransferFault(_))
        ));
    }

    #[test]
    fn records_travel_through_user_buffers() {
        let mut buffer = Vec::new();
        let record = request(TxType::Off, RxFilter::PtpV2Event);
        record.write_to(&mut buffer).expect("vec grows");
        assert_eq!(buffer.len(), HwTstampRecord::SIZE);
        assert_eq!(HwTstampRecord::read_from(&buffer).expect("read back"), record);
    }
}
