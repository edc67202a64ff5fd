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
    registers::{lock_registers, PtpControl, RegisterIo, SharedRegisters, TimeCommand},
    time::{scaled_ppm_to_ppb, ClockDelta, FrequencyAdjustment, Timestamp, MAX_ADJ_PPB},
};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CLOCK_INDEX: AtomicU32 = AtomicU32::new(0);

/// Requests a host can make to switch on auxiliary clock functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRequest {
    Pps,
    PeriodicOutput { index: u32 },
    ExternalTimestamp { index: u32 },
    Pin { index: u32 },
}

/// The clock operations a host PTP daemon drives.
pub trait PtpClockOps {
    fn get_time(&self) -> PhcResult<Timestamp>;
    fn set_time(&self, time: Timestamp) -> PhcResult<()>;
    fn adjust_time(&self, delta_ns: i64) -> PhcResult<()>;
    fn adjust_frequency(&self, ppb: i64) -> PhcResult<()>;
    fn enable(&self, request: ClockRequest, on: bool) -> PhcResult<()>;

    /// Frequency correction for hosts that express it as scaled ppm (ppm with
    /// a 16 bit binary fraction).
    fn adjust_fine(&self, scaled_ppm: i64) -> PhcResult<()> {
        self.adjust_frequency(scaled_ppm_to_ppb(scaled_ppm))
    }
}

/// What the hardware clock advertises when it is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PtpClockInfo {
    pub name: String,
    pub max_adj: i64,
    pub n_alarm: u32,
    pub n_ext_ts: u32,
    pub n_per_out: u32,
    pub n_pins: u32,
    pub pps: bool,
}

impl PtpClockInfo {
    fn for_mac(mac: [u8; 6]) -> Self {
        Self {
            name: hex::encode(mac),
            max_adj: MAX_ADJ_PPB,
            n_alarm: 0,
            n_ext_ts: 0,
            n_per_out: 0,
            n_pins: 0,
            pps: true,
        }
    }
}

/// Identifies a registered hardware clock towards the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PtpClockHandle {
    index: u32,
    info: PtpClockInfo,
}

impl PtpClockHandle {
    pub fn register(mac: [u8; 6]) -> Self {
        let index = NEXT_CLOCK_INDEX.fetch_add(1, Ordering::Relaxed);
        Self {
            index,
            info: PtpClockInfo::for_mac(mac),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &PtpClockInfo {
        &self.info
    }
}

/// The PTP hardware clock of the NIC.
///
/// Every operation holds the register lock for its whole duration.
pub struct PhcClock<R> {
    regs: SharedRegisters<R>,
    handle: PtpClockHandle,
}

impl<R: RegisterIo> PhcClock<R> {
    pub fn new(regs: SharedRegisters<R>, handle: PtpClockHandle) -> Self {
        Self { regs, handle }
    }

    pub fn handle(&self) -> &PtpClockHandle {
        &self.handle
    }

    pub(crate) fn into_handle(self) -> PtpClockHandle {
        self.handle
    }
}

impl<R: RegisterIo> PtpClockOps for PhcClock<R> {
    fn get_time(&self) -> PhcResult<Timestamp> {
        Ok(lock_registers(&self.regs).read_local_time_latched())
    }

    fn set_time(&self, time: Timestamp) -> PhcResult<()> {
        lock_registers(&self.regs).write_local_time(time);
        Ok(())
    }

    fn adjust_time(&self, delta_ns: i64) -> PhcResult<()> {
        let delta = ClockDelta::from_nanos(delta_ns);
        // the hardware re-latches absolute time here, the drift command is
        // reserved for frequency corrections
        lock_registers(&self.regs).write_delta_and_apply(&delta, TimeCommand::Set);
        Ok(())
    }

    fn adjust_frequency(&self, ppb: i64) -> PhcResult<()> {
        let adjustment = FrequencyAdjustment::new(ppb)?;
        lock_registers(&self.regs).write_drift_and_apply(&adjustment);
        Ok(())
    }

    fn enable(&self, request: ClockRequest, on: bool) -> PhcResult<()> {
        match request {
            ClockRequest::Pps => {
                let mut regs = lock_registers(&self.regs);
                let mut ctrl = regs.ptp_control();
                ctrl.remove(PtpControl::PPS_SELECT);
                ctrl.set(PtpControl::PPS_ENABLE, on);
                regs.set_ptp_control(ctrl);
                Ok(())
            }
            ClockRequest::PeriodicOutput { .. } => {
                Err(PhcError::Unsupported("periodic output"))
            }
            ClockRequest::ExternalTimestamp { .. } => {
                Err(PhcError::Unsupported("external timestamps"))
            }
            ClockRequest::Pin { .. } => Err(PhcError::Unsupported("pin configuration")),
        }
    }
}
