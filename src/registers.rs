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

//! Accessors for the PTP register block of the NIC.
//!
//! Everything above this module sees whole [`Timestamp`]s and [`ClockDelta`]s,
//! the split 16/32 bit registers and the sign flag bits never leave it.

use crate::time::{ClockDelta, FrequencyAdjustment, Timestamp, NS_FIELD_MASK, S_FIELD_MASK};
use bitflags::bitflags;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const PTP_CTRL: u32 = 0x6800;
pub const PTP_ISR: u32 = 0x6804;
pub const PTP_TIME_CORRECT_CMD: u32 = 0x6806;
pub const PTP_SOFT_CONFIG_TIME_NS: u32 = 0x6808;
pub const PTP_SOFT_CONFIG_TIME_S: u32 = 0x680C;
/// Holds bit 48 of the second field, i.e. the seconds sign flag.
pub const PTP_SOFT_CONFIG_TIME_SIGN: u32 = 0x6812;
/// Bits 10..11 hold the egress ring write pointer.
pub const PTP_EGRESS_STATUS: u32 = 0x2032;

pub const PTP_EGRESS_TIME_BASE_NS: u32 = 0xCF20;
pub const PTP_EGRESS_TIME_BASE_S: u32 = 0xCF28;
pub const PTP_EGRESS_SLOT_STRIDE: u32 = 16;
pub const PTP_EGRESS_SLOTS: u8 = 4;

/// OCP register selecting the PTP time source, bit 6 set means MAC.
pub const OCP_PTP_SOURCE: u32 = 0xDC00;
pub const OCP_PTP_SOURCE_MAC: u16 = 1 << 6;

pub const PTP_EXEC_CMD: u16 = 1 << 7;

pub const NS_NEGATIVE: u32 = 1 << 30;
pub const S_NEGATIVE: u64 = 1 << 48;

const EGRESS_WRITE_POINTER_MASK: u16 = 0x0C00;
const EGRESS_WRITE_POINTER_SHIFT: u16 = 10;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtpControl: u16 {
        const ENABLE = 1 << 0;
        const MASTER = 1 << 1;
        const BIT_3 = 1 << 3;
        const BIT_4 = 1 << 4;
        const BIT_6 = 1 << 6;
        const BIT_10 = 1 << 10;
        const BIT_12 = 1 << 12;
        const PPS_ENABLE = 1 << 14;
        const PPS_SELECT = 1 << 15;

        /// Control word that turns on hardware timestamping.
        const TIMESTAMPING = Self::ENABLE.bits()
            | Self::BIT_3.bits()
            | Self::BIT_4.bits()
            | Self::BIT_6.bits()
            | Self::BIT_10.bits()
            | Self::BIT_12.bits();
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtpInterrupts: u8 {
        /// Tx timestamp latched.
        const TOK = 1 << 1;
        /// Tx timestamp error.
        const TER = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeCommand {
    Set,
    Drift,
    Latch,
}

impl TimeCommand {
    pub fn bits(self) -> u16 {
        match self {
            TimeCommand::Set => 1 << 3,
            TimeCommand::Drift => 1 << 4,
            TimeCommand::Latch => 1 << 5,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & PTP_EXEC_CMD == 0 {
            return None;
        }
        [TimeCommand::Set, TimeCommand::Drift, TimeCommand::Latch]
            .into_iter()
            .find(|c| bits & c.bits() != 0)
    }
}

/// One of the four egress timestamp ring positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxCaptureSlot(u8);

impl TxCaptureSlot {
    /// The write pointer already points past the slot the hardware filled last.
    pub fn from_write_pointer(pointer: u8) -> Self {
        TxCaptureSlot((pointer % PTP_EGRESS_SLOTS + 3) % PTP_EGRESS_SLOTS)
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    fn ns_base(&self) -> u32 {
        PTP_EGRESS_TIME_BASE_NS + self.0 as u32 * PTP_EGRESS_SLOT_STRIDE
    }

    fn s_base(&self) -> u32 {
        PTP_EGRESS_TIME_BASE_S + self.0 as u32 * PTP_EGRESS_SLOT_STRIDE
    }
}

/// Raw register access of a NIC: memory mapped registers plus the indirect
/// OCP window.
pub trait RegisterIo: Send {
    fn read8(&mut self, offset: u32) -> u8;
    fn read16(&mut self, offset: u32) -> u16;
    fn read32(&mut self, offset: u32) -> u32;
    fn write8(&mut self, offset: u32, value: u8);
    fn write16(&mut self, offset: u32, value: u16);
    fn write32(&mut self, offset: u32, value: u32);
    fn ocp_read(&mut self, addr: u32) -> u16;
    fn ocp_write(&mut self, addr: u32, value: u16);
}

/// Nanosecond field with the sign flag OR'd in after masking.
pub fn encode_ns_field(magnitude: u32, negative: bool) -> u32 {
    let field = magnitude & NS_FIELD_MASK;
    if negative {
        field | NS_NEGATIVE
    } else {
        field
    }
}

/// Second field with the sign flag OR'd in after masking.
pub fn encode_s_field(magnitude: u64, negative: bool) -> u64 {
    let field = magnitude & S_FIELD_MASK;
    if negative {
        field | S_NEGATIVE
    } else {
        field
    }
}

pub fn encode_delta(delta: &ClockDelta) -> (u32, u64) {
    (
        encode_ns_field(delta.nanoseconds, delta.nanoseconds_negative),
        encode_s_field(delta.seconds, delta.seconds_negative),
    )
}

pub fn decode_delta(ns_field: u32, s_field: u64) -> ClockDelta {
    ClockDelta {
        seconds: s_field & S_FIELD_MASK,
        seconds_negative: s_field & S_NEGATIVE != 0,
        nanoseconds: ns_field & NS_FIELD_MASK,
        nanoseconds_negative: ns_field & NS_NEGATIVE != 0,
    }
}

/// The PTP register protocol on top of a [`RegisterIo`].
///
/// All operations are plain synchronous register transactions without retries.
#[derive(Debug)]
pub struct PtpRegisters<R> {
    io: R,
}

pub type SharedRegisters<R> = Arc<Mutex<PtpRegisters<R>>>;

/// Locks the register block. A panic while holding the lock leaves the
/// registers in whatever state the hardware has, so poisoning is ignored.
pub fn lock_registers<R>(regs: &SharedRegisters<R>) -> MutexGuard<'_, PtpRegisters<R>> {
    regs.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: RegisterIo> PtpRegisters<R> {
    pub fn new(io: R) -> Self {
        Self { io }
    }

    pub fn shared(io: R) -> SharedRegisters<R> {
        Arc::new(Mutex::new(Self::new(io)))
    }

    pub fn io(&self) -> &R {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut R {
        &mut self.io
    }

    fn exec(&mut self, command: TimeCommand) {
        self.io.write16(PTP_TIME_CORRECT_CMD, command.bits() | PTP_EXEC_CMD);
    }

    fn write_fields(&mut self, ns_field: u32, s_field: u64) {
        self.io.write32(PTP_SOFT_CONFIG_TIME_NS, ns_field);
        self.io.write32(PTP_SOFT_CONFIG_TIME_S, s_field as u32);
        self.io.write16(PTP_SOFT_CONFIG_TIME_S + 4, (s_field >> 32) as u16);
        self.io.write16(PTP_SOFT_CONFIG_TIME_SIGN, (s_field >> 48) as u16);
    }

    pub fn read_local_time_latched(&mut self) -> Timestamp {
        self.exec(TimeCommand::Latch);

        let nanoseconds = self.io.read32(PTP_SOFT_CONFIG_TIME_NS) & NS_FIELD_MASK;

        let mut seconds = self.io.read16(PTP_SOFT_CONFIG_TIME_S + 4) as u64;
        seconds <<= 32;
        seconds |= self.io.read32(PTP_SOFT_CONFIG_TIME_S) as u64;

        Timestamp::new(seconds, nanoseconds)
    }

    pub fn write_local_time(&mut self, time: Timestamp) {
        self.write_fields(
            encode_ns_field(time.nanoseconds(), false),
            encode_s_field(time.seconds(), false),
        );
        self.exec(TimeCommand::Set);
    }

    pub fn write_delta_and_apply(&mut self, delta: &ClockDelta, command: TimeCommand) {
        let (ns_field, s_field) = encode_delta(delta);
        self.write_fields(ns_field, s_field);
        self.exec(command);
    }

    /// Writes only the nanosecond correction field and issues a drift command.
    pub fn write_drift_and_apply(&mut self, adjustment: &FrequencyAdjustment) {
        let ns_field = encode_ns_field(adjustment.sub_ns(), adjustment.is_negative());
        self.io.write32(PTP_SOFT_CONFIG_TIME_NS, ns_field);
        self.exec(TimeCommand::Drift);
    }

    pub fn read_egress_slot(&mut self, slot: TxCaptureSlot) -> Timestamp {
        let ns_base = slot.ns_base();
        let mut nanoseconds = self.io.ocp_read(ns_base + 2) as u32;
        nanoseconds <<= 16;
        nanoseconds |= self.io.ocp_read(ns_base) as u32;

        let s_base = slot.s_base();
        let mut seconds = self.io.ocp_read(s_base + 4) as u64;
        seconds <<= 16;
        seconds |= self.io.ocp_read(s_base + 2) as u64;
        seconds <<= 16;
        seconds |= self.io.ocp_read(s_base) as u64;

        Timestamp::new(seconds & S_FIELD_MASK, nanoseconds & NS_FIELD_MASK)
    }

    pub fn egress_write_pointer(&mut self) -> u8 {
        ((self.io.read16(PTP_EGRESS_STATUS) & EGRESS_WRITE_POINTER_MASK)
            >> EGRESS_WRITE_POINTER_SHIFT) as u8
    }

    pub fn tx_status(&mut self) -> PtpInterrupts {
        PtpInterrupts::from_bits_retain(self.io.read8(PTP_ISR))
    }

    pub fn clear_tx_status(&mut self) {
        self.io.write8(PTP_ISR, (PtpInterrupts::TOK | PtpInterrupts::TER).bits());
    }

    pub fn clear_interrupts(&mut self) {
        self.io.write8(PTP_ISR, 0xff);
    }

    pub fn ptp_control(&mut self) -> PtpControl {
        PtpControl::from_bits_retain(self.io.read16(PTP_CTRL))
    }

    pub fn set_ptp_control(&mut self, control: PtpControl) {
        self.io.write16(PTP_CTRL, control.bits());
    }

    pub fn select_mac_time_source(&mut self) {
        let source = self.io.ocp_read(OCP_PTP_SOURCE);
        self.io.ocp_write(OCP_PTP_SOURCE, source | OCP_PTP_SOURCE_MAC);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimulatedNic;

    #[test]
    fn ring_slot_trails_write_pointer() {
        let slots: Vec<u8> = (0..4)
            .map(|p| TxCaptureSlot::from_write_pointer(p).index())
            .collect();
        assert_eq!(slots, vec![3, 0, 1, 2]);
    }

    #[test]
    fn sign_bits_are_ored_in_after_masking() {
        assert_eq!(encode_ns_field(u32::MAX, false), NS_FIELD_MASK);
        assert_eq!(encode_ns_field(u32::MAX, true), NS_FIELD_MASK | NS_NEGATIVE);
        assert_eq!(encode_s_field(u64::MAX, false), S_FIELD_MASK);
        assert_eq!(encode_s_field(u64::MAX, true), S_FIELD_MASK | S_NEGATIVE);
        assert_eq!(encode_s_field(7, true), 7 | S_NEGATIVE);
    }

    #[test]
    fn delta_fields_decode_to_the_same_delta() {
        for nanos in [-1_250_000_000i64, -500_000_000, -2_000_000_000, 42, 0] {
            let delta = ClockDelta::from_nanos(nanos);
            let (ns, s) = encode_delta(&delta);
            assert_eq!(decode_delta(ns, s), delta);
        }
    }

    #[test]
    fn local_time_survives_register_round_trip() {
        let nic = SimulatedNic::new();
        let mut regs = PtpRegisters::new(nic.clone());

        for ts in [
            Timestamp::new(0, 0),
            Timestamp::new(1, 999_999_999),
            Timestamp::new(0x0000_ffff_ffff_fffe, 123_456_789),
            Timestamp::new(0x0000_1234_5678_9abc, 1),
        ] {
            regs.write_local_time(ts);
            assert_eq!(regs.read_local_time_latched(), ts);
        }
    }

    #[test]
    fn egress_slot_is_assembled_from_16_bit_reads() {
        let nic = SimulatedNic::new();
        let ts = Timestamp::new(0x0000_abcd_1234_5678, 0x2bcd_ef01);
        nic.load_egress_slot(2, ts);

        let mut regs = PtpRegisters::new(nic.clone());
        let read = regs.read_egress_slot(TxCaptureSlot::from_write_pointer(3));
        assert_eq!(read, ts);
    }

    #[test]
    fn write_pointer_is_taken_from_bits_10_and_11() {
        let nic = SimulatedNic::new();
        let mut regs = PtpRegisters::new(nic.clone());
        for pointer in 0..4 {
            nic.set_egress_write_pointer(pointer);
            assert_eq!(regs.egress_write_pointer(), pointer);
        }
    }

    #[test]
    fn commands_are_decoded_only_with_exec_bit() {
        assert_eq!(TimeCommand::from_bits(TimeCommand::Set.bits()), None);
        assert_eq!(
            TimeCommand::from_bits(TimeCommand::Drift.bits() | PTP_EXEC_CMD),
            Some(TimeCommand::Drift)
        );
    }
}
