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

//! A behavioral model of the NIC's PTP register block.
//!
//! The model keeps a free running local clock that only moves when
//! [`SimulatedNic::advance`] is called, executes the set/drift/latch commands
//! and fills the egress timestamp ring on [`SimulatedNic::complete_tx`].
//! Clones share the same device.

use crate::{
    registers::{
        PtpInterrupts, RegisterIo, TimeCommand, TxCaptureSlot, NS_NEGATIVE, PTP_CTRL,
        PTP_EGRESS_SLOTS, PTP_EGRESS_SLOT_STRIDE, PTP_EGRESS_STATUS, PTP_EGRESS_TIME_BASE_NS,
        PTP_EGRESS_TIME_BASE_S, PTP_ISR, PTP_SOFT_CONFIG_TIME_NS, PTP_SOFT_CONFIG_TIME_S,
        PTP_SOFT_CONFIG_TIME_SIGN, PTP_TIME_CORRECT_CMD,
    },
    error::PhcResult,
    time::{Timestamp, WallClock, NANOS_PER_SEC, NS_FIELD_MASK, S_FIELD_MASK},
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Length of one clock tick of the 125MHz PTP clock.
const TICK_NANOS: i128 = 8;
const SUB_NS_SHIFT: u32 = 30;

#[derive(Debug, Clone, Default)]
pub struct SimulatedNic {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    mmio: HashMap<u32, u8>,
    ocp: HashMap<u32, u16>,
    local_nanos: u128,
    drift_sub_ns_per_tick: i64,
    sub_ns_residue: i128,
    commands: Vec<TimeCommand>,
    ctrl_writes: usize,
    egress_write_pointer: u8,
}

impl SimState {
    fn load(&self, offset: u32, width: u32) -> u64 {
        (0..width).fold(0u64, |acc, i| {
            let byte = self.mmio.get(&(offset + i)).copied().unwrap_or_default();
            acc | (byte as u64) << (8 * i)
        })
    }

    fn store(&mut self, offset: u32, value: u64, width: u32) {
        for i in 0..width {
            self.mmio.insert(offset + i, (value >> (8 * i)) as u8);
        }
    }

    fn local_time(&self) -> Timestamp {
        let seconds = (self.local_nanos / NANOS_PER_SEC as u128) as u64;
        let nanoseconds = (self.local_nanos % NANOS_PER_SEC as u128) as u32;
        Timestamp::new(seconds, nanoseconds)
    }

    fn soft_config_fields(&self) -> (u32, u64) {
        let ns = self.load(PTP_SOFT_CONFIG_TIME_NS, 4) as u32;
        let s = self.load(PTP_SOFT_CONFIG_TIME_S, 8);
        (ns, s)
    }

    fn execute(&mut self, command: TimeCommand) {
        self.commands.push(command);
        match command {
            TimeCommand::Latch => {
                let now = self.local_time();
                self.store(PTP_SOFT_CONFIG_TIME_NS, now.nanoseconds() as u64, 4);
                self.store(PTP_SOFT_CONFIG_TIME_S, now.seconds(), 6);
            }
            TimeCommand::Set => {
                let (ns, s) = self.soft_config_fields();
                let seconds = (s & S_FIELD_MASK) as u128;
                let nanos = (ns & NS_FIELD_MASK) as u128;
                self.local_nanos = seconds * NANOS_PER_SEC as u128 + nanos;
                self.sub_ns_residue = 0;
            }
            TimeCommand::Drift => {
                let (ns, _) = self.soft_config_fields();
                let magnitude = (ns & NS_FIELD_MASK) as i64;
                self.drift_sub_ns_per_tick = if ns & NS_NEGATIVE != 0 {
                    -magnitude
                } else {
                    magnitude
                };
            }
        }
    }

    fn load_egress_slot(&mut self, slot: u8, time: Timestamp) {
        let ns_base = PTP_EGRESS_TIME_BASE_NS + slot as u32 * PTP_EGRESS_SLOT_STRIDE;
        let s_base = PTP_EGRESS_TIME_BASE_S + slot as u32 * PTP_EGRESS_SLOT_STRIDE;
        let ns = time.nanoseconds();
        let s = time.seconds();
        self.ocp.insert(ns_base, ns as u16);
        self.ocp.insert(ns_base + 2, (ns >> 16) as u16);
        self.ocp.insert(s_base, s as u16);
        self.ocp.insert(s_base + 2, (s >> 16) as u16);
        self.ocp.insert(s_base + 4, (s >> 32) as u16);
    }

    fn set_egress_write_pointer(&mut self, pointer: u8) {
        self.egress_write_pointer = pointer % PTP_EGRESS_SLOTS;
        let status = self.load(PTP_EGRESS_STATUS, 2) as u16 & !0x0C00;
        let status = status | (self.egress_write_pointer as u16) << 10;
        self.store(PTP_EGRESS_STATUS, status as u64, 2);
    }

    fn raise(&mut self, interrupts: PtpInterrupts) {
        let isr = self.load(PTP_ISR, 1) as u8 | interrupts.bits();
        self.store(PTP_ISR, isr as u64, 1);
    }
}

impl SimulatedNic {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lets the local clock run for `elapsed`, applying the current drift
    /// correction on every tick.
    pub fn advance(&self, elapsed: Duration) {
        let mut state = self.state();
        let elapsed = elapsed.as_nanos() as i128;
        let ticks = elapsed / TICK_NANOS;

        state.sub_ns_residue += ticks * state.drift_sub_ns_per_tick as i128;
        let correction = state.sub_ns_residue >> SUB_NS_SHIFT;
        state.sub_ns_residue -= correction << SUB_NS_SHIFT;

        let local = state.local_nanos as i128 + elapsed + correction;
        state.local_nanos = local.max(0) as u128;
    }

    pub fn local_time(&self) -> Timestamp {
        self.state().local_time()
    }

    pub fn commands(&self) -> Vec<TimeCommand> {
        self.state().commands.clone()
    }

    pub fn last_command(&self) -> Option<TimeCommand> {
        self.state().commands.last().copied()
    }

    pub fn ctrl_writes(&self) -> usize {
        self.state().ctrl_writes
    }

    pub fn ptp_control(&self) -> u16 {
        self.state().load(PTP_CTRL, 2) as u16
    }

    /// The raw nanosecond and second fields of the soft config registers,
    /// including their sign flags.
    pub fn soft_config_fields(&self) -> (u32, u64) {
        self.state().soft_config_fields()
    }

    pub fn drift_sub_ns_per_tick(&self) -> i64 {
        self.state().drift_sub_ns_per_tick
    }

    pub fn ocp(&self, addr: u32) -> u16 {
        self.state().ocp.get(&addr).copied().unwrap_or_default()
    }

    pub fn tx_status(&self) -> PtpInterrupts {
        PtpInterrupts::from_bits_retain(self.state().load(PTP_ISR, 1) as u8)
    }

    pub fn raise_tx_status(&self, interrupts: PtpInterrupts) {
        self.state().raise(interrupts);
    }

    pub fn load_egress_slot(&self, slot: u8, time: Timestamp) {
        self.state().load_egress_slot(slot % PTP_EGRESS_SLOTS, time);
    }

    pub fn set_egress_write_pointer(&self, pointer: u8) {
        self.state().set_egress_write_pointer(pointer);
    }

    /// Latches `time` into the slot under the write pointer, moves the pointer
    /// on and raises the completion token.
    pub fn complete_tx(&self, time: Timestamp) -> TxCaptureSlot {
        let mut state = self.state();
        let slot = state.egress_write_pointer;
        state.load_egress_slot(slot, time);
        let next = slot + 1;
        state.set_egress_write_pointer(next);
        state.raise(PtpInterrupts::TOK);
        TxCaptureSlot::from_write_pointer(next)
    }

    /// Like [`SimulatedNic::complete_tx`] with the current local time.
    pub fn complete_tx_now(&self) -> Timestamp {
        let now = self.local_time();
        self.complete_tx(now);
        now
    }
}

impl RegisterIo for SimulatedNic {
    fn read8(&mut self, offset: u32) -> u8 {
        self.state().load(offset, 1) as u8
    }

    fn read16(&mut self, offset: u32) -> u16 {
        self.state().load(offset, 2) as u16
    }

    fn read32(&mut self, offset: u32) -> u32 {
        self.state().load(offset, 4) as u32
    }

    fn write8(&mut self, offset: u32, value: u8) {
        let mut state = self.state();
        if offset == PTP_ISR {
            // write one to clear
            let isr = state.load(PTP_ISR, 1) as u8 & !value;
            state.store(PTP_ISR, isr as u64, 1);
        } else {
            state.store(offset, value as u64, 1);
        }
    }

    fn write16(&mut self, offset: u32, value: u16) {
        let mut state = self.state();
        match offset {
            PTP_TIME_CORRECT_CMD => {
                state.store(offset, value as u64, 2);
                if let Some(command) = TimeCommand::from_bits(value) {
                    state.execute(command);
                }
            }
            PTP_CTRL => {
                state.ctrl_writes += 1;
                state.store(offset, value as u64, 2);
            }
            PTP_SOFT_CONFIG_TIME_SIGN => state.store(offset, (value & 1) as u64, 2),
            _ => state.store(offset, value as u64, 2),
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.state().store(offset, value as u64, 4);
    }

    fn ocp_read(&mut self, addr: u32) -> u16 {
        self.ocp(addr)
    }

    fn ocp_write(&mut self, addr: u32, value: u16) {
        self.state().ocp.insert(addr, value);
    }
}

/// A host wall clock that is stuck at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWallClock(pub Timestamp);

impl WallClock for FixedWallClock {
    fn now(&self) -> PhcResult<Timestamp> {
        Ok(self.0)
    }
}
