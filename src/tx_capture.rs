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

//! Capture of hardware transmit timestamps.
//!
//! When an event packet leaves the NIC the hardware latches its transmit time
//! into the egress ring and raises a completion token. [`TxTimestampCapture`]
//! is the state machine that owns the packet while that happens, the
//! [`TxCaptureApi`] actor drives it with a poll-until-deadline loop.

use crate::{
    actor::{respond, Actor, ActorApi},
    error::{TxCaptureError, TxCaptureResult},
    registers::{lock_registers, PtpInterrupts, RegisterIo, SharedRegisters, TxCaptureSlot},
    time::Timestamp,
};
use serde::{Deserialize, Serialize};
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

pub const TX_TIMEOUT: Duration = Duration::from_secs(15);
pub const TX_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCaptureConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TxCaptureConfig {
    fn default() -> Self {
        Self {
            timeout: TX_TIMEOUT,
            poll_interval: TX_POLL_INTERVAL,
        }
    }
}

/// The owner of transmitted packets, notified when a packet's hardware
/// transmit timestamp is known. Packets that time out are dropped without a
/// notification.
pub trait TxTimestampSink<P>: Send + Sync {
    fn deliver(&self, packet: &P, timestamp: Timestamp);
}

/// State shared between the transmit path and the capture task.
#[derive(Debug, Default)]
pub struct TxCaptureShared {
    in_progress: AtomicBool,
    suspended: AtomicBool,
    timeouts: AtomicU64,
}

impl TxCaptureShared {
    /// Claims the single in-flight capture. Returns `false` if another
    /// capture is still pending, in which case the packet must go out without
    /// a hardware timestamp.
    pub fn try_claim(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// While suspended, new captures are refused and their packets released.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn release(&self) {
        self.in_progress.store(false, Ordering::Release);
    }
}

struct PendingTxCapture<P> {
    packet: P,
    start_time: Instant,
}

enum CaptureState<P> {
    Idle,
    Pending(PendingTxCapture<P>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Pending,
    Delivered(Timestamp),
    TimedOut,
}

pub struct TxTimestampCapture<P, R> {
    state: CaptureState<P>,
    shared: Arc<TxCaptureShared>,
    regs: SharedRegisters<R>,
    sink: Arc<dyn TxTimestampSink<P>>,
    timeout: Duration,
}

impl<P, R: RegisterIo> TxTimestampCapture<P, R> {
    pub fn new(
        regs: SharedRegisters<R>,
        sink: Arc<dyn TxTimestampSink<P>>,
        shared: Arc<TxCaptureShared>,
        timeout: Duration,
    ) -> Self {
        Self {
            state: CaptureState::Idle,
            shared,
            regs,
            sink,
            timeout,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, CaptureState::Pending(_))
    }

    pub fn begin(&mut self, packet: P, now: Instant) -> TxCaptureResult<()> {
        if self.is_pending() {
            return Err(TxCaptureError::Busy);
        }
        if self.shared.is_suspended() {
            self.shared.release();
            drop(packet);
            return Err(TxCaptureError::Suspended);
        }
        self.shared.in_progress.store(true, Ordering::Release);
        self.state = CaptureState::Pending(PendingTxCapture {
            packet,
            start_time: now,
        });
        Ok(())
    }

    /// One poll step. Never blocks, the caller reschedules it as long as the
    /// outcome is [`PollOutcome::Pending`].
    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let start_time = match &self.state {
            CaptureState::Idle => return PollOutcome::Idle,
            CaptureState::Pending(pending) => pending.start_time,
        };

        let status = lock_registers(&self.regs).tx_status();
        if status.contains(PtpInterrupts::TOK) {
            return self.complete();
        }

        if now.saturating_duration_since(start_time) < self.timeout {
            PollOutcome::Pending
        } else {
            self.expire()
        }
    }

    /// Drops a pending capture without delivering a timestamp. Returns whether
    /// there was one.
    pub fn cancel(&mut self) -> bool {
        match mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => false,
            CaptureState::Pending(pending) => {
                self.shared.release();
                drop(pending);
                true
            }
        }
    }

    fn complete(&mut self) -> PollOutcome {
        let timestamp = {
            let mut regs = lock_registers(&self.regs);
            regs.clear_tx_status();
            let slot = TxCaptureSlot::from_write_pointer(regs.egress_write_pointer());
            regs.read_egress_slot(slot)
        };

        let CaptureState::Pending(pending) = mem::replace(&mut self.state, CaptureState::Idle)
        else {
            return PollOutcome::Idle;
        };

        // release before notifying so the owner never sees a stale claim
        self.shared.release();
        self.sink.deliver(&pending.packet, timestamp);
        drop(pending);

        PollOutcome::Delivered(timestamp)
    }

    fn expire(&mut self) -> PollOutcome {
        let previous = mem::replace(&mut self.state, CaptureState::Idle);
        drop(previous);

        lock_registers(&self.regs).clear_tx_status();
        self.shared.release();
        self.shared.timeouts.fetch_add(1, Ordering::Relaxed);

        PollOutcome::TimedOut
    }
}

impl<P, R> Drop for TxTimestampCapture<P, R> {
    fn drop(&mut self) {
        if let CaptureState::Pending(_) = self.state {
            self.shared.release();
        }
    }
}

pub enum TxCaptureFunction<P> {
    Start(P, oneshot::Sender<TxCaptureResult<()>>),
    Cancel(oneshot::Sender<TxCaptureResult<()>>),
}

pub struct TxCaptureApi<P> {
    channel: mpsc::Sender<TxCaptureFunction<P>>,
    shared: Arc<TxCaptureShared>,
}

impl<P> Clone for TxCaptureApi<P> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<P> ActorApi for TxCaptureApi<P> {
    type Message = TxCaptureFunction<P>;
    type Error = TxCaptureError;

    fn message_tx(&self) -> &mpsc::Sender<TxCaptureFunction<P>> {
        &self.channel
    }
}

impl<P: Send + 'static> TxCaptureApi<P> {
    pub fn spawn<R: RegisterIo + 'static>(
        regs: SharedRegisters<R>,
        sink: Arc<dyn TxTimestampSink<P>>,
        config: TxCaptureConfig,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<TxCaptureResult<()>>) {
        let (channel, commands) = mpsc::channel(1);
        let shared = Arc::new(TxCaptureShared::default());

        let capture = TxTimestampCapture::new(regs, sink, shared.clone(), config.timeout);
        let handle = tokio::spawn(async move {
            let mut actor = TxCaptureActor {
                commands,
                capture,
                poll_interval: config.poll_interval,
                next_poll: None,
            };
            actor.run("ptp/tx-capture".to_owned(), cancel_token).await
        });

        (TxCaptureApi { channel, shared }, handle)
    }

    pub fn try_claim(&self) -> bool {
        self.shared.try_claim()
    }

    pub fn is_in_progress(&self) -> bool {
        self.shared.is_in_progress()
    }

    pub fn timeouts(&self) -> u64 {
        self.shared.timeouts()
    }

    /// Gives up a claim whose packet never reached the capture task.
    pub fn release_claim(&self) {
        self.shared.release();
    }

    /// Refuses or accepts new captures. Takes effect for every start the
    /// task processes after this call, including ones already queued.
    pub fn set_suspended(&self, suspended: bool) {
        self.shared.set_suspended(suspended);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.is_suspended()
    }

    /// Hands a transmitted packet to the capture task. The caller must have
    /// claimed the capture with [`TxCaptureApi::try_claim`] first.
    pub async fn start(&self, packet: P) -> TxCaptureResult<()> {
        self.send_message(|tx| TxCaptureFunction::Start(packet, tx)).await
    }

    /// Returns once any poll step in flight has settled. A capture still
    /// pending afterwards is dropped without a timestamp.
    pub async fn cancel(&self) -> TxCaptureResult<()> {
        self.send_message(TxCaptureFunction::Cancel).await
    }
}

struct TxCaptureActor<P, R> {
    commands: mpsc::Receiver<TxCaptureFunction<P>>,
    capture: TxTimestampCapture<P, R>,
    poll_interval: Duration,
    next_poll: Option<Instant>,
}

impl<P: Send, R: RegisterIo> Actor for TxCaptureActor<P, R> {
    type Message = TxCaptureFunction<P>;
    type Error = TxCaptureError;

    async fn recv_message(&mut self) -> Option<TxCaptureFunction<P>> {
        self.commands.recv().await
    }

    async fn process_message(&mut self, function: TxCaptureFunction<P>) -> bool {
        match function {
            TxCaptureFunction::Start(packet, tx) => {
                respond(self.start(packet), tx).await;
            }
            TxCaptureFunction::Cancel(tx) => {
                respond(self.cancel(), tx).await;
            }
        }
        true
    }

    fn next_wakeup(&self) -> Option<Instant> {
        self.next_poll
    }

    async fn wakeup(&mut self) {
        self.poll();
    }

    async fn stopped(&mut self) {
        if self.capture.cancel() {
            log::debug!("Dropped pending tx timestamp capture on shutdown.");
        }
    }
}

impl<P: Send, R: RegisterIo> TxCaptureActor<P, R> {
    async fn start(&mut self, packet: P) -> TxCaptureResult<()> {
        self.capture.begin(packet, Instant::now())?;
        self.poll();
        Ok(())
    }

    async fn cancel(&mut self) -> TxCaptureResult<()> {
        if self.capture.cancel() {
            log::debug!("Cancelled pending tx timestamp capture.");
        }
        self.next_poll = None;
        Ok(())
    }

    fn poll(&mut self) {
        match self.capture.poll(Instant::now()) {
            PollOutcome::Delivered(timestamp) => log::trace!("Tx timestamp: {timestamp}"),
            PollOutcome::TimedOut => log::warn!(
                "Tx timestamp not latched within {:?}, packet released without timestamp.",
                self.capture.timeout
            ),
            PollOutcome::Idle | PollOutcome::Pending => (),
        }
        self.next_poll = self
            .capture
            .is_pending()
            .then(|| Instant::now() + self.poll_interval);
    }
}
