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

use std::time::SystemTimeError;
use thiserror::Error;
use tokio::{
    runtime::TryCurrentError,
    sync::{mpsc::error::SendError, oneshot::error::RecvError},
};

#[derive(Error, Debug)]
pub enum PhcError {
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("frequency adjustment of {0} ppb is out of range (max is {1})")]
    OutOfRange(i64, i64),
    #[error("could not transfer timestamping config: {0}")]
    TransferFault(String),
    #[error("host wall clock unavailable: {0}")]
    WallClock(#[from] SystemTimeError),
    #[error("tx capture error: {0}")]
    TxCapture(#[from] TxCaptureError),
    #[error("no tokio runtime to run the tx capture task: {0}")]
    Runtime(#[from] TryCurrentError),
}

pub type PhcResult<T> = Result<T, PhcError>;

#[derive(Error, Debug)]
pub enum TxCaptureError {
    #[error("a tx timestamp capture is already pending")]
    Busy,
    #[error("tx timestamp capture is suspended")]
    Suspended,
    #[error("channel error: tx capture actor is not running")]
    SendError,
    #[error("channel error: {0}")]
    ReceiveError(#[from] RecvError),
}

impl<T> From<SendError<T>> for TxCaptureError {
    fn from(_: SendError<T>) -> Self {
        TxCaptureError::SendError
    }
}

pub type TxCaptureResult<T> = Result<T, TxCaptureError>;
