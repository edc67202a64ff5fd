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

pub mod actor;
pub mod clock;
pub mod config;
pub mod device;
pub mod error;
pub mod registers;
pub mod rx;
pub mod sim;
pub mod time;
pub mod tx_capture;

pub use clock::{ClockRequest, PhcClock, PtpClockHandle, PtpClockOps};
pub use device::{DeviceInfo, PtpDevice, PtpDeviceConfig, TxSubmit};
pub use error::{PhcError, PhcResult};
pub use time::{ClockDelta, FrequencyAdjustment, Timestamp};
