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

use crate::error::{PhcError, PhcResult};
use serde::{Deserialize, Serialize};
use std::{
    fmt::Display,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Width mask of the 30 bit nanosecond field.
pub const NS_FIELD_MASK: u32 = 0x3fff_ffff;
/// Width mask of the 48 bit second field.
pub const S_FIELD_MASK: u64 = 0x0000_ffff_ffff_ffff;

/// Largest frequency correction the hardware accepts, in ppb.
pub const MAX_ADJ_PPB: i64 = 119_304_647;

/// One ppb corresponds to 8ns * 10^-9 per 125MHz tick. With 1ns = 2^30 sub-ns
/// that is 2^33 * 10^-9 = 8.59 sub-ns, rounded up.
pub const SUB_NS_PER_PPB: u64 = 9;

/// A point in time as kept by the hardware clock.
///
/// The second counter is 48 bits wide and the nanosecond counter 30 bits,
/// constructors mask both to their field width.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    seconds: u64,
    nanoseconds: u32,
}

impl Timestamp {
    pub const fn new(seconds: u64, nanoseconds: u32) -> Self {
        Self {
            seconds: seconds & S_FIELD_MASK,
            nanoseconds: nanoseconds & NS_FIELD_MASK,
        }
    }

    pub fn from_duration(since_epoch: Duration) -> Self {
        Self::new(since_epoch.as_secs(), since_epoch.subsec_nanos())
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn nanoseconds(&self) -> u32 {
        self.nanoseconds
    }

    pub fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SEC as i128 + self.nanoseconds as i128
    }

    /// Signed distance `self - other` in nanoseconds.
    pub fn offset_from(&self, other: &Timestamp) -> i128 {
        self.total_nanos() - other.total_nanos()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// A signed clock offset in sign-magnitude form.
///
/// Both fields carry their own sign, so a delta of -0.5s has a negative
/// nanosecond field and a positive (zero) second field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockDelta {
    pub seconds: u64,
    pub seconds_negative: bool,
    pub nanoseconds: u32,
    pub nanoseconds_negative: bool,
}

impl ClockDelta {
    pub fn from_nanos(delta: i64) -> Self {
        let seconds = delta / NANOS_PER_SEC;
        let remainder = delta % NANOS_PER_SEC;

        Self {
            seconds: seconds.unsigned_abs() & S_FIELD_MASK,
            seconds_negative: seconds < 0,
            nanoseconds: remainder.unsigned_abs() as u32 & NS_FIELD_MASK,
            nanoseconds_negative: remainder < 0,
        }
    }

    /// The delta in nanoseconds. Wide enough for every 48 bit second field.
    pub fn as_nanos(&self) -> i128 {
        let seconds = self.seconds as i128 * NANOS_PER_SEC as i128;
        let seconds = if self.seconds_negative {
            -seconds
        } else {
            seconds
        };
        let nanos = self.nanoseconds as i128;
        let nanos = if self.nanoseconds_negative {
            -nanos
        } else {
            nanos
        };
        seconds + nanos
    }
}

/// A bounded frequency correction in parts per billion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrequencyAdjustment {
    ppb: i64,
}

impl FrequencyAdjustment {
    pub fn new(ppb: i64) -> PhcResult<Self> {
        if ppb.unsigned_abs() > MAX_ADJ_PPB as u64 {
            return Err(PhcError::OutOfRange(ppb, MAX_ADJ_PPB));
        }
        Ok(Self { ppb })
    }

    pub fn ppb(&self) -> i64 {
        self.ppb
    }

    pub fn is_negative(&self) -> bool {
        self.ppb < 0
    }

    /// Magnitude of the per tick correction in sub-nanoseconds, masked to the
    /// nanosecond field.
    pub fn sub_ns(&self) -> u32 {
        (self.ppb.unsigned_abs() * SUB_NS_PER_PPB) as u32 & NS_FIELD_MASK
    }
}

/// Converts a scaled ppm value (ppm with a 16 bit binary fraction) into ppb.
pub fn scaled_ppm_to_ppb(scaled_ppm: i64) -> i64 {
    // ppb = scaled_ppm * 1000 / 2^16 = scaled_ppm * 125 / 2^13
    // i128 so that 1 + i64::MAX does not overflow, the shifted result fits i64
    let ppb = ((1 + scaled_ppm as i128) * 125) >> 13;
    ppb as i64
}

/// Source of the host's wall clock time, used to prime the hardware clock.
pub trait WallClock: Send + Sync {
    fn now(&self) -> PhcResult<Timestamp>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> PhcResult<Timestamp> {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH)?;
        Ok(Timestamp::from_duration(since_epoch))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamp_masks_fields_to_width() {
        let ts = Timestamp::new(u64::MAX, u32::MAX);
        assert_eq!(ts.seconds(), S_FIELD_MASK);
        assert_eq!(ts.nanoseconds(), NS_FIELD_MASK);
    }

    #[test]
    fn timestamp_offsets_are_signed() {
        let a = Timestamp::new(100, 500_000_000);
        let b = Timestamp::new(99, 750_000_000);
        assert_eq!(a.offset_from(&b), 750_000_000);
        assert_eq!(b.offset_from(&a), -750_000_000);
    }

    #[test]
    fn timestamp_displays_as_decimal_seconds() {
        assert_eq!(Timestamp::new(12, 3_400).to_string(), "12.000003400");
    }

    #[test]
    fn delta_signs_are_independent_per_field() {
        let d = ClockDelta::from_nanos(-500_000_000);
        assert!(!d.seconds_negative);
        assert!(d.nanoseconds_negative);
        assert_eq!(d.seconds, 0);
        assert_eq!(d.nanoseconds, 500_000_000);

        let d = ClockDelta::from_nanos(-2_000_000_000);
        assert!(d.seconds_negative);
        assert!(!d.nanoseconds_negative);
        assert_eq!(d.seconds, 2);
        assert_eq!(d.nanoseconds, 0);

        let d = ClockDelta::from_nanos(-1_250_000_000);
        assert!(d.seconds_negative);
        assert!(d.nanoseconds_negative);
        assert_eq!(d.seconds, 1);
        assert_eq!(d.nanoseconds, 250_000_000);

        let d = ClockDelta::from_nanos(3_000_000_007);
        assert!(!d.seconds_negative);
        assert!(!d.nanoseconds_negative);
        assert_eq!(d.seconds, 3);
        assert_eq!(d.nanoseconds, 7);
    }

    #[test]
    fn delta_converts_back_to_nanos() {
        for delta in [
            0,
            1,
            -1,
            999_999_999,
            -1_000_000_000,
            -1_250_000_000,
            86_400 * NANOS_PER_SEC + 17,
        ] {
            assert_eq!(ClockDelta::from_nanos(delta).as_nanos(), delta as i128);
        }
    }

    #[test]
    fn frequency_adjustment_is_bounded() {
        assert!(FrequencyAdjustment::new(MAX_ADJ_PPB).is_ok());
        assert!(FrequencyAdjustment::new(-MAX_ADJ_PPB).is_ok());
        assert!(FrequencyAdjustment::new(0).is_ok());
        assert!(matches!(
            FrequencyAdjustment::new(MAX_ADJ_PPB + 1),
            Err(PhcError::OutOfRange(119_304_648, MAX_ADJ_PPB))
        ));
        assert!(matches!(
            FrequencyAdjustment::new(-MAX_ADJ_PPB - 1),
            Err(PhcError::OutOfRange(-119_304_648, MAX_ADJ_PPB))
        ));
    }

    #[test]
    fn max_frequency_adjustment_fills_the_nanosecond_field() {
        let adj = FrequencyAdjustment::new(MAX_ADJ_PPB).expect("in range");
        assert_eq!(adj.sub_ns(), NS_FIELD_MASK);

        let adj = FrequencyAdjustment::new(-1000).expect("in range");
        assert!(adj.is_negative());
        assert_eq!(adj.sub_ns(), 9000);
    }

    #[test]
    fn scaled_ppm_converts_to_ppb() {
        // 1 ppm
        assert_eq!(scaled_ppm_to_ppb(65_536), 1000);
        assert_eq!(scaled_ppm_to_ppb(0), 0);
        assert_eq!(scaled_ppm_to_ppb(-65_536), -1000);
        assert_eq!(scaled_ppm_to_ppb(655_360), 10_000);
    }

    #[test]
    fn extreme_scaled_ppm_converts_without_overflow() {
        assert_eq!(scaled_ppm_to_ppb(i64::MAX), 140_737_488_355_328_000);
        assert_eq!(scaled_ppm_to_ppb(i64::MIN), -140_737_488_355_328_000);
        assert!(FrequencyAdjustment::new(scaled_ppm_to_ppb(i64::MAX)).is_err());
        assert!(FrequencyAdjustment::new(scaled_ppm_to_ppb(i64::MIN)).is_err());
    }

    #[test]
    fn widest_delta_converts_to_nanos_without_overflow() {
        let d = ClockDelta {
            seconds_negative: true,
            seconds: S_FIELD_MASK,
            nanoseconds_negative: true,
            nanoseconds: NS_FIELD_MASK,
        };
        let expected = -(S_FIELD_MASK as i128 * 1_000_000_000) - NS_FIELD_MASK as i128;
        assert_eq!(d.as_nanos(), expected);
        assert!(d.as_nanos() < i64::MIN as i128);
    }
}
