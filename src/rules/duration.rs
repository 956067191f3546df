// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Prometheus-style durations such as `1h30m` or `500ms`.

use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("empty duration string"))]
    Empty,

    #[snafu(display("not a valid duration string: {input:?}"))]
    Invalid { input: String },

    #[snafu(display("duration {input:?} is out of range"))]
    Overflow { input: String },
}

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

// Units in the order they must appear; "ms" is matched before "m".
const UNITS: [(&str, u64); 7] = [
    ("y", MS_PER_YEAR),
    ("w", MS_PER_WEEK),
    ("d", MS_PER_DAY),
    ("h", MS_PER_HOUR),
    ("m", MS_PER_MINUTE),
    ("s", MS_PER_SECOND),
    ("ms", 1),
];

/// Parses a duration into milliseconds.
///
/// Each unit may appear at most once and units must run from largest to
/// smallest. A bare `0` is accepted.
pub fn parse(input: &str) -> Result<u64, Error> {
    if input.is_empty() {
        return EmptySnafu.fail();
    }
    if input == "0" {
        return Ok(0);
    }

    let invalid = || InvalidSnafu { input }.build();
    let overflow = || OverflowSnafu { input }.build();

    let mut rest = input;
    let mut next_unit = 0;
    let mut total: u64 = 0;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| overflow())?;
        rest = &rest[digits..];

        let (index, (unit, factor)) = UNITS
            .iter()
            .enumerate()
            .skip(next_unit)
            .filter(|(_, (unit, _))| rest.starts_with(unit))
            .filter(|(_, (unit, _))| {
                // "m" must not swallow the prefix of "ms"
                *unit != "m" || !rest.starts_with("ms")
            })
            .map(|(i, u)| (i, *u))
            .next()
            .ok_or_else(invalid)?;
        rest = &rest[unit.len()..];
        next_unit = index + 1;

        total = value
            .checked_mul(factor)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(overflow)?;
    }

    Ok(total)
}

/// Renders milliseconds using the largest units first.
///
/// Years and weeks are only used when they divide the value exactly, so
/// `90d` stays `90d` rather than becoming `12w6d`.
pub fn format(millis: u64) -> String {
    if millis == 0 {
        return "0s".to_string();
    }

    let mut rest = millis;
    let mut out = String::new();
    for (unit, factor) in UNITS {
        let exact_only = factor == MS_PER_YEAR || factor == MS_PER_WEEK;
        if exact_only && rest % factor != 0 {
            continue;
        }
        let value = rest / factor;
        if value > 0 {
            out.push_str(&format!("{value}{unit}"));
            rest -= value * factor;
        }
    }
    out
}

/// Converts fractional seconds, as reported by rule engines, to milliseconds.
pub fn from_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * MS_PER_SECOND as f64).round() as u64
    } else {
        0
    }
}
