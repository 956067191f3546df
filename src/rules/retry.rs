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


//! Backoff for retrying writes that lost an optimistic-concurrency race.

use std::time::Duration;

/// Attempts made before a conflict is reported to the caller.
const DEFAULT_STEPS: usize = 5;

/// Pause between attempts.
const DEFAULT_INTERVAL_MILLIS: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryConfig {
    pub steps: usize,
    pub interval: Duration,
    /// Growth factor applied to the interval after each attempt.
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MILLIS),
            factor: 1.0,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ConflictBackoff {
        ConflictBackoff {
            remaining: self.steps.saturating_sub(1),
            current_interval: self.interval,
            factor: self.factor,
        }
    }
}

/// Hands out the delays between attempts; `None` once attempts run out.
#[derive(Debug)]
pub struct ConflictBackoff {
    remaining: usize,
    current_interval: Duration,
    factor: f64,
}

impl ConflictBackoff {
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let interval = self.current_interval;
        self.current_interval = interval.mul_f64(self.factor.max(1.0));
        Some(interval)
    }
}
