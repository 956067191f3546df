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

use crate::operator::Operator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub operator: Arc<Operator>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(operator: Arc<Operator>) -> Self {
        Self {
            operator,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flipped once the watched resources have been listed.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Turns ready once the operator's watch-fed caches have synced.
    pub async fn ready_when_synced(&self) {
        self.operator.wait_until_synced().await;
        self.set_ready();
    }
}
