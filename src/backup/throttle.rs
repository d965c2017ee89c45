use super::MIN_MEMORY_POLL_INTERVAL;
use crate::utils::resource_monitor::MemoryProbe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Holds new copy work back while process memory is above a ceiling.
///
/// Coarse and process-global: any task sampling above the ceiling waits,
/// regardless of how much of the usage it is responsible for. Callers must
/// not hold open file handles while waiting.
#[derive(Clone)]
pub struct MemoryThrottle {
    ceiling: Option<u64>,
    probe: Arc<dyn MemoryProbe>,
    poll_interval: Duration,
    debug: bool,
}

impl MemoryThrottle {
    pub fn new(ceiling: Option<u64>, probe: Arc<dyn MemoryProbe>, poll_interval: Duration) -> Self {
        Self {
            ceiling,
            probe,
            poll_interval: poll_interval.max(MIN_MEMORY_POLL_INTERVAL),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn is_active(&self) -> bool {
        self.ceiling.is_some()
    }

    /// Wait until a sample comes in under the ceiling.
    ///
    /// Returns the number of intervals spent waiting. An unbounded throttle
    /// returns immediately without sampling. If memory cannot be sampled the
    /// task is let through.
    pub async fn wait_for_headroom(&self) -> u32 {
        let Some(ceiling) = self.ceiling else {
            return 0;
        };

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut waited = 0u32;

        loop {
            // First tick completes immediately.
            ticker.tick().await;

            match self.probe.used_bytes() {
                Some(used) if used < ceiling => return waited,
                Some(used) => {
                    if self.debug {
                        debug!(
                            used_bytes = used,
                            ceiling_bytes = ceiling,
                            "Memory above limit, waiting..."
                        );
                    }
                    waited = waited.saturating_add(1);
                }
                None => {
                    warn!("Unable to sample process memory, proceeding without throttle");
                    return waited;
                }
            }
        }
    }
}
