//! C1: Source Adapters.
//!
//! Each adapter owns one upstream contract (subsampling, bounding-box
//! subsetting, at-source confidence filtering) and never lets a transport
//! failure propagate: a timed-out or erroring fetch logs and returns an
//! empty batch, so the orchestrator always has *something* to upsert, even
//! if it's nothing. One adapter type per named upstream source, each
//! implementing the same `SourceAdapter` trait so the orchestrator can fan
//! out over them uniformly.

pub mod fire;
pub mod gridded;
pub mod ground;
pub mod pblh;
pub mod reanalysis;
pub mod satellite;

use std::sync::Mutex;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::model::{FireDetection, GriddedWeather, GroundAirQuality, Pblh, ReanalysisMet, SatelliteColumn};

/// Shared sliding-window token bucket. One instance is handed to every
/// adapter task so the aggregate request rate across all of them, not just
/// per-adapter, stays under the configured ceiling.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        let capacity = per_minute as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new((capacity, Instant::now())),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let (tokens, last) = *state;
                let elapsed = last.elapsed().as_secs_f64();
                let refilled = (tokens + elapsed * self.refill_per_sec).min(self.capacity);
                if refilled >= 1.0 {
                    *state = (refilled - 1.0, Instant::now());
                    None
                } else {
                    *state = (refilled, Instant::now());
                    Some(StdDuration::from_secs_f64((1.0 - refilled) / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

pub enum CollectedBatch {
    Ground(Vec<GroundAirQuality>),
    Satellite(Vec<SatelliteColumn>),
    Reanalysis(Vec<ReanalysisMet>),
    Pblh(Vec<Pblh>),
    Fire(Vec<FireDetection>),
    Gridded(Vec<GriddedWeather>),
}

impl CollectedBatch {
    pub fn len(&self) -> usize {
        match self {
            Self::Ground(v) => v.len(),
            Self::Satellite(v) => v.len(),
            Self::Reanalysis(v) => v.len(),
            Self::Pblh(v) => v.len(),
            Self::Fire(v) => v.len(),
            Self::Gridded(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limiter: &RateLimiter,
    ) -> CollectedBatch;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_does_not_block_within_capacity() {
        let limiter = RateLimiter::new(60);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < StdDuration::from_millis(200));
    }
}
