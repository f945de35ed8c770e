//! # Sync Scheduler
//!
//! Periodic delta cycles plus on-demand full and delta cycles, all funnelled
//! through one [`CycleExecutor`].
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  timer tick (every N s)  ──► try_submit(Delta)   rejected -> warn, drop │
//! │  on_connection_ready()   ──► try_submit(Delta)   fire and forget        │
//! │  sync_all_now()          ──► try_submit(Full)    awaited                │
//! │                                                                         │
//! │  SyncCycle::run_cycle(kind)                                             │
//! │      1. CloudDeviceMapper::diff                                         │
//! │      2. HistorySyncer::sync_all(delta = kind == Delta)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Period
//! Loaded once from `{integration}.integration.scheduled_data_fetch` on the
//! first `start()`; afterwards changed only through `apply_settings()`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{load_settings, ScheduledFetchSettings};
use crate::device_mapper::CloudDeviceMapper;
use crate::error::SyncResult;
use crate::executor::{CycleExecutor, CycleKind, CycleRunner};
use crate::history::HistorySyncer;
use crate::ports::ValueStore;

// =============================================================================
// Sync Cycle
// =============================================================================

/// Device diff followed by a history pull.
pub struct SyncCycle {
    mapper: CloudDeviceMapper,
    history: Arc<HistorySyncer>,
}

impl SyncCycle {
    pub fn new(mapper: CloudDeviceMapper, history: Arc<HistorySyncer>) -> Self {
        SyncCycle { mapper, history }
    }
}

#[async_trait]
impl CycleRunner for SyncCycle {
    async fn run_cycle(&self, kind: CycleKind) {
        info!(?kind, "Sync cycle started");

        match self.mapper.diff().await {
            Ok(report) if report.aborted => warn!(?report, "Device diff aborted"),
            Ok(report) => debug!(dispatched = report.dispatched(), "Device diff finished"),
            Err(e) => error!(?e, "Device diff failed"),
        }

        if let Err(e) = self.history.sync_all(kind == CycleKind::Delta).await {
            error!(?e, "History sync failed");
        }

        info!(?kind, "Sync cycle finished");
    }
}

// =============================================================================
// Scheduler
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Unset,
    Disabled,
    Every(u64),
}

impl From<&ScheduledFetchSettings> for Period {
    fn from(settings: &ScheduledFetchSettings) -> Self {
        settings
            .effective_period()
            .map_or(Period::Disabled, Period::Every)
    }
}

struct SchedulerState {
    period: Period,
    timer: Option<JoinHandle<()>>,
}

pub struct SyncScheduler {
    settings_key: String,
    values: Arc<dyn ValueStore>,
    executor: CycleExecutor,
    state: Mutex<SchedulerState>,
}

impl SyncScheduler {
    /// `settings_key` is the prefix of the persisted fetch settings.
    pub fn new(
        settings_key: impl Into<String>,
        values: Arc<dyn ValueStore>,
        executor: CycleExecutor,
    ) -> Self {
        SyncScheduler {
            settings_key: settings_key.into(),
            values,
            executor,
            state: Mutex::new(SchedulerState {
                period: Period::Unset,
                timer: None,
            }),
        }
    }

    /// Arms the timer; a no-op while armed.
    pub async fn start(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        if state.timer.is_some() {
            return Ok(());
        }

        if state.period == Period::Unset {
            let settings: Option<ScheduledFetchSettings> =
                load_settings(self.values.as_ref(), &self.settings_key).await?;
            state.period = settings.as_ref().map_or(Period::Disabled, Period::from);
            debug!(period = ?state.period, "Scheduled fetch settings loaded");
        }

        match state.period {
            Period::Every(secs) => {
                state.timer = Some(self.arm(secs));
                info!(period_secs = secs, "Scheduled data fetch armed");
            }
            _ => info!("Scheduled data fetch disabled"),
        }
        Ok(())
    }

    /// Disarms the timer; a no-op while disarmed.
    pub async fn stop(&self) {
        if let Some(timer) = self.state.lock().await.timer.take() {
            timer.abort();
            info!("Scheduled data fetch stopped");
        }
    }

    pub async fn restart(&self) -> SyncResult<()> {
        self.stop().await;
        self.start().await
    }

    /// Adopts new fetch settings and re-arms accordingly.
    pub async fn apply_settings(&self, settings: &ScheduledFetchSettings) -> SyncResult<()> {
        self.state.lock().await.period = Period::from(settings);
        self.restart().await
    }

    pub async fn is_armed(&self) -> bool {
        self.state.lock().await.timer.is_some()
    }

    /// Runs a full cycle and waits for it.
    pub async fn sync_all_now(&self) -> SyncResult<()> {
        let finished = self.executor.try_submit(CycleKind::Full)?;
        finished.await?;
        Ok(())
    }

    /// Triggers one delta cycle without waiting.
    pub fn on_connection_ready(&self) {
        if let Err(e) = self.executor.try_submit(CycleKind::Delta) {
            warn!(?e, "Sync cycle on connection ready rejected");
        }
    }

    /// Fixed rate, first tick one period from now.
    fn arm(&self, secs: u64) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let period = Duration::from_secs(secs);

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = executor.try_submit(CycleKind::Delta) {
                    warn!(?e, "Scheduled sync cycle rejected");
                }
            }
        })
    }
}
