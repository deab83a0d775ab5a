//! Animated status updates.
//!
//! A reporter is a ticking task bound to one stage window of one item (or to the
//! "preparing" window of a job). It re-renders the status text on every tick until it
//! is stopped, its scope is cancelled, or the status target disappears.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::traits::{Activity, StatusContext, StatusError, StatusSurface};

const ANIMATION: [&str; 3] = [".", "..", "..."];

/// Timing of reporter loops.
#[derive(Debug, Clone, Copy)]
pub struct ReporterConfig {
    pub tick_interval: Duration,
    /// Ticks after which a template with a slow variant switches to it.
    pub slow_threshold: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            slow_threshold: 15,
        }
    }
}

/// What a reporter renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTemplate {
    /// First line, usually the requested URL.
    pub header: String,
    pub label: String,
    /// Extra lines after the animated label, e.g. `(2/5) Title`.
    pub suffix: Option<String>,
    pub slow_label: Option<String>,
    pub activity: Activity,
}

impl StatusTemplate {
    pub fn new(header: impl Into<String>, label: impl Into<String>, activity: Activity) -> Self {
        Self {
            header: header.into(),
            label: label.into(),
            suffix: None,
            slow_label: None,
            activity,
        }
    }

    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn with_slow_label(mut self, slow_label: impl Into<String>) -> Self {
        self.slow_label = Some(slow_label.into());
        self
    }

    /// Text shown at `tick`.
    pub fn render(&self, tick: u64, slow_threshold: u64) -> String {
        let mut text = String::new();
        if !self.header.is_empty() {
            text.push_str(&self.header);
            text.push('\n');
        }

        match &self.slow_label {
            Some(slow) if tick >= slow_threshold => {
                text.push_str(&format!("{slow} [{tick}s]\n/cancel to abort"));
            }
            _ => {
                let dots = ANIMATION[(tick % ANIMATION.len() as u64) as usize];
                text.push_str(&format!("{}{} [{}s]", self.label, dots, tick));
            }
        }

        if let Some(suffix) = &self.suffix {
            text.push('\n');
            text.push_str(suffix);
        }
        text
    }
}

/// Why a reporter loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterExit {
    /// Stopped explicitly or through its scope.
    Stopped,
    /// The status surface reported the target gone.
    TargetGone,
    /// The loop task did not finish normally.
    Aborted,
}

/// Spawns reporter loops against a status surface.
#[derive(Clone)]
pub struct ProgressReporter {
    status: Arc<dyn StatusSurface>,
    config: ReporterConfig,
}

impl ProgressReporter {
    pub fn new(status: Arc<dyn StatusSurface>, config: ReporterConfig) -> Self {
        Self { status, config }
    }

    pub fn config(&self) -> ReporterConfig {
        self.config
    }

    /// Start ticking on `ctx`. The loop observes a child of `scope`.
    pub fn start(
        &self,
        ctx: StatusContext,
        template: StatusTemplate,
        scope: &CancellationToken,
    ) -> ReporterHandle {
        let token = scope.child_token();
        let ticks = Arc::new(AtomicU64::new(0));
        let join = tokio::spawn(run_loop(
            self.status.clone(),
            ctx,
            template,
            self.config,
            token.clone(),
            ticks.clone(),
        ));

        ReporterHandle {
            id: uuid::Uuid::new_v4().to_string(),
            token,
            ticks,
            join: Some(join),
        }
    }
}

async fn run_loop(
    status: Arc<dyn StatusSurface>,
    ctx: StatusContext,
    template: StatusTemplate,
    config: ReporterConfig,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
) -> ReporterExit {
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return ReporterExit::Stopped,
            _ = interval.tick() => {}
        }

        let text = template.render(tick, config.slow_threshold);
        let emitted = tokio::select! {
            biased;
            _ = token.cancelled() => return ReporterExit::Stopped,
            res = status.emit_status(&ctx, &text, template.activity) => res,
        };

        match emitted {
            Ok(()) => {}
            Err(StatusError::Gone) => {
                debug!(handle = %ctx.handle, "Status target gone, stopping reporter");
                return ReporterExit::TargetGone;
            }
            Err(StatusError::Transport(e)) => {
                debug!(handle = %ctx.handle, "Status update failed: {}", e);
            }
        }

        tick += 1;
        ticks.store(tick, Ordering::SeqCst);
    }
}

/// Live reporter loop. Dropping the handle cancels the loop without waiting.
#[derive(Debug)]
pub struct ReporterHandle {
    id: String,
    token: CancellationToken,
    ticks: Arc<AtomicU64>,
    join: Option<JoinHandle<ReporterExit>>,
}

impl ReporterHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token of the loop, for bulk cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Completed ticks so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Stop the loop and wait until it has exited.
    pub async fn stop(mut self) -> ReporterExit {
        self.token.cancel();
        match self.join.take() {
            Some(join) => join.await.unwrap_or(ReporterExit::Aborted),
            None => ReporterExit::Stopped,
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
