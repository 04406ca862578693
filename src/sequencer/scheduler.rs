// Loop scheduler - Periodic driver for the global loop tick
// One dedicated thread, deadline based, controlled over a crossbeam channel

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("Loop period must be greater than zero")]
    ZeroPeriod,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(String),
}

/// Receiver of the periodic loop tick
pub trait TickTarget: Send + Sync {
    fn on_tick(&self);
}

enum Control {
    SetPeriod(Duration),
    Stop,
}

struct Running {
    control: Sender<Control>,
    handle: JoinHandle<()>,
}

/// Periodic timer invoking a [`TickTarget`] once per loop period
///
/// Missed deadlines are never replayed: when a tick overruns, the next one is
/// scheduled one period after it finished.
pub struct LoopScheduler {
    period: Duration,
    ticks: Arc<AtomicU64>,
    running: Option<Running>,
}

impl LoopScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ticks: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Ticks delivered since the scheduler was created
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Start ticking `target` every `period`
    pub fn start(
        &mut self,
        period: Duration,
        target: Arc<dyn TickTarget>,
    ) -> Result<(), SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        if self.running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.period = period;
        let (control, receiver) = unbounded();
        let ticks = Arc::clone(&self.ticks);

        let handle = thread::Builder::new()
            .name("loop-scheduler".to_string())
            .spawn(move || {
                let mut period = period;
                let mut last = Instant::now();
                let mut deadline = last + period;

                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(wait) {
                        Ok(Control::SetPeriod(new_period)) => {
                            period = new_period;
                            deadline = last + period;
                        }
                        Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            last = Instant::now();
                            target.on_tick();
                            ticks.fetch_add(1, Ordering::AcqRel);

                            deadline += period;
                            let now = Instant::now();
                            if deadline < now {
                                log::debug!("Loop tick overran by {:?}", now - deadline);
                                last = now;
                                deadline = now + period;
                            }
                        }
                    }
                }
                log::debug!("Loop scheduler stopped");
            })
            .map_err(|err| SchedulerError::Spawn(err.to_string()))?;

        log::info!("Loop scheduler started, period {:?}", period);
        self.running = Some(Running { control, handle });
        Ok(())
    }

    /// Change the period, effective from the next firing
    ///
    /// The next deadline becomes the last firing plus the new period; if that
    /// is already past the tick fires immediately.
    pub fn set_period(&mut self, period: Duration) -> Result<(), SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        self.period = period;
        if let Some(running) = &self.running {
            let _ = running.control.send(Control::SetPeriod(period));
        }
        Ok(())
    }

    /// Cancel the timer and wait for an in-progress tick to finish
    ///
    /// Safe to call repeatedly and before `start`. When called from inside a
    /// tick the thread is told to exit but not joined.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.control.send(Control::Stop);
        if running.handle.thread().id() == thread::current().id() {
            return;
        }
        if running.handle.join().is_err() {
            log::error!("Loop scheduler thread panicked");
        }
    }
}

impl Drop for LoopScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
