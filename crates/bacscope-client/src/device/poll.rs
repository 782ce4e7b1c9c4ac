//! Periodic polling of a device's points.

use super::{DeviceCore, DeviceState};
use bacscope_datalink::DataLink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shortest period in fast mode.
pub const MIN_POLL_FAST: Duration = Duration::from_secs(1);
/// Shortest period in normal mode.
pub const MIN_POLL_NORMAL: Duration = Duration::from_secs(10);
/// Shortest period once a device only answers single reads.
pub const MIN_POLL_RP: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    #[default]
    Normal,
    Fast,
}

/// `requested`, raised to the minimum allowed for `state` and `mode`.
pub fn effective_poll_delay(state: DeviceState, mode: PollMode, requested: Duration) -> Duration {
    let floor = match (state, mode) {
        (DeviceState::ConnectedRp, _) => MIN_POLL_RP,
        (_, PollMode::Fast) => MIN_POLL_FAST,
        (_, PollMode::Normal) => MIN_POLL_NORMAL,
    };
    requested.max(floor)
}

/// A running periodic task, polling a device or matching a point. Stopping
/// (or dropping) it lets the task finish at its next boundary.
#[derive(Debug)]
pub(crate) struct TaskHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    requested: Duration,
}

impl TaskHandle {
    pub(crate) fn new(stop: watch::Sender<bool>, task: JoinHandle<()>, requested: Duration) -> Self {
        Self { stop, task, requested }
    }

    pub(crate) fn stop(self) {
        drop(self);
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub(crate) fn requested(&self) -> Duration {
        self.requested
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

pub(crate) fn spawn<D: DataLink + 'static>(core: &Arc<DeviceCore<D>>, requested: Duration) -> TaskHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let device = Arc::downgrade(core);
    let task = tokio::spawn(async move {
        let mut polls = 0u32;
        loop {
            let Some(core) = device.upgrade() else {
                break;
            };
            if *stop_rx.borrow() || !core.state().is_connected() {
                break;
            }

            let points = core.all_points();
            match core.read_present_values(&points, Some(&stop_rx)).await {
                Ok(updated) => {
                    polls += 1;
                    log::debug!("{}: poll {polls} updated {updated} points", core.label());
                    if let Some(every) = core.options.auto_save.filter(|n| *n > 0) {
                        if polls >= every {
                            polls = 0;
                            if let Err(e) = core.save(None).await {
                                log::warn!("{}: auto save failed: {e}", core.label());
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() => log::warn!("{}: poll failed: {e}", core.label()),
                Err(e) => {
                    log::error!("{}: polling stopped: {e}", core.label());
                    break;
                }
            }

            let wait = effective_poll_delay(core.state(), core.options.poll_mode, requested);
            drop(core);
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    });
    TaskHandle::new(stop, task, requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_depends_on_read_mode() {
        let asked = Duration::from_millis(500);
        assert_eq!(
            effective_poll_delay(DeviceState::ConnectedRpm, PollMode::Fast, asked),
            MIN_POLL_FAST
        );
        assert_eq!(
            effective_poll_delay(DeviceState::ConnectedRpm, PollMode::Normal, asked),
            MIN_POLL_NORMAL
        );
        assert_eq!(
            effective_poll_delay(DeviceState::ConnectedRp, PollMode::Fast, asked),
            MIN_POLL_RP
        );
        assert_eq!(
            effective_poll_delay(DeviceState::ConnectedRpm, PollMode::Normal, Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
