use std::path::Path;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::controller::{Controller, JobEvent, JobView, Launcher};
use crate::error::JobError;

/// Drive the job of `work_dir` until its worker is done.
///
/// Every `every` the controller reconciles the status file and `observe` is
/// called with the refreshed view. When `shutdown` resolves, a stop is
/// requested and the loop keeps polling until the worker honors it. A stop
/// request that fails is retried on the following ticks.
pub async fn watch_job<L, F, S>(
    controller: &mut Controller<L>,
    work_dir: &Path,
    every: Duration,
    shutdown: S,
    mut observe: F,
) -> Result<JobView, JobError>
where
    L: Launcher,
    F: FnMut(&JobView),
    S: Future<Output = ()>,
{
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    let mut interrupted = false;
    let mut stop_sent = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if interrupted && !stop_sent {
                    stop_sent = try_stop(controller, work_dir);
                }
                for event in controller.tick() {
                    match event {
                        JobEvent::Finished { work_dir, terminal } => {
                            debug!("{} reported {terminal}", work_dir.display())
                        }
                        JobEvent::WorkerLost { work_dir } => {
                            warn!("lost the worker of {}", work_dir.display())
                        }
                    }
                }
                let Some(view) = controller.job(work_dir) else {
                    return Err(JobError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no job registered for {}", work_dir.display()),
                    )));
                };
                observe(&view);
                if !view.writing {
                    return Ok(view);
                }
            }
            _ = &mut shutdown, if !interrupted => {
                interrupted = true;
                info!("interrupted, asking the worker to stop");
                stop_sent = try_stop(controller, work_dir);
            }
        }
    }
}

fn try_stop<L: Launcher>(controller: &mut Controller<L>, work_dir: &Path) -> bool {
    match controller.stop_job(work_dir) {
        Ok(_) => true,
        Err(e) => {
            warn!("Failed to request a stop in {}: {e}, retrying", work_dir.display());
            false
        }
    }
}
