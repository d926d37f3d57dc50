//! Background reflection task
//!
//! Runs [`Pipeline::reflect`] on a fixed interval, independent of whatever
//! serves operator decisions, until the shutdown channel flips to `true`.

use crate::pipeline::{Pipeline, ReflectionOutcome};
use mend_sandbox::SandboxRunner;
use mend_vcs::VcsExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub fn spawn_reflection_task<R, E>(
    pipeline: Arc<Pipeline<R, E>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: SandboxRunner + 'static,
    E: VcsExecutor + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Reflection task started (every {:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match pipeline.reflect().await {
                        ReflectionOutcome::Published(proposal) => {
                            info!("Reflection published {}: {}", proposal.id, proposal.query.text);
                        }
                        ReflectionOutcome::Terminal => {
                            info!("All phases complete, reflection task stopping");
                            break;
                        }
                        outcome => debug!("Reflection pass: {:?}", outcome),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reflection task received shutdown");
                        break;
                    }
                }
            }
        }
    })
}
