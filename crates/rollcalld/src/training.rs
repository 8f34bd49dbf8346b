//! Isolated training worker and its status listener.
//!
//! The trainer runs on its own OS thread and only talks back through a
//! one-directional channel. A panic inside training is caught and reported
//! as a failed run.

use crate::engine::{StatusTx, TrainingState};
use rollcall_core::{trainer, Detector, SampleStore, TrainerOptions, TrainingSummary};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum TrainingEvent {
    Progress(String),
    Finished(Result<TrainingSummary, String>),
}

pub(crate) fn spawn_worker(
    dataset: SampleStore,
    output: PathBuf,
    detector: Option<Arc<dyn Detector>>,
    options: TrainerOptions,
    events: mpsc::UnboundedSender<TrainingEvent>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("rollcall-train".into())
        .spawn(move || {
            let progress = events.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                trainer::train(&dataset, &output, detector.as_deref(), options, |msg| {
                    let _ = progress.send(TrainingEvent::Progress(msg.to_string()));
                })
            }));
            let outcome = match result {
                Ok(Ok(summary)) => Ok(summary),
                Ok(Err(e)) => Err(e.to_string()),
                Err(payload) => Err(format!("training crashed: {}", panic_message(&*payload))),
            };
            let _ = events.send(TrainingEvent::Finished(outcome));
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Drain training events into the published status until the run finishes.
pub(crate) async fn listen(
    mut events: mpsc::UnboundedReceiver<TrainingEvent>,
    status: StatusTx,
    active: Arc<AtomicBool>,
) {
    let mut terminal = None;
    while let Some(event) = events.recv().await {
        match event {
            TrainingEvent::Progress(message) => {
                tracing::info!(%message, "training progress");
                status.send_modify(|s| s.training = TrainingState::Running { message });
            }
            TrainingEvent::Finished(Ok(summary)) => {
                let message = summary.message();
                tracing::info!(subjects = summary.subjects, faces = summary.faces, "{message}");
                terminal = Some(TrainingState::Succeeded { message, summary });
                break;
            }
            TrainingEvent::Finished(Err(message)) => {
                tracing::error!(error = %message, "training failed");
                terminal = Some(TrainingState::Failed { message });
                break;
            }
        }
    }

    let terminal = terminal.unwrap_or_else(|| TrainingState::Failed {
        message: "training worker exited without a result".into(),
    });
    active.store(false, Ordering::SeqCst);
    status.send_modify(|s| s.training = terminal);
}
