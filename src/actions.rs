//! Runs diagram requests against the service and boils every failure down to one message.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use crate::{cmd::Cmd, datauri::DataUri, service::DiagramService};

const UNKNOWN_ERROR: &str = "An unknown error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Enhance,
    Generate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Enhance(DataUri),
    Generate(String),
}

impl JobKind {
    fn failure(self, error: impl std::fmt::Display) -> String {
        let doing = match self {
            JobKind::Enhance => "enhancing",
            JobKind::Generate => "generating",
        };
        format!("An error occurred while {doing} the diagram: {error}")
    }
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Enhance(_) => JobKind::Enhance,
            Job::Generate(_) => JobKind::Generate,
        }
    }
}

pub fn handle_enhance(service: &dyn DiagramService, diagram: &DataUri) -> Result<DataUri, String> {
    if diagram.is_empty() {
        return Err("No diagram data provided.".into());
    }
    match service.enhance(diagram) {
        Ok(Some(image)) if !image.is_empty() => Ok(image),
        Ok(_) => Err("Failed to enhance diagram. The AI model did not return an image.".into()),
        Err(e) => {
            log::error!("enhancement request failed: {e}");
            Err(JobKind::Enhance.failure(e))
        }
    }
}

pub fn handle_generate(service: &dyn DiagramService, prompt: &str) -> Result<DataUri, String> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err("No prompt provided.".into());
    }
    match service.generate(prompt) {
        Ok(Some(image)) if !image.is_empty() => Ok(image),
        Ok(_) => Err("Failed to generate diagram. The AI model did not return an image.".into()),
        Err(e) => {
            log::error!("generation request failed: {e}");
            Err(JobKind::Generate.failure(e))
        }
    }
}

pub fn run(service: &dyn DiagramService, job: &Job) -> Result<DataUri, String> {
    match job {
        Job::Enhance(diagram) => handle_enhance(service, diagram),
        Job::Generate(prompt) => handle_generate(service, prompt),
    }
}

/// Runs `job` on its own thread and reports the outcome through `send_cmd`.
pub fn spawn(
    job: Job,
    service: Arc<dyn DiagramService>,
    send_cmd: impl FnOnce(Cmd) + Send + 'static,
) {
    let kind = job.kind();
    log::info!("starting {kind:?} request");
    thread::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| run(&*service, &job)))
            .unwrap_or_else(|_panic| {
                // Panic message and backtrace are printed by the default panic hook.
                log::error!("{kind:?} worker panicked");
                Err(kind.failure(UNKNOWN_ERROR))
            });
        match &result {
            Ok(image) => log::info!("{kind:?} request finished: {image:?}"),
            Err(e) => log::warn!("{kind:?} request failed: {e}"),
        }
        send_cmd(Cmd::JobDone { job: kind, result });
    });
}
