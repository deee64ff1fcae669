//! # Job Worker
//!
//! Recognition requests are queued and run one at a time. Each job runs on
//! the blocking pool under a timeout; its result is packed under the
//! request's response tag and pushed to the client that asked for it.
//!
//! A job that overruns its timeout is answered with "Timed out" and the
//! worker moves on; the blocking thread finishes in the background and its
//! result is discarded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use identicore_protocol::{IdentificationResponse, Response, VerificationResponse};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::recognizer::{DetectionMode, ImageSlot, RecognitionError, Recognizer};
use crate::state::ClientTx;

pub const NO_FACES: &str = "No faces were found";
pub const TIMED_OUT: &str = "Timed out";
pub const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Identify {
        image: Bytes,
    },
    Verify {
        first_image: Bytes,
        second_image: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Identify,
    Verify,
}

impl JobKind {
    /// Failure answer for this kind of job.
    pub fn failed(self, detail: impl Into<String>) -> Response {
        match self {
            JobKind::Identify => Response::Identification(IdentificationResponse::failed(detail)),
            JobKind::Verify => Response::Verification(VerificationResponse::failed(detail)),
        }
    }
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Identify { .. } => JobKind::Identify,
            Job::Verify { .. } => JobKind::Verify,
        }
    }
}

#[derive(Debug)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Job,

    /// Outbound queue of the requesting connection.
    pub reply: ClientTx,
}

// ─── Queue ──────────────────────────────────────────────────────

/// Sending half of the job queue, shared by every connection.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    len: Arc<AtomicUsize>,
}

impl JobQueue {
    /// Enqueues a job. Returns false if the worker has stopped.
    pub fn push(&self, job: QueuedJob) -> bool {
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Jobs waiting to start. The running job is not counted.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Starts the serial worker. It stops once every [`JobQueue`] clone is gone.
pub fn spawn_worker(
    recognizer: Arc<dyn Recognizer>,
    job_timeout: Duration,
) -> (JobQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let len = Arc::new(AtomicUsize::new(0));
    let queue = JobQueue {
        tx,
        len: len.clone(),
    };
    let handle = tokio::spawn(run_worker(rx, len, recognizer, job_timeout));
    (queue, handle)
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    len: Arc<AtomicUsize>,
    recognizer: Arc<dyn Recognizer>,
    job_timeout: Duration,
) {
    while let Some(QueuedJob { id, job, reply }) = rx.recv().await {
        len.fetch_sub(1, Ordering::SeqCst);
        debug!("Job {} started ({:?})", id, job.kind());

        let response = execute(&recognizer, job, job_timeout).await;
        let frame = match response.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Job {}: failed to encode response: {}", id, e);
                continue;
            }
        };

        let size = frame.len();
        if reply.send(frame).is_err() {
            debug!("Job {}: client disconnected before the result", id);
        } else {
            info!("Job {} done, sent {} bytes", id, size);
        }
    }
    debug!("Job worker stopped");
}

/// Runs one job on the blocking pool, bounded by `job_timeout`.
pub async fn execute(
    recognizer: &Arc<dyn Recognizer>,
    job: Job,
    job_timeout: Duration,
) -> Response {
    let kind = job.kind();
    let recognizer = recognizer.clone();
    let task = tokio::task::spawn_blocking(move || run_job(recognizer.as_ref(), &job));

    match tokio::time::timeout(job_timeout, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!("Recognition job crashed: {}", e);
            kind.failed(INTERNAL_ERROR)
        }
        Err(_) => {
            warn!("Recognition job timed out after {:?}", job_timeout);
            kind.failed(TIMED_OUT)
        }
    }
}

// ─── Job semantics ──────────────────────────────────────────────

/// Turns a job into the response the client receives.
pub fn run_job(recognizer: &dyn Recognizer, job: &Job) -> Response {
    match job {
        Job::Identify { image } => Response::Identification(
            identify(recognizer, image).unwrap_or_else(IdentificationResponse::failed),
        ),
        Job::Verify {
            first_image,
            second_image,
        } => Response::Verification(
            verify(recognizer, first_image, second_image)
                .unwrap_or_else(VerificationResponse::failed),
        ),
    }
}

fn identify(recognizer: &dyn Recognizer, image: &[u8]) -> Result<IdentificationResponse, String> {
    let faces = recognizer
        .detect(image, DetectionMode::Identification)
        .map_err(|e| describe(e, ImageSlot::First))?;

    if faces.is_empty() {
        return Err(NO_FACES.to_string());
    }
    Ok(IdentificationResponse::found(faces))
}

fn verify(
    recognizer: &dyn Recognizer,
    first_image: &[u8],
    second_image: &[u8],
) -> Result<VerificationResponse, String> {
    let first_faces = recognizer
        .detect(first_image, DetectionMode::Verification)
        .map_err(|e| describe(e, ImageSlot::First))?;
    let Some(first_face) = first_faces.first() else {
        return Err(format!("{NO_FACES} on first image"));
    };

    let second_faces = recognizer
        .detect(second_image, DetectionMode::Verification)
        .map_err(|e| describe(e, ImageSlot::Second))?;
    let Some(second_face) = second_faces.first() else {
        return Err(format!("{NO_FACES} on second image"));
    };

    let comparison = recognizer
        .compare((first_image, first_face), (second_image, second_face))
        .map_err(|e| describe(e, ImageSlot::First))?;

    let faces = first_faces
        .iter()
        .chain(second_faces.iter())
        .copied()
        .collect();
    Ok(VerificationResponse::compared(
        comparison.is_match,
        comparison.similarity_confidence.clamp(0.0, 1.0),
        faces,
    ))
}

/// Client-facing detail for a recognizer error on `slot`.
fn describe(err: RecognitionError, slot: ImageSlot) -> String {
    match err {
        RecognitionError::MultipleFaces(count) => format!(
            "Unable to compare faces due multiple faces detected on {slot} image: {count}"
        ),
        RecognitionError::FeaturesExtraction(failed) => format!(
            "Unable to compare faces due features extraction failed on {failed} image"
        ),
        RecognitionError::UnreadableImage => {
            warn!("Unreadable {} image", slot);
            INTERNAL_ERROR.to_string()
        }
    }
}
