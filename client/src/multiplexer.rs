//! # Request/Response Multiplexer
//!
//! Turns typed requests into tagged envelopes and tagged inbound envelopes
//! back into typed [`Outcome`]s, over a single connection.
//!
//! Only one identify/verify request may be outstanding at a time. The
//! admission slot is taken when a request is sent and released by the first
//! of:
//! - an identification or verification response
//! - a throttled response that is not owed to a pending diagnostic
//! - a response of the right tag whose payload fails to decode
//! - the request timeout
//! - the connection dropping
//!
//! Submitting while the slot is taken sends nothing and returns
//! [`SubmitError::Busy`]. Diagnostics are refused the same way, so a pending
//! diagnostic always precedes the request in flight and the backend's
//! in-order replies to it (a diagnostic or a throttled frame) are matched to
//! it first.
//!
//! A request given up on by the timeout may still be answered. Such late
//! answers are counted per kind and discarded, never published as the
//! answer to a newer request.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use identicore_protocol::{
    DiagnosticResponse, Envelope, IdentificationResponse, IdentifyRequest, MessageTag,
    ProtocolError, Request, Response, ResponseKind, VerificationResponse, VerifyRequest,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{CloseReason, ConnectionHandle};
use crate::error::{Failure, SendError, SubmitError};

/// Where encoded frames go. Implemented by the live connection and by test
/// doubles.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), SendError>;
}

impl FrameSink for ConnectionHandle {
    fn send_frame(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.send(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Identify,
    Verify,
}

/// A value published to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Identification(IdentificationResponse),
    Verification(VerificationResponse),
    Diagnostic(DiagnosticResponse),

    /// The backend refused the request. Retrying later may succeed.
    Throttled { detail: Option<String> },

    /// The in-flight request ended without a usable response.
    Failed(Failure),
}

impl Outcome {
    /// The backend-reported failure text, for outcomes that carry one.
    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Outcome::Identification(resp) if !resp.ok => resp.detail.as_deref(),
            Outcome::Verification(resp) if !resp.ok => resp.detail.as_deref(),
            Outcome::Throttled { detail } => detail.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: Uuid,
    kind: RequestKind,
    sent_at: Instant,
}

/// Everything the backend still owes this client.
#[derive(Debug, Default)]
struct Admission {
    /// The admission slot.
    in_flight: Option<InFlight>,

    /// Diagnostics sent and not yet answered.
    pending_diagnostics: usize,

    /// Timed-out requests whose answers may still arrive.
    abandoned_identify: usize,
    abandoned_verify: usize,
}

impl Admission {
    fn abandoned(&mut self, kind: RequestKind) -> &mut usize {
        match kind {
            RequestKind::Identify => &mut self.abandoned_identify,
            RequestKind::Verify => &mut self.abandoned_verify,
        }
    }
}

/// Who an inbound response belongs to, decided before its payload is
/// decoded.
#[derive(Debug)]
enum Claim {
    /// Answers the request in the slot, if any.
    Answer(Option<InFlight>),

    /// Answers a request that already timed out.
    Late(RequestKind),

    /// Answers a pending diagnostic.
    Diagnostic,

    /// Pong.
    Nothing,
}

pub struct Multiplexer<S> {
    sink: S,

    /// Checked and updated under one lock.
    admission: Mutex<Admission>,

    outcomes: mpsc::UnboundedSender<Outcome>,

    last_pong: Mutex<Option<Instant>>,
}

impl<S: FrameSink> Multiplexer<S> {
    pub fn new(sink: S) -> (Self, mpsc::UnboundedReceiver<Outcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mux = Self {
            sink,
            admission: Mutex::new(Admission::default()),
            outcomes: tx,
            last_pong: Mutex::new(None),
        };
        (mux, rx)
    }

    // ─── Submission ─────────────────────────────────────────────

    /// Sends an identification request for one photo.
    pub fn submit_identify(&self, image: Option<Bytes>) -> Result<Uuid, SubmitError> {
        let image = present(image, "image")?;
        self.submit(
            RequestKind::Identify,
            Request::Identify(IdentifyRequest { image }),
        )
    }

    /// Sends a verification request for two photos.
    pub fn submit_verify(
        &self,
        first_image: Option<Bytes>,
        second_image: Option<Bytes>,
    ) -> Result<Uuid, SubmitError> {
        let first_image = present(first_image, "first_image")?;
        let second_image = present(second_image, "second_image")?;
        self.submit(
            RequestKind::Verify,
            Request::Verify(VerifyRequest {
                first_image,
                second_image,
            }),
        )
    }

    /// Asks the backend for its counters.
    ///
    /// Does not take the admission slot, but is refused with
    /// [`SubmitError::Busy`] while a request is in flight.
    pub fn submit_diagnostic(&self) -> Result<(), SubmitError> {
        let mut admission = self.admission();
        if let Some(current) = admission.in_flight.as_ref() {
            debug!("Ignoring diagnostic: request {} still queued", current.id);
            return Err(SubmitError::Busy);
        }
        self.sink.send_frame(Request::Diagnostic.to_frame()?)?;
        admission.pending_diagnostics += 1;
        Ok(())
    }

    fn submit(&self, kind: RequestKind, request: Request) -> Result<Uuid, SubmitError> {
        let mut admission = self.admission();
        if let Some(current) = admission.in_flight.as_ref() {
            debug!("Ignoring {:?} submit: request {} still queued", kind, current.id);
            return Err(SubmitError::Busy);
        }

        let frame = request.to_frame()?;
        let len = frame.len();
        self.sink.send_frame(frame)?;

        let id = Uuid::new_v4();
        admission.in_flight = Some(InFlight {
            id,
            kind,
            sent_at: Instant::now(),
        });
        info!("Queued {:?} request {} ({} bytes)", kind, id, len);
        Ok(id)
    }

    // ─── Inbound ────────────────────────────────────────────────

    /// Dispatches one inbound frame by its tag.
    ///
    /// Returns an error for every frame that was dropped. A response whose
    /// payload fails to decode still releases the admission slot and
    /// publishes [`Failure::Undecodable`].
    pub fn handle_frame(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let envelope = Envelope::parse(frame)?;
        let tag = MessageTag::try_from(envelope.tag)?;
        if tag.is_request() {
            return Err(ProtocolError::UnexpectedTag(envelope.tag));
        }

        let claim = self.claim(tag);
        let response = match Response::decode(tag, envelope.payload) {
            Ok(response) => response,
            Err(err) => {
                debug!(
                    "Undecodable {} payload looks like {:?}",
                    tag,
                    ResponseKind::detect(envelope.payload).ok()
                );
                if let Claim::Answer(Some(req)) = claim {
                    warn!("Response to {} could not be decoded: {}", req.id, err);
                    self.publish(Outcome::Failed(Failure::Undecodable {
                        reason: err.to_string(),
                    }));
                }
                return Err(err);
            }
        };

        if let Claim::Late(kind) = claim {
            info!("Discarding late {:?} response to a timed-out request", kind);
            return Ok(());
        }

        match response {
            Response::Pong => {
                let mut last_pong = self.last_pong.lock().unwrap_or_else(PoisonError::into_inner);
                *last_pong = Some(Instant::now());
            }
            Response::Identification(resp) => {
                log_answer(&claim, RequestKind::Identify);
                self.publish(Outcome::Identification(resp));
            }
            Response::Verification(resp) => {
                log_answer(&claim, RequestKind::Verify);
                self.publish(Outcome::Verification(resp));
            }
            Response::Throttled(status) => {
                match claim {
                    Claim::Answer(Some(req)) => warn!("Request {} throttled by backend", req.id),
                    Claim::Diagnostic => warn!("Diagnostic throttled by backend"),
                    _ => debug!("Throttled with nothing outstanding"),
                }
                self.publish(Outcome::Throttled {
                    detail: status.detail,
                });
            }
            Response::Diagnostic(diag) => {
                self.publish(Outcome::Diagnostic(diag));
            }
        }
        Ok(())
    }

    /// Settles the bookkeeping a response of `tag` is owed to.
    fn claim(&self, tag: MessageTag) -> Claim {
        let mut admission = self.admission();
        let kind = match tag {
            MessageTag::IdentifyResponse => RequestKind::Identify,
            MessageTag::VerificationResponse => RequestKind::Verify,
            MessageTag::Throttled if admission.pending_diagnostics > 0 => {
                admission.pending_diagnostics -= 1;
                return Claim::Diagnostic;
            }
            MessageTag::Throttled => return Claim::Answer(admission.in_flight.take()),
            MessageTag::DiagnosticResponse => {
                admission.pending_diagnostics = admission.pending_diagnostics.saturating_sub(1);
                return Claim::Diagnostic;
            }
            _ => return Claim::Nothing,
        };

        let abandoned = admission.abandoned(kind);
        if *abandoned > 0 {
            *abandoned -= 1;
            return Claim::Late(kind);
        }
        Claim::Answer(admission.in_flight.take())
    }

    /// Fails the in-flight request if it has waited longer than `timeout`.
    ///
    /// Returns true when a request was expired.
    pub fn expire_stale(&self, now: Instant, timeout: Duration) -> bool {
        let mut admission = self.admission();
        let stale = admission
            .in_flight
            .as_ref()
            .is_some_and(|req| now.saturating_duration_since(req.sent_at) >= timeout);
        if !stale {
            return false;
        }
        if let Some(req) = admission.in_flight.take() {
            warn!("Request {} timed out after {:?}", req.id, timeout);
            *admission.abandoned(req.kind) += 1;
        }
        drop(admission);
        self.publish(Outcome::Failed(Failure::TimedOut));
        true
    }

    /// The transport went away; nothing sent on it can be answered anymore.
    ///
    /// The connection discards frames it had not written yet, so every debt
    /// the backend owed this client is void.
    pub fn connection_dropped(&self, reason: &CloseReason) {
        let lost = {
            let mut admission = self.admission();
            let lost = admission.in_flight.take();
            *admission = Admission::default();
            lost
        };
        if let Some(req) = lost {
            warn!("Request {} lost: connection {}", req.id, reason);
            self.publish(Outcome::Failed(Failure::RequestLost));
        }
    }

    // ─── State ──────────────────────────────────────────────────

    /// Whether a request is waiting for its response.
    pub fn is_queued(&self) -> bool {
        self.admission().in_flight.is_some()
    }

    pub fn queued_kind(&self) -> Option<RequestKind> {
        self.admission().in_flight.as_ref().map(|req| req.kind)
    }

    /// When the last pong arrived.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admission(&self) -> MutexGuard<'_, Admission> {
        self.admission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, outcome: Outcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Outcome dropped: no subscriber");
        }
    }
}

fn log_answer(claim: &Claim, answered: RequestKind) {
    match claim {
        Claim::Answer(Some(req)) if req.kind != answered => {
            warn!("Request {} was {:?} but got a {:?} response", req.id, req.kind, answered);
        }
        Claim::Answer(Some(req)) => {
            info!("Request {} answered after {:?}", req.id, req.sent_at.elapsed());
        }
        _ => debug!("Unsolicited {:?} response", answered),
    }
}

fn present(image: Option<Bytes>, field: &'static str) -> Result<Bytes, SubmitError> {
    match image {
        Some(bytes) if !bytes.is_empty() => Ok(bytes),
        _ => Err(SubmitError::MissingImage(field)),
    }
}
