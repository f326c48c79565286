//! Pending HTTP requests awaiting a reply from the controller.
//!
//! The controller registers URL patterns with `LISTEN` and receives a handle
//! (the slot index). When an HTTP request matches a pattern, the worker that
//! accepted it parks the connection in the slot and returns. The controller
//! later reads arguments with `ARG` and answers with `REPLY`, which streams
//! the response to the parked connection and frees the slot for the next
//! request.
//!
//! ```text
//!  HTTP worker                 Registry                   serial task
//!  ───────────                 ────────                   ───────────
//!  match_and_bind ──────────►  slot[h] active  ── G:h,0 ──► controller
//!                                   ▲                         │ ARG / REPLY
//!                                   └──── take_responder ◄────┘
//!                                         release
//! ```
//!
//! The whole table sits behind one mutex; both execution contexts go through
//! it for every operation.

pub mod args;

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use crate::http::request::{Method, Request};
use crate::protocol::{ErrorCode, NoticeKind, ResponseFrame};
use crate::serial::SerialWriter;
use crate::settings::SharedSettings;

use args::{find_arg, truncate_to};

/// Number of slots.
pub const MAX_LISTENERS: usize = 10;

/// Longest URL pattern accepted by `register`.
pub const MAX_PATTERN_LEN: usize = 31;

/// Largest query string or body kept for `ARG`, in bytes.
pub const MAX_VARS_LEN: usize = 127;

/// Marks the end of the literal prefix in a pattern.
pub const WILDCARD: char = '*';

/// Write side of a parked HTTP connection.
pub type Responder = Box<dyn AsyncWrite + Send + Unpin>;

/// An HTTP request parked in a slot.
pub struct PendingRequest {
    pub kind: NoticeKind,
    pub uri: String,
    /// Query string (GET) or body (POST).
    pub vars: String,
    /// Taken out while a reply is being streamed.
    responder: Option<Responder>,
}

#[derive(Default)]
struct Slot {
    pattern: String,
    pending: Option<PendingRequest>,
}

impl Slot {
    fn is_free(&self) -> bool {
        self.pattern.is_empty()
    }

    fn is_active(&self) -> bool {
        self.pending.is_some()
    }

    fn matches(&self, uri: &str) -> bool {
        if self.is_free() {
            return false;
        }
        let prefix = match self.pattern.find(WILDCARD) {
            Some(end) => &self.pattern[..end],
            None => self.pattern.as_str(),
        };
        uri.starts_with(prefix)
    }
}

/// Result of offering an HTTP request to the registry.
///
/// Unless the request was parked, the connection is handed back unchanged.
pub enum BindOutcome<W> {
    /// The request is parked in this slot.
    Bound(usize),
    /// The matching slot already holds a request.
    Busy(usize, W),
    /// No pattern matched, or the method cannot be parked.
    Unmatched(W),
}

/// Shared table of URL listeners and their pending requests.
#[derive(Clone)]
pub struct Registry {
    slots: Arc<Mutex<Vec<Slot>>>,
    settings: SharedSettings,
    notifier: SerialWriter,
}

impl Registry {
    pub fn new(settings: SharedSettings, notifier: SerialWriter) -> Self {
        let slots = (0..MAX_LISTENERS).map(|_| Slot::default()).collect();
        Self {
            slots: Arc::new(Mutex::new(slots)),
            settings,
            notifier,
        }
    }

    /// Claims the first free slot for `pattern` and returns its handle.
    pub async fn register(&self, pattern: &str) -> Result<usize, ErrorCode> {
        if pattern.is_empty() || pattern.len() > MAX_PATTERN_LEN || !pattern.starts_with('/') {
            return Err(ErrorCode::InvalidArgument);
        }

        let mut slots = self.slots.lock().await;
        let handle = slots
            .iter()
            .position(Slot::is_free)
            .ok_or(ErrorCode::NoFreeListener)?;

        slots[handle] = Slot {
            pattern: pattern.to_string(),
            pending: None,
        };
        tracing::info!(handle, pattern, "Listener registered");
        Ok(handle)
    }

    /// Parks `request` in the first slot whose pattern matches its URI.
    ///
    /// Patterns are tried in registration order; the first match wins even
    /// when a later pattern is more specific. Only GET and POST are parked.
    pub async fn match_and_bind<W>(&self, request: &Request, responder: W) -> BindOutcome<W>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let kind = match request.method {
            Method::GET => NoticeKind::Get,
            Method::POST => NoticeKind::Post,
            _ => return BindOutcome::Unmatched(responder),
        };

        let handle = {
            let mut slots = self.slots.lock().await;
            let Some(handle) = slots.iter().position(|slot| slot.matches(&request.path)) else {
                return BindOutcome::Unmatched(responder);
            };

            let slot = &mut slots[handle];
            if slot.is_active() {
                tracing::warn!(handle, uri = %request.path, "Listener busy");
                return BindOutcome::Busy(handle, responder);
            }

            let vars = match kind {
                NoticeKind::Get => request
                    .path
                    .split_once('?')
                    .map(|(_, query)| truncate_to(query, MAX_VARS_LEN).to_string())
                    .unwrap_or_default(),
                _ => {
                    let end = request.body.len().min(MAX_VARS_LEN);
                    String::from_utf8_lossy(&request.body[..end]).into_owned()
                }
            };

            tracing::info!(handle, pattern = %slot.pattern, uri = %request.path, vars = %vars, "Request parked");
            slot.pending = Some(PendingRequest {
                kind,
                uri: request.path.clone(),
                vars,
                responder: Some(Box::new(responder)),
            });
            handle
        };

        if self.settings.read().await.events {
            let notice = ResponseFrame::notice(kind, handle, 0);
            if let Err(e) = self.notifier.send_frame(&notice).await {
                tracing::error!(handle, error = %e, "Failed to send poll notice");
            }
        }

        BindOutcome::Bound(handle)
    }

    /// Moves the parked connection out of `handle` so a reply can be written.
    ///
    /// The slot stays active until [`Registry::release`].
    pub async fn take_responder(&self, handle: usize) -> Result<Responder, ErrorCode> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(handle).ok_or(ErrorCode::InvalidArgument)?;
        slot.pending
            .as_mut()
            .and_then(|pending| pending.responder.take())
            .ok_or(ErrorCode::InvalidState)
    }

    /// Drops the pending request at `handle`, keeping the pattern.
    ///
    /// Returns whether a request was pending.
    pub async fn release(&self, handle: usize) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(handle) {
            Some(slot) => match slot.pending.take() {
                Some(pending) => {
                    tracing::debug!(handle, uri = %pending.uri, "Slot released");
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Looks up an argument of the request pending at `handle`.
    ///
    /// An absent key, or a slot with nothing pending, yields an empty string.
    pub async fn arg(&self, handle: usize, name: &str) -> Result<String, ErrorCode> {
        let slots = self.slots.lock().await;
        let slot = slots.get(handle).ok_or(ErrorCode::InvalidArgument)?;
        Ok(slot
            .pending
            .as_ref()
            .and_then(|pending| find_arg(&pending.vars, name))
            .unwrap_or_default())
    }

    /// Notices for every active slot selected by `filter` (bit `i` selects
    /// handle `i`; 0 selects all). A single `N:0,0` when none qualify.
    pub async fn poll(&self, filter: u32) -> Vec<ResponseFrame> {
        let slots = self.slots.lock().await;
        let mut notices: Vec<ResponseFrame> = slots
            .iter()
            .enumerate()
            .filter(|(handle, _)| filter == 0 || filter & (1 << handle) != 0)
            .filter_map(|(handle, slot)| {
                slot.pending
                    .as_ref()
                    .map(|pending| ResponseFrame::notice(pending.kind, handle, 0))
            })
            .collect();

        if notices.is_empty() {
            notices.push(ResponseFrame::notice(NoticeKind::Nothing, 0, 0));
        }
        notices
    }
}
