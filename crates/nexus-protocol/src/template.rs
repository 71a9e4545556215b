//! Mining template interface.
//!
//! Owns the current block template and gates everything that flows between
//! the node's `BLOCK_DATA` packets and the workers. A template moves through
//!
//! ```text
//! EMPTY -> PENDING -> RECEIVED -> VALIDATED -> ACTIVE -> { STALE | SUBMITTED }
//! ```
//!
//! and only VALIDATED/ACTIVE templates reach workers or back the submission
//! path. Workers get a value copy of the header plus the target; ownership of
//! the template itself never leaves this type.

use crate::TemplateError;
use nexus_llp::{BlockHeader, CHANNEL_HASH, CHANNEL_PRIME, HEADER_SIZE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Template lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateState {
    /// No template held.
    Empty,
    /// GET_BLOCK sent, nothing received yet.
    Pending,
    /// Payload received, not yet validated.
    Received,
    /// Passed all validation checks.
    Validated,
    /// Fed to workers.
    Active,
    /// Superseded; submissions derived from it are refused.
    Stale,
    /// A solution from this template was submitted.
    Submitted,
}

/// A validated template plus its session metadata.
#[derive(Debug, Clone)]
pub struct MiningTemplate {
    /// The block header to search.
    pub header: BlockHeader,
    /// Difficulty target for workers.
    pub bits: u32,
    /// Lifecycle state.
    pub state: TemplateState,
    /// Unix seconds when the payload arrived.
    pub received_at: u64,
    /// Endpoint the payload came from.
    pub source_endpoint: String,
    /// Session the template is bound to.
    pub session_id: u32,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateStats {
    /// Payloads handed to `read_template`.
    pub received: u64,
    /// Templates that passed validation.
    pub validated: u64,
    /// Templates rejected by any check.
    pub rejected: u64,
    /// Rejections that were height regressions.
    pub stale: u64,
    /// Feed-handler invocations.
    pub fed: u64,
    /// Pre-submission verifications passed.
    pub verified: u64,
    /// Submissions recorded.
    pub submitted: u64,
    /// Cumulative read time, microseconds.
    pub read_time_us: u64,
    /// Cumulative validation time, microseconds.
    pub validation_time_us: u64,
}

/// Handler invoked exactly once per validated template with the header and
/// the effective difficulty target.
pub type FeedHandler = Box<dyn FnMut(&BlockHeader, u32) + Send + Sync>;

/// The template interface. One per session.
pub struct TemplateInterface {
    channel: u32,
    session_id: u32,
    authenticated: bool,
    current_height: u32,
    current: Option<MiningTemplate>,
    feed_handler: Option<FeedHandler>,

    received: AtomicU64,
    validated: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
    fed: AtomicU64,
    verified: AtomicU64,
    submitted: AtomicU64,
    read_time_us: AtomicU64,
    validation_time_us: AtomicU64,
}

impl TemplateInterface {
    /// Create an interface bound to a mining channel (1 = prime, 2 = hash).
    /// Anything else falls back to the hash channel.
    pub fn new(channel: u32) -> Self {
        let channel = if channel == CHANNEL_PRIME || channel == CHANNEL_HASH {
            channel
        } else {
            warn!(channel, "Invalid mining channel, defaulting to hash");
            CHANNEL_HASH
        };
        Self {
            channel,
            session_id: 0,
            authenticated: false,
            current_height: 0,
            current: None,
            feed_handler: None,
            received: AtomicU64::new(0),
            validated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            fed: AtomicU64::new(0),
            verified: AtomicU64::new(0),
            submitted: AtomicU64::new(0),
            read_time_us: AtomicU64::new(0),
            validation_time_us: AtomicU64::new(0),
        }
    }

    /// Bind the interface to the session id assigned at authentication.
    pub fn bind_session(&mut self, session_id: u32) {
        self.session_id = session_id;
        self.authenticated = true;
        if let Some(template) = &mut self.current {
            template.session_id = session_id;
        }
        info!(session_id = format_args!("{:#010x}", session_id), "Template interface bound to session");
    }

    /// The bound session id (0 while unauthenticated).
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// The session channel.
    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Change the session channel if the node granted a different one.
    pub fn set_channel(&mut self, channel: u32) {
        if channel != CHANNEL_PRIME && channel != CHANNEL_HASH {
            warn!(channel, current = self.channel, "Refusing invalid channel change");
            return;
        }
        self.channel = channel;
    }

    /// Height of the newest validated template.
    pub fn current_height(&self) -> u32 {
        self.current_height
    }

    /// Register the worker feed handler.
    pub fn set_feed_handler(&mut self, handler: FeedHandler) {
        self.feed_handler = Some(handler);
        debug!("Template feed handler registered");
    }

    /// True when a VALIDATED or ACTIVE template is held.
    pub fn has_valid_template(&self) -> bool {
        matches!(
            self.current.as_ref().map(|t| t.state),
            Some(TemplateState::Validated) | Some(TemplateState::Active)
        )
    }

    /// The current template, when it is usable.
    pub fn current(&self) -> Option<&MiningTemplate> {
        self.current.as_ref().filter(|_| self.has_valid_template())
    }

    /// Accept a `BLOCK_DATA` payload: decode, validate, and on success feed
    /// the workers exactly once. On failure the previously active template is
    /// left untouched.
    pub fn read_template(
        &mut self,
        payload: &[u8],
        source_endpoint: &str,
    ) -> Result<(), TemplateError> {
        let started = Instant::now();
        self.received.fetch_add(1, Ordering::Relaxed);

        let result = self.read_template_inner(payload, source_endpoint);

        let elapsed = started.elapsed().as_micros() as u64;
        self.read_time_us.fetch_add(elapsed, Ordering::Relaxed);

        if let Err(error) = &result {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            if error.is_stale() {
                self.stale.fetch_add(1, Ordering::Relaxed);
            }
            warn!(source = source_endpoint, %error, "Template rejected");
        }
        result
    }

    fn read_template_inner(
        &mut self,
        payload: &[u8],
        source_endpoint: &str,
    ) -> Result<(), TemplateError> {
        if payload.is_empty() {
            return Err(TemplateError::Empty);
        }
        let header = BlockHeader::decode(payload)?;
        if payload.len() > HEADER_SIZE {
            debug!(
                extra = payload.len() - HEADER_SIZE,
                "Template payload carries trailer bytes past the header"
            );
        }

        let mut template = MiningTemplate {
            bits: header.bits,
            state: TemplateState::Received,
            received_at: unix_now(),
            source_endpoint: source_endpoint.to_string(),
            session_id: self.session_id,
            header,
        };

        self.validate(&template.header)?;
        template.state = TemplateState::Validated;

        self.current_height = template.header.height;
        self.validated.fetch_add(1, Ordering::Relaxed);
        info!(
            height = template.header.height,
            channel = template.header.channel,
            bits = format_args!("{:#010x}", template.bits),
            "Template validated"
        );

        self.current = Some(template);
        self.feed_current();
        Ok(())
    }

    /// All checks in order; the first failure wins.
    fn validate(&self, header: &BlockHeader) -> Result<(), TemplateError> {
        let started = Instant::now();
        let result = (|| {
            if header.channel != self.channel {
                return Err(TemplateError::ChannelMismatch {
                    expected: self.channel,
                    got: header.channel,
                });
            }
            // The node refreshes the template at the current height on
            // channel changes, so equality is legitimate on an
            // authenticated session.
            let stale = if self.authenticated {
                self.current_height > 0 && header.height < self.current_height
            } else {
                self.current_height > 0 && header.height <= self.current_height
            };
            if stale {
                return Err(TemplateError::Stale {
                    received: header.height,
                    current: self.current_height,
                });
            }
            if header.bits == 0 {
                return Err(TemplateError::ZeroBits);
            }
            if header.merkle_is_zero() {
                return Err(TemplateError::ZeroMerkle);
            }
            Ok(())
        })();
        self.validation_time_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        result
    }

    fn feed_current(&mut self) {
        let Some(template) = &mut self.current else {
            return;
        };
        let Some(handler) = &mut self.feed_handler else {
            debug!("No feed handler registered, template not dispatched");
            return;
        };
        template.state = TemplateState::Active;
        handler(&template.header, template.bits);
        self.fed.fetch_add(1, Ordering::Relaxed);
    }

    /// Supersede the current template. No further submissions derive from it.
    pub fn mark_stale(&mut self, reason: &str) {
        if let Some(template) = &mut self.current {
            if template.state != TemplateState::Stale {
                template.state = TemplateState::Stale;
                self.stale.fetch_add(1, Ordering::Relaxed);
                info!(reason, height = template.header.height, "Template marked stale");
            }
        }
    }

    /// Pre-submission check for a worker solution. A zero nonce is a valid
    /// mining result and is not rejected.
    pub fn verify_submission(&self, merkle_root: &[u8], nonce: u64) -> Result<(), TemplateError> {
        if !self.has_valid_template() {
            return Err(TemplateError::Submission(
                "no valid template for submission".into(),
            ));
        }
        if merkle_root.len() != 32 && merkle_root.len() != 64 {
            return Err(TemplateError::Submission(format!(
                "merkle root must be 32 or 64 bytes, got {}",
                merkle_root.len()
            )));
        }
        if nonce == 0 {
            debug!("Zero nonce in submission: valid mining result");
        }
        self.verified.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a transmitted submission.
    pub fn record_submitted(&mut self) {
        if let Some(template) = &mut self.current {
            template.state = TemplateState::Submitted;
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset for a new connection: session binding, height and template all
    /// clear.
    pub fn reset(&mut self) {
        self.mark_stale("session reset");
        self.session_id = 0;
        self.authenticated = false;
        self.current_height = 0;
        self.current = None;
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TemplateStats {
        TemplateStats {
            received: self.received.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            fed: self.fed.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            read_time_us: self.read_time_us.load(Ordering::Relaxed),
            validation_time_us: self.validation_time_us.load(Ordering::Relaxed),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
