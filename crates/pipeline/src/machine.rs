//! The conversation state machine.
//!
//! `SupportPipeline` drives every turn:
//! `Init → Classifying → {Responding | AwaitingReview} → Resolved`.
//! A `Resolved` turn re-arms the thread for its next message; an
//! `AwaitingReview` session is suspended durably until a reviewer decides.
//!
//! Capability calls run under a timeout and bounded retry; a timeout leaves
//! the session in `Classifying` so the caller can safely retry. Storage
//! write failures never cost the user their reply — the turn completes with
//! a degraded-persistence warning instead.

use chrono::Utc;
use crabdesk_config::{PipelineConfig, RejectionPolicy};
use crabdesk_core::capability::{
    Classification, Classifier, ComplexitySignal, GenerationContext, Generator,
};
use crabdesk_core::error::{CapabilityError, Error, PipelineError, Result};
use crabdesk_core::escalation::{EscalationItem, proposed_action_for};
use crabdesk_core::event::{DomainEvent, EventBus};
use crabdesk_core::message::{ChatMessage, SessionKey};
use crabdesk_core::record::InteractionEntry;
use crabdesk_core::session::{Session, SessionSnapshot, SessionStatus};
use crabdesk_core::store::{LongTermStore, SessionStore};
use crabdesk_core::validate;
use crabdesk_providers::with_retry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::queue::EscalationQueue;
use crate::registry::SessionRegistry;

/// The pending-review notice returned (and buffered) when a turn escalates.
const ESCALATION_NOTICE: &str = "I understand this is an important matter that requires \
    specialized attention. I'm escalating your query to our human support team, who will \
    review it and respond within 2 business hours. You'll receive a notification once \
    they've reviewed your case.";

/// The safe reply returned when an unhandled error interrupts a turn.
const FALLBACK_REPLY: &str = "I apologize, but I ran into an unexpected issue while \
    processing your request. Your message was received — please try again in a moment.";

const APPROVED_DEFAULT_RESOLUTION: &str = "Resolution approved by human agent";
const REJECTED_DEFAULT_RESOLUTION: &str =
    "Escalated to a specialized support team for further review";

/// How many durable interactions seed the generation context.
const HISTORY_CONTEXT_LIMIT: usize = 5;

/// The result of one `process_message` turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The automated path produced a reply.
    Reply {
        session_id: String,
        reply: String,
        intent: String,
        /// The reply was delivered but the interaction could not be
        /// persisted; it needs reconciliation.
        degraded_persistence: bool,
    },

    /// The turn was suspended for human review; no finalized reply yet.
    PendingReview {
        session_id: String,
        notice: String,
        escalation_id: String,
    },

    /// An unhandled error was converted into a safe generic reply.
    Fallback {
        session_id: String,
        reply: String,
        error_code: String,
    },
}

/// The result of a reviewer decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub session_id: String,
    pub approved: bool,
    /// User-facing notice describing the decision.
    pub message: String,
    /// Whether the user should be notified of this outcome.
    pub notify_user: bool,
    pub degraded_persistence: bool,
    /// Present when rejection policy `retry` re-ran the automated path.
    pub reprocessed: Option<Box<TurnOutcome>>,
}

/// The orchestrator: owns sessions, drives transitions, merges short- and
/// long-term memory, and emits either a reply or a pending-review status.
pub struct SupportPipeline {
    store: Arc<dyn LongTermStore>,
    sessions: Arc<dyn SessionStore>,
    classifier: Arc<dyn Classifier>,
    generator: Arc<dyn Generator>,
    registry: SessionRegistry,
    queue: EscalationQueue,
    events: Arc<EventBus>,
    config: PipelineConfig,
}

impl SupportPipeline {
    pub fn new(
        store: Arc<dyn LongTermStore>,
        sessions: Arc<dyn SessionStore>,
        classifier: Arc<dyn Classifier>,
        generator: Arc<dyn Generator>,
        config: PipelineConfig,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            sessions,
            classifier,
            generator,
            registry: SessionRegistry::new(),
            queue: EscalationQueue::new(),
            events,
            config,
        }
    }

    /// Revive suspended sessions from the durable store and rebuild their
    /// queue items. Called once at startup; returns how many were revived.
    pub async fn restore_suspended(&self) -> Result<usize> {
        let suspended = self.sessions.list_suspended().await?;
        let mut revived = 0;

        for session in suspended {
            let key = session.key.clone();
            if self.registry.contains(&key) {
                continue;
            }
            self.ensure_queue_item(&session).await;
            self.registry.insert(session);
            revived += 1;
        }

        if revived > 0 {
            info!(revived, "Revived suspended sessions awaiting review");
        }
        Ok(revived)
    }

    /// Start (or resume) a session for a (user, thread) pair.
    pub async fn start_session(&self, user_id: &str, thread_id: &str) -> Result<SessionSnapshot> {
        let key = SessionKey::new(user_id, thread_id);
        validate::validate_key(&key)?;

        // Read failures degrade to an empty long-term context.
        let history_count = match self.store.load(user_id).await {
            Ok(Some(record)) => record.user_history.len(),
            Ok(None) => 0,
            Err(e) => {
                warn!(user_id, error = %e, "Long-term record unavailable, starting with empty context");
                self.publish_degraded(user_id, "load", &e.to_string());
                0
            }
        };

        let slot = match self.registry.get(&key) {
            Some(slot) => {
                slot.lock().await.bump_session_count();
                slot
            }
            None => {
                // A suspended session survives restarts; revive it before
                // falling back to a fresh one.
                let session = match self.sessions.load_session(&key).await {
                    Ok(Some(existing)) => {
                        self.ensure_queue_item(&existing).await;
                        existing
                    }
                    Ok(None) => Session::new(key.clone()),
                    Err(e) => {
                        warn!(session = %key, error = %e, "Suspended-session lookup failed, starting fresh");
                        Session::new(key.clone())
                    }
                };
                self.registry.insert(session)
            }
        };

        let session = slot.lock().await;
        self.events.publish(DomainEvent::SessionStarted {
            session_id: key.session_id(),
            history_count,
            timestamp: Utc::now(),
        });
        info!(session = %key, history_count, "Session started");
        Ok(session.snapshot(history_count))
    }

    /// Process one user message through the pipeline.
    pub async fn process_message(
        &self,
        user_id: &str,
        thread_id: &str,
        text: &str,
    ) -> Result<TurnOutcome> {
        let key = SessionKey::new(user_id, thread_id);
        validate::validate_key(&key)?;
        let message = ChatMessage::user(text);
        validate::validate_message(&message)?;

        let slot = self.registry.get(&key).ok_or_else(|| {
            PipelineError::InvalidState(format!(
                "no active session {key}; call start_session first"
            ))
        })?;
        let mut session = slot.lock().await;

        match session.status {
            SessionStatus::AwaitingReview => {
                return Err(PipelineError::EscalationInProgress {
                    session_id: key.session_id(),
                }
                .into());
            }
            // Init, Resolved (re-arm), and Classifying (safe retry after a
            // timeout) all accept a new turn.
            SessionStatus::Init | SessionStatus::Resolved | SessionStatus::Classifying => {}
            SessionStatus::Responding => {
                return Err(PipelineError::InvalidState(format!(
                    "session {key} has a response in flight"
                ))
                .into());
            }
        }

        session.push(message);
        session.status = SessionStatus::Classifying;
        let query = text.to_string();

        match self.run_turn(&mut session, &query, true).await {
            Ok(outcome) => Ok(outcome),
            // Contract and capability errors surface as-is; capability
            // errors leave the session in Classifying for retry.
            Err(Error::Pipeline(e)) => Err(e.into()),
            Err(Error::Capability(e)) => Err(e.into()),
            Err(other) => {
                // Never leave a session in an undefined state: safe generic
                // reply plus an internal error code.
                let error_code = error_code(&other);
                warn!(session = %key, error = %other, error_code, "Turn failed, returning fallback reply");
                session.status = SessionStatus::Init;
                self.events.publish(DomainEvent::ErrorOccurred {
                    session_id: key.session_id(),
                    error_code: error_code.to_string(),
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome::Fallback {
                    session_id: key.session_id(),
                    reply: FALLBACK_REPLY.to_string(),
                    error_code: error_code.to_string(),
                })
            }
        }
    }

    /// Record a reviewer decision for a pending escalation.
    pub async fn approve_hitl(
        &self,
        user_id: &str,
        thread_id: &str,
        approved: bool,
        feedback: &str,
    ) -> Result<ReviewOutcome> {
        let key = SessionKey::new(user_id, thread_id);
        validate::validate_key(&key)?;

        let slot = match self.registry.get(&key) {
            Some(slot) => slot,
            None => {
                // The process may have restarted since the escalation.
                match self.sessions.load_session(&key).await {
                    Ok(Some(session)) => {
                        self.ensure_queue_item(&session).await;
                        self.registry.insert(session)
                    }
                    _ => {
                        return Err(PipelineError::NoPendingEscalation {
                            session_id: key.session_id(),
                        }
                        .into());
                    }
                }
            }
        };
        let mut session = slot.lock().await;

        if session.status != SessionStatus::AwaitingReview {
            // A decision was already recorded for the last escalation.
            if session.hitl_approved.is_some() {
                return Err(PipelineError::AlreadyResolved {
                    session_id: key.session_id(),
                }
                .into());
            }
            return Err(PipelineError::NoPendingEscalation {
                session_id: key.session_id(),
            }
            .into());
        }

        let item = self.queue.dequeue_by_key(&key).await;
        let query = item
            .as_ref()
            .map(|i| i.query.clone())
            .or_else(|| meta_str(&session, "pending_query"))
            .or_else(|| session.last_user_message().map(|m| m.content.clone()))
            .unwrap_or_default();
        let escalation_id = item
            .map(|i| i.id)
            .or_else(|| meta_str(&session, "pending_escalation_id"))
            .unwrap_or_default();

        session.hitl_approved = Some(approved);
        session.requires_hitl = false;

        self.events.publish(DomainEvent::EscalationResolved {
            session_id: key.session_id(),
            escalation_id,
            approved,
            timestamp: Utc::now(),
        });

        if approved {
            let resolution = non_empty_or(feedback, APPROVED_DEFAULT_RESOLUTION);
            let notice = format!("Your issue has been reviewed and approved. {resolution}");
            session.push(
                ChatMessage::agent(&notice).with_meta("reviewed", serde_json::json!(true)),
            );
            session.status = SessionStatus::Resolved;

            let degraded = self
                .persist_interaction(&key, &query, &resolution, true, false)
                .await;
            self.forget_suspension(&key).await;

            info!(session = %key, "Escalation approved");
            return Ok(ReviewOutcome {
                session_id: key.session_id(),
                approved: true,
                message: notice,
                notify_user: true,
                degraded_persistence: degraded,
                reprocessed: None,
            });
        }

        match self.config.on_rejection {
            RejectionPolicy::Resolve => {
                let resolution = non_empty_or(feedback, REJECTED_DEFAULT_RESOLUTION);
                let notice = format!("Your issue has been reviewed. {resolution}");
                session.push(
                    ChatMessage::agent(&notice)
                        .with_meta("reviewed", serde_json::json!(true))
                        .with_meta("rejected", serde_json::json!(true)),
                );
                session.status = SessionStatus::Resolved;

                let degraded = self
                    .persist_interaction(&key, &query, &resolution, true, true)
                    .await;
                self.forget_suspension(&key).await;

                info!(session = %key, "Escalation rejected (terminal)");
                Ok(ReviewOutcome {
                    session_id: key.session_id(),
                    approved: false,
                    message: notice,
                    notify_user: true,
                    degraded_persistence: degraded,
                    reprocessed: None,
                })
            }
            RejectionPolicy::Retry => {
                // Feedback is recorded for audit; the query goes back
                // through the automated path with escalation suppressed so a
                // deterministic classifier can't bounce it straight back.
                session
                    .metadata
                    .insert("rejection_feedback".into(), serde_json::json!(feedback));
                session.status = SessionStatus::Classifying;
                self.forget_suspension(&key).await;

                info!(session = %key, "Escalation rejected, reprocessing automatically");
                let outcome = self.run_turn(&mut session, &query, false).await?;
                let notify_user = matches!(outcome, TurnOutcome::Reply { .. });
                Ok(ReviewOutcome {
                    session_id: key.session_id(),
                    approved: false,
                    message: "Feedback recorded; the query was rerouted through the automated path."
                        .to_string(),
                    notify_user,
                    degraded_persistence: false,
                    reprocessed: Some(Box::new(outcome)),
                })
            }
        }
    }

    /// A user's durable interaction history, most recent first.
    pub async fn get_user_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<InteractionEntry>> {
        validate::validate_identifier("user_id", user_id)?;
        Ok(self.store.recent(user_id, limit).await?)
    }

    /// Search a user's history by keyword (query or resolution).
    pub async fn search_history(
        &self,
        user_id: &str,
        keyword: &str,
    ) -> Result<Vec<InteractionEntry>> {
        validate::validate_identifier("user_id", user_id)?;
        Ok(self.store.search(user_id, keyword).await?)
    }

    /// Empty a session's short-term buffer. Refused while a review is
    /// pending; never touches the long-term record.
    pub async fn clear_session(&self, user_id: &str, thread_id: &str) -> Result<()> {
        let key = SessionKey::new(user_id, thread_id);
        validate::validate_key(&key)?;

        let Some(slot) = self.registry.get(&key) else {
            return Ok(()); // Nothing buffered, nothing to clear
        };
        let mut session = slot.lock().await;
        if session.status == SessionStatus::AwaitingReview {
            return Err(PipelineError::EscalationInProgress {
                session_id: key.session_id(),
            }
            .into());
        }
        session.clear();
        Ok(())
    }

    /// All pending reviews, oldest first.
    pub async fn list_pending_reviews(&self) -> Vec<EscalationItem> {
        self.queue.list_pending().await
    }

    /// The event bus this pipeline publishes to.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    // --- Internals ---

    /// One automated pass for `query`: classify, then respond or suspend.
    /// The caller has already buffered the user message and holds the
    /// session lock. `allow_escalation = false` forces the routine path
    /// (used when reprocessing after a rejection).
    async fn run_turn(
        &self,
        session: &mut Session,
        query: &str,
        allow_escalation: bool,
    ) -> Result<TurnOutcome> {
        let key = session.key.clone();

        // Durable context; read failures degrade to empty.
        let record = match self.store.load(&key.user_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id = %key.user_id, error = %e, "History unavailable, degrading to empty context");
                self.publish_degraded(&key.user_id, "load", &e.to_string());
                None
            }
        };
        let user_summary = record
            .as_ref()
            .map(|r| r.summary(HISTORY_CONTEXT_LIMIT))
            .unwrap_or_default();
        let history = record
            .as_ref()
            .map(|r| r.recent(HISTORY_CONTEXT_LIMIT))
            .unwrap_or_default();
        let context_messages = session.context_window(self.config.context_window);

        let classification = match self
            .call_classifier(query, &context_messages, &user_summary)
            .await
        {
            Ok(c) => c,
            Err(e) if self.config.escalate_on_capability_failure && allow_escalation => {
                warn!(session = %key, error = %e, "Classifier exhausted retries, falling back to review");
                Classification {
                    intent: "capability_failure".into(),
                    complexity: ComplexitySignal::Elevated,
                    confidence: 0.0,
                }
            }
            Err(e) => return Err(e.into()),
        };

        debug!(
            session = %key,
            intent = %classification.intent,
            elevated = classification.is_elevated(),
            "Message classified"
        );

        if classification.is_elevated() && allow_escalation {
            return self.suspend_for_review(session, query, &classification).await;
        }

        session.status = SessionStatus::Responding;
        let context = GenerationContext {
            query: query.to_string(),
            confidence: classification.confidence,
            recent_messages: context_messages,
            user_summary,
            history,
        };

        let reply = match self.call_generator(&classification.intent, &context).await {
            Ok(reply) => reply,
            Err(e) => {
                // Back to Classifying: the turn can be retried safely.
                session.status = SessionStatus::Classifying;
                if self.config.escalate_on_capability_failure && allow_escalation {
                    warn!(session = %key, error = %e, "Generator exhausted retries, falling back to review");
                    let fallback = Classification {
                        intent: "capability_failure".into(),
                        complexity: ComplexitySignal::Elevated,
                        confidence: 0.0,
                    };
                    return self.suspend_for_review(session, query, &fallback).await;
                }
                return Err(e.into());
            }
        };

        session.push(
            ChatMessage::agent(&reply)
                .with_meta("intent", serde_json::json!(classification.intent))
                .with_meta("confidence", serde_json::json!(classification.confidence)),
        );
        session.status = SessionStatus::Resolved;

        let degraded = self
            .persist_interaction(&key, query, &reply, false, false)
            .await;

        self.events.publish(DomainEvent::MessageProcessed {
            session_id: key.session_id(),
            intent: classification.intent.clone(),
            escalated: false,
            timestamp: Utc::now(),
        });
        info!(session = %key, intent = %classification.intent, degraded, "Turn resolved");

        Ok(TurnOutcome::Reply {
            session_id: key.session_id(),
            reply,
            intent: classification.intent,
            degraded_persistence: degraded,
        })
    }

    /// Flip a session into `AwaitingReview` and persist the suspension.
    async fn suspend_for_review(
        &self,
        session: &mut Session,
        query: &str,
        classification: &Classification,
    ) -> Result<TurnOutcome> {
        let key = session.key.clone();

        session.requires_hitl = true;
        session.hitl_approved = None;
        session.push(
            ChatMessage::agent(ESCALATION_NOTICE)
                .with_meta("requires_hitl", serde_json::json!(true)),
        );
        session.status = SessionStatus::AwaitingReview;

        let item = EscalationItem::new(key.clone(), query, classification);
        // Bookkeeping for queue rebuild after a restart.
        session
            .metadata
            .insert("pending_query".into(), serde_json::json!(query));
        session
            .metadata
            .insert("pending_intent".into(), serde_json::json!(classification.intent));
        session
            .metadata
            .insert("pending_escalation_id".into(), serde_json::json!(item.id));
        session
            .metadata
            .insert("escalated_at".into(), serde_json::json!(Utc::now().to_rfc3339()));

        let escalation_id = item.id.clone();
        self.queue.enqueue(item).await?;

        // The suspension must survive a restart; failure degrades but the
        // escalation still proceeds in-process.
        if let Err(e) = self.sessions.save_session(session).await {
            warn!(session = %key, error = %e, "Failed to persist suspended session");
            self.publish_degraded(&key.user_id, "save_session", &e.to_string());
        }

        self.events.publish(DomainEvent::EscalationRaised {
            session_id: key.session_id(),
            escalation_id: escalation_id.clone(),
            query_preview: query.chars().take(80).collect(),
            timestamp: Utc::now(),
        });
        info!(session = %key, escalation = %escalation_id, "Session suspended for human review");

        Ok(TurnOutcome::PendingReview {
            session_id: key.session_id(),
            notice: ESCALATION_NOTICE.to_string(),
            escalation_id,
        })
    }

    async fn call_classifier(
        &self,
        message: &str,
        context: &[ChatMessage],
        user_summary: &str,
    ) -> std::result::Result<Classification, CapabilityError> {
        let timeout = Duration::from_secs(self.config.capability_timeout_secs);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        with_retry("classify", self.config.capability_retries, backoff, || async {
            match tokio::time::timeout(
                timeout,
                self.classifier.classify(message, context, user_summary),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout {
                    capability: "classify".into(),
                    timeout_secs: timeout.as_secs(),
                }),
            }
        })
        .await
    }

    async fn call_generator(
        &self,
        intent: &str,
        context: &GenerationContext,
    ) -> std::result::Result<String, CapabilityError> {
        let timeout = Duration::from_secs(self.config.capability_timeout_secs);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        with_retry("generate", self.config.capability_retries, backoff, || async {
            match tokio::time::timeout(timeout, self.generator.generate(intent, context)).await {
                Ok(result) => result,
                Err(_) => Err(CapabilityError::Timeout {
                    capability: "generate".into(),
                    timeout_secs: timeout.as_secs(),
                }),
            }
        })
        .await
    }

    /// Append a resolved interaction to the long-term record. Returns true
    /// when persistence degraded (the reply is still delivered).
    async fn persist_interaction(
        &self,
        key: &SessionKey,
        query: &str,
        resolution: &str,
        reviewed: bool,
        rejected: bool,
    ) -> bool {
        let mut metadata = serde_json::Map::new();
        metadata.insert("thread_id".into(), serde_json::json!(key.thread_id));
        if reviewed {
            metadata.insert("reviewed".into(), serde_json::json!(true));
        }
        if rejected {
            metadata.insert("rejected".into(), serde_json::json!(true));
        }

        match self
            .store
            .append_interaction(&key.user_id, query, resolution, metadata)
            .await
        {
            Ok(_) => false,
            Err(e) => {
                warn!(user_id = %key.user_id, error = %e, "Interaction not persisted; reply delivered anyway");
                self.publish_degraded(&key.user_id, "append_interaction", &e.to_string());
                true
            }
        }
    }

    /// Drop the durable copy of a session that is no longer suspended.
    async fn forget_suspension(&self, key: &SessionKey) {
        if let Err(e) = self.sessions.remove_session(key).await {
            warn!(session = %key, error = %e, "Failed to remove persisted session");
        }
    }

    /// Rebuild the queue item for a suspended session if it is missing
    /// (e.g. after a restart).
    async fn ensure_queue_item(&self, session: &Session) {
        if session.status != SessionStatus::AwaitingReview {
            return;
        }
        if self.queue.contains_key(&session.key).await {
            return;
        }

        let query = meta_str(session, "pending_query")
            .or_else(|| session.last_user_message().map(|m| m.content.clone()))
            .unwrap_or_default();
        let item = EscalationItem {
            id: meta_str(session, "pending_escalation_id")
                .unwrap_or_else(|| restored_item_id(&session.key)),
            key: session.key.clone(),
            proposed_action: proposed_action_for(&query),
            intent: meta_str(session, "pending_intent").unwrap_or_else(|| "escalation".into()),
            query,
            created_at: session.updated_at,
            metadata: serde_json::Map::new(),
        };

        if self.queue.enqueue(item).await.is_ok() {
            debug!(session = %session.key, "Rebuilt escalation queue item");
        }
    }

    fn publish_degraded(&self, user_id: &str, operation: &str, error_message: &str) {
        self.events.publish(DomainEvent::PersistenceDegraded {
            user_id: user_id.to_string(),
            operation: operation.to_string(),
            error_message: error_message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn meta_str(session: &Session, key: &str) -> Option<String> {
    session
        .metadata
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn non_empty_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Stable stand-in id for rebuilt items whose original id was lost.
fn restored_item_id(key: &SessionKey) -> String {
    format!("restored-{}", key.session_id())
}

fn error_code(error: &Error) -> &'static str {
    match error {
        Error::Serialization(_) => "serialization_error",
        Error::Store(_) => "storage_error",
        Error::Config { .. } => "config_error",
        _ => "internal_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crabdesk_store::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A classifier with a fixed routing decision.
    struct MockClassifier {
        elevated: bool,
        fail: bool,
        delay: Option<Duration>,
        calls: AtomicU32,
    }

    impl MockClassifier {
        fn routine() -> Self {
            Self { elevated: false, fail: false, delay: None, calls: AtomicU32::new(0) }
        }
        fn escalating() -> Self {
            Self { elevated: true, fail: false, delay: None, calls: AtomicU32::new(0) }
        }
        fn failing() -> Self {
            Self { elevated: false, fail: true, delay: None, calls: AtomicU32::new(0) }
        }
        fn stalled() -> Self {
            Self {
                elevated: false,
                fail: false,
                delay: Some(Duration::from_secs(3600)),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for MockClassifier {
        fn name(&self) -> &str {
            "mock"
        }

        async fn classify(
            &self,
            _message: &str,
            _context: &[ChatMessage],
            _summary: &str,
        ) -> std::result::Result<Classification, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CapabilityError::Unavailable {
                    capability: "classify".into(),
                    reason: "mock outage".into(),
                });
            }
            Ok(Classification {
                intent: if self.elevated { "escalation" } else { "general" }.into(),
                complexity: if self.elevated {
                    ComplexitySignal::Elevated
                } else {
                    ComplexitySignal::Routine
                },
                confidence: 1.0,
            })
        }
    }

    /// A generator that echoes a fixed reply.
    struct MockGenerator {
        reply: String,
    }

    #[async_trait]
    impl Generator for MockGenerator {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(
            &self,
            _intent: &str,
            _context: &GenerationContext,
        ) -> std::result::Result<String, CapabilityError> {
            Ok(self.reply.clone())
        }
    }

    fn pipeline_with(
        classifier: MockClassifier,
        config: PipelineConfig,
    ) -> (SupportPipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = SupportPipeline::new(
            store.clone(),
            store.clone(),
            Arc::new(classifier),
            Arc::new(MockGenerator { reply: "Here's what to do.".into() }),
            config,
            Arc::new(EventBus::default()),
        );
        (pipeline, store)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            capability_timeout_secs: 1,
            capability_retries: 0,
            retry_backoff_ms: 1,
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn routine_turn_replies_and_persists() {
        let (pipeline, store) = pipeline_with(MockClassifier::routine(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        let outcome = pipeline
            .process_message("alice", "t1", "How do I use the export feature?")
            .await
            .unwrap();

        match outcome {
            TurnOutcome::Reply { reply, degraded_persistence, .. } => {
                assert_eq!(reply, "Here's what to do.");
                assert!(!degraded_persistence);
            }
            other => panic!("expected reply, got {other:?}"),
        }

        let history = store.recent("alice", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "How do I use the export feature?");
    }

    #[tokio::test]
    async fn message_without_session_is_invalid_state() {
        let (pipeline, _) = pipeline_with(MockClassifier::routine(), fast_config());
        let err = pipeline.process_message("alice", "t1", "hello").await.unwrap_err();
        assert!(matches!(err, Error::Pipeline(PipelineError::InvalidState(_))));
    }

    #[tokio::test]
    async fn invalid_identifiers_are_rejected() {
        let (pipeline, _) = pipeline_with(MockClassifier::routine(), fast_config());
        let err = pipeline.start_session("", "t1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::InvalidIdentifier { field: "user_id", .. })
        ));

        let err = pipeline.start_session("alice", "t/1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::InvalidIdentifier { field: "thread_id", .. })
        ));
    }

    #[tokio::test]
    async fn elevated_turn_suspends_for_review() {
        let (pipeline, store) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        let outcome = pipeline
            .process_message("alice", "t1", "I need a refund for my subscription")
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::PendingReview { .. }));
        assert_eq!(pipeline.list_pending_reviews().await.len(), 1);

        // Nothing persisted yet — the interaction isn't resolved
        assert!(store.recent("alice", 10).await.unwrap().is_empty());

        // The suspension is durable
        let suspended = store.list_suspended().await.unwrap();
        assert_eq!(suspended.len(), 1);
        assert!(suspended[0].requires_hitl);
    }

    #[tokio::test]
    async fn new_message_during_review_is_refused() {
        let (pipeline, _) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "escalate this")
            .await
            .unwrap();

        let err = pipeline
            .process_message("alice", "t1", "are you still there?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::EscalationInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn approval_finalizes_with_feedback() {
        let (pipeline, store) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "I need a refund for my subscription")
            .await
            .unwrap();

        let outcome = pipeline
            .approve_hitl("alice", "t1", true, "Refund issued")
            .await
            .unwrap();
        assert!(outcome.approved);
        assert!(outcome.notify_user);
        assert!(outcome.message.contains("Refund issued"));

        let history = store.recent("alice", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "I need a refund for my subscription");
        assert_eq!(history[0].resolution, "Refund issued");

        // Queue drained, durable suspension gone
        assert!(pipeline.list_pending_reviews().await.is_empty());
        assert!(store.list_suspended().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_decision_is_already_resolved() {
        let (pipeline, store) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "refund please")
            .await
            .unwrap();
        pipeline.approve_hitl("alice", "t1", true, "done").await.unwrap();

        let err = pipeline
            .approve_hitl("alice", "t1", true, "done")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::AlreadyResolved { .. })
        ));

        // No duplicate history entry
        assert_eq!(store.recent("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn decision_without_escalation_is_no_pending() {
        let (pipeline, _) = pipeline_with(MockClassifier::routine(), fast_config());
        pipeline.start_session("alice", "t1").await.unwrap();

        let err = pipeline
            .approve_hitl("alice", "t1", true, "nothing to approve")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::NoPendingEscalation { .. })
        ));
    }

    #[tokio::test]
    async fn rejection_resolve_policy_is_terminal() {
        let (pipeline, store) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "refund please")
            .await
            .unwrap();

        let outcome = pipeline
            .approve_hitl("alice", "t1", false, "Needs the security team")
            .await
            .unwrap();
        assert!(!outcome.approved);
        assert!(outcome.reprocessed.is_none());
        assert!(outcome.message.contains("Needs the security team"));

        let history = store.recent("alice", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].metadata["rejected"], true);
    }

    #[tokio::test]
    async fn rejection_retry_policy_reprocesses() {
        let config = PipelineConfig {
            on_rejection: RejectionPolicy::Retry,
            ..fast_config()
        };
        let (pipeline, store) = pipeline_with(MockClassifier::escalating(), config);

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "refund please")
            .await
            .unwrap();

        let outcome = pipeline
            .approve_hitl("alice", "t1", false, "try the automated answer")
            .await
            .unwrap();

        // Escalation is suppressed on the retry pass even though the
        // classifier still says Elevated, so a reply comes back.
        let reprocessed = outcome.reprocessed.expect("retry policy reprocesses");
        assert!(matches!(*reprocessed, TurnOutcome::Reply { .. }));
        assert_eq!(store.recent("alice", 10).await.unwrap().len(), 1);
        assert!(pipeline.list_pending_reviews().await.is_empty());
    }

    #[tokio::test]
    async fn capability_failure_escalates_when_configured() {
        let (pipeline, _) = pipeline_with(MockClassifier::failing(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        let outcome = pipeline
            .process_message("alice", "t1", "anything at all")
            .await
            .unwrap();

        assert!(matches!(outcome, TurnOutcome::PendingReview { .. }));
        let pending = pipeline.list_pending_reviews().await;
        assert_eq!(pending[0].intent, "capability_failure");
    }

    #[tokio::test]
    async fn capability_failure_surfaces_when_not_configured() {
        let config = PipelineConfig {
            escalate_on_capability_failure: false,
            ..fast_config()
        };
        let (pipeline, _) = pipeline_with(MockClassifier::failing(), config);

        pipeline.start_session("alice", "t1").await.unwrap();
        let err = pipeline
            .process_message("alice", "t1", "anything at all")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Capability(CapabilityError::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_classifier_times_out_and_leaves_classifying() {
        let config = PipelineConfig {
            escalate_on_capability_failure: false,
            ..fast_config()
        };
        let (pipeline, store) = pipeline_with(MockClassifier::stalled(), config);

        pipeline.start_session("alice", "t1").await.unwrap();
        let err = pipeline
            .process_message("alice", "t1", "is anyone home")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capability(CapabilityError::Timeout { .. })));

        // The session is parked in Classifying for a safe retry, and
        // nothing was persisted.
        assert!(store.recent("alice", 10).await.unwrap().is_empty());
        let snapshot = pipeline.start_session("alice", "t1").await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Classifying);
    }

    #[tokio::test]
    async fn concurrent_messages_produce_exactly_one_escalation() {
        let (pipeline, _) = pipeline_with(MockClassifier::escalating(), fast_config());
        let pipeline = Arc::new(pipeline);

        pipeline.start_session("alice", "t1").await.unwrap();

        let a = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.process_message("alice", "t1", "refund now").await })
        };
        let b = {
            let p = pipeline.clone();
            tokio::spawn(async move { p.process_message("alice", "t1", "refund now").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let pending = results
            .iter()
            .filter(|r| matches!(r, Ok(TurnOutcome::PendingReview { .. })))
            .count();
        let refused = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(Error::Pipeline(PipelineError::EscalationInProgress { .. }))
                )
            })
            .count();

        assert_eq!(pending, 1, "exactly one turn escalates");
        assert_eq!(refused, 1, "the racing turn is refused");
        assert_eq!(pipeline.list_pending_reviews().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_session_refused_during_review() {
        let (pipeline, _) = pipeline_with(MockClassifier::escalating(), fast_config());

        pipeline.start_session("alice", "t1").await.unwrap();
        pipeline
            .process_message("alice", "t1", "refund please")
            .await
            .unwrap();

        let err = pipeline.clear_session("alice", "t1").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pipeline(PipelineError::EscalationInProgress { .. })
        ));

        pipeline.approve_hitl("alice", "t1", true, "done").await.unwrap();
        pipeline.clear_session("alice", "t1").await.unwrap();
    }

    #[tokio::test]
    async fn restart_revives_suspension_and_decision_lands() {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::default());

        // First process: escalate
        {
            let pipeline = SupportPipeline::new(
                store.clone(),
                store.clone(),
                Arc::new(MockClassifier::escalating()),
                Arc::new(MockGenerator { reply: "unused".into() }),
                fast_config(),
                events.clone(),
            );
            pipeline.start_session("alice", "t1").await.unwrap();
            pipeline
                .process_message("alice", "t1", "I need a refund")
                .await
                .unwrap();
        }

        // Second process: restore, then decide
        let pipeline = SupportPipeline::new(
            store.clone(),
            store.clone(),
            Arc::new(MockClassifier::escalating()),
            Arc::new(MockGenerator { reply: "unused".into() }),
            fast_config(),
            events,
        );
        let revived = pipeline.restore_suspended().await.unwrap();
        assert_eq!(revived, 1);

        let pending = pipeline.list_pending_reviews().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].query, "I need a refund");

        let outcome = pipeline
            .approve_hitl("alice", "t1", true, "Refund issued")
            .await
            .unwrap();
        assert!(outcome.approved);
        assert_eq!(store.recent("alice", 10).await.unwrap()[0].resolution, "Refund issued");
    }

    #[tokio::test]
    async fn session_count_bumps_on_resume() {
        let (pipeline, _) = pipeline_with(MockClassifier::routine(), fast_config());
        pipeline.start_session("alice", "t1").await.unwrap();
        let snapshot = pipeline.start_session("alice", "t1").await.unwrap();
        assert_eq!(snapshot.session_id, "alice_t1");

        let slot = pipeline.registry.get(&SessionKey::new("alice", "t1")).unwrap();
        assert_eq!(slot.lock().await.metadata["session_count"], 2);
    }
}
