//! Save / start / continue / extend a sequence against the backend.
//!
//! Only one submission per sequence may be in flight, however many submitters
//! point at it. A second attempt is rejected before anything is touched.

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::activity::{self, Kind};
use crate::backend::{BackendFuture, GenerationRequest, SequenceBackend};
use crate::config::SubmissionConfig;
use crate::effective::{lock, EffectiveSettings};
use crate::resolver::SettingsResolver;
use crate::sequence::{ChatMessage, ChatSequence, SequenceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Save the draft text without running inference.
    SaveOnly,
    /// Save the draft text as the first message of a new sequence, then generate.
    Start,
    /// Generate another assistant reply without adding a message.
    Continue,
    /// Append the draft text to a saved sequence, then generate.
    Extend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AlreadySubmitting,
    EmptyDraft,
    ContinuationDisabled,
    /// `Continue` or `Extend` on a sequence the server has never seen.
    NotYetSaved,
    /// `Start` on a sequence that already exists.
    AlreadySaved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Rejected(RejectReason),
    Saved { sequence_id: SequenceId },
    Completed { sequence_id: SequenceId, response: String },
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmissionState {
    pub sequence: ChatSequence,
    pub draft_text: String,
    pub submitting: bool,
    pub status: Option<String>,
    /// Text streamed so far for the current (or last) generation.
    pub response_text: String,
    pub last_failure: Option<String>,
}

struct ActiveSubmission {
    generation: u64,
    token: CancellationToken,
    /// Sequence claimed in the resolver while this submission runs.
    claim: Option<(SequenceId, u64)>,
}

#[derive(Default)]
struct Submissions {
    started: u64,
    active: Option<ActiveSubmission>,
}

impl Submissions {
    fn take_if(&mut self, generation: u64) -> Option<ActiveSubmission> {
        match &self.active {
            Some(active) if active.generation == generation => self.active.take(),
            _ => None,
        }
    }
}

/// Clears the in-flight flag however the submission ends, including when
/// the caller drops the future. A stopped submission leaves the flag to
/// whichever one started after it.
struct InFlight {
    state: Arc<Mutex<SubmissionState>>,
    submissions: Arc<Mutex<Submissions>>,
    resolver: SettingsResolver,
    generation: u64,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let finished = lock(&self.submissions).take_if(self.generation);
        if let Some(active) = finished {
            if let Some((id, claim)) = active.claim {
                self.resolver.release_submission(id, claim);
            }
            state.submitting = false;
            state.status = None;
        }
    }
}

#[derive(Clone)]
pub struct SequenceSubmitter {
    state: Arc<Mutex<SubmissionState>>,
    settings: EffectiveSettings,
    resolver: SettingsResolver,
    backend: Arc<dyn SequenceBackend>,
    submissions: Arc<Mutex<Submissions>>,
    fallback_retrieval_policy: String,
}

impl SequenceSubmitter {
    /// Submitter for a brand new sequence, backed by draft settings.
    pub fn new_draft(
        resolver: SettingsResolver,
        backend: Arc<dyn SequenceBackend>,
        config: &SubmissionConfig,
    ) -> Self {
        let settings = resolver.draft_settings();
        Self::with_parts(ChatSequence::draft(), settings, resolver, backend, config)
    }

    pub fn for_sequence(
        sequence: ChatSequence,
        resolver: SettingsResolver,
        backend: Arc<dyn SequenceBackend>,
        config: &SubmissionConfig,
    ) -> Self {
        let settings = match sequence.server_id {
            Some(id) => resolver.get_effective_settings(id),
            None => resolver.draft_settings(),
        };
        Self::with_parts(sequence, settings, resolver, backend, config)
    }

    fn with_parts(
        sequence: ChatSequence,
        settings: EffectiveSettings,
        resolver: SettingsResolver,
        backend: Arc<dyn SequenceBackend>,
        config: &SubmissionConfig,
    ) -> Self {
        SequenceSubmitter {
            state: Arc::new(Mutex::new(SubmissionState {
                sequence,
                ..Default::default()
            })),
            settings,
            resolver,
            backend,
            submissions: Arc::new(Mutex::new(Submissions::default())),
            fallback_retrieval_policy: config.fallback_retrieval_policy.clone(),
        }
    }

    pub fn settings(&self) -> EffectiveSettings {
        self.settings.clone()
    }

    pub fn state(&self) -> SubmissionState {
        lock(&self.state).clone()
    }

    pub fn is_submitting(&self) -> bool {
        lock(&self.state).submitting
    }

    pub fn set_draft_text(&self, text: impl Into<String>) {
        lock(&self.state).draft_text = text.into();
    }

    /// Stop listening for output from the in-flight submission and accept
    /// new ones right away.
    ///
    /// The backend call may still complete on the server.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        let stopped = lock(&self.submissions).active.take();
        if let Some(active) = stopped {
            active.token.cancel();
            if let Some((id, claim)) = active.claim {
                self.resolver.release_submission(id, claim);
            }
            state.submitting = false;
            activity::log_for(Kind::Submission, state.sequence.server_id, "Submission stopped by user");
        }
        state.status = None;
    }

    pub async fn submit(&self, mode: SubmitMode, with_retrieval: bool) -> SubmitOutcome {
        let (sequence, text, token, generation) = {
            let mut state = lock(&self.state);
            if state.submitting {
                return SubmitOutcome::Rejected(RejectReason::AlreadySubmitting);
            }
            if let Err(reason) = self.check(mode, &state) {
                return SubmitOutcome::Rejected(reason);
            }
            // Other submitters on the same sequence share this claim.
            let claim = match state.sequence.server_id {
                Some(id) => match self.resolver.try_claim_submission(id) {
                    Some(claim) => Some((id, claim)),
                    None => return SubmitOutcome::Rejected(RejectReason::AlreadySubmitting),
                },
                None => None,
            };

            state.submitting = true;
            state.last_failure = None;
            state.status = Some(
                match mode {
                    SubmitMode::SaveOnly => "Saving",
                    _ => "Submitting",
                }
                .to_string(),
            );
            if mode != SubmitMode::SaveOnly {
                state.response_text.clear();
            }

            let token = CancellationToken::new();
            let mut submissions = lock(&self.submissions);
            submissions.started += 1;
            let generation = submissions.started;
            submissions.active = Some(ActiveSubmission {
                generation,
                token: token.clone(),
                claim,
            });
            (state.sequence.clone(), state.draft_text.clone(), token, generation)
        };
        let _in_flight = InFlight {
            state: self.state.clone(),
            submissions: self.submissions.clone(),
            resolver: self.resolver.clone(),
            generation,
        };

        activity::log_for(
            Kind::Submission,
            sequence.server_id,
            format!("{:?} on {}", mode, sequence.display_name()),
        );

        match self.run(mode, with_retrieval, sequence, text, &token, generation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = e.to_string();
                let mut state = lock(&self.state);
                activity::log_for(
                    Kind::Warning,
                    state.sequence.server_id,
                    format!("Submission failed: {}", reason),
                );
                state.last_failure = Some(reason.clone());
                SubmitOutcome::Failed(reason)
            }
        }
    }

    fn check(&self, mode: SubmitMode, state: &SubmissionState) -> Result<(), RejectReason> {
        let has_text = !state.draft_text.trim().is_empty();
        match mode {
            SubmitMode::Continue => {
                if state.sequence.is_draft() {
                    return Err(RejectReason::NotYetSaved);
                }
                if !self.settings.allow_continuation() {
                    return Err(RejectReason::ContinuationDisabled);
                }
            }
            SubmitMode::Start if !state.sequence.is_draft() => return Err(RejectReason::AlreadySaved),
            SubmitMode::Extend if state.sequence.is_draft() => return Err(RejectReason::NotYetSaved),
            _ => {}
        }
        if mode != SubmitMode::Continue && !has_text {
            return Err(RejectReason::EmptyDraft);
        }
        Ok(())
    }

    async fn run(
        &self,
        mode: SubmitMode,
        with_retrieval: bool,
        sequence: ChatSequence,
        text: String,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<SubmitOutcome> {
        let sequence_id = if mode == SubmitMode::Continue {
            sequence
                .server_id
                .ok_or_else(|| anyhow!("cannot continue a sequence that was never saved"))?
        } else {
            match self.save_draft_text(&sequence, text, token, generation).await? {
                Some(id) => id,
                None => return Ok(SubmitOutcome::Cancelled),
            }
        };

        if mode == SubmitMode::SaveOnly {
            return Ok(SubmitOutcome::Saved { sequence_id });
        }

        let request = self.generation_request(sequence_id, with_retrieval);
        debug_eprintln!("[submission] generation request: {:?}", request);
        let mut stream = match until_cancelled(token, self.backend.generate(request)).await? {
            Some(stream) => stream,
            None => return Ok(SubmitOutcome::Cancelled),
        };

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(SubmitOutcome::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(text)) => {
                        lock(&self.state).response_text.push_str(&text);
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                },
            }
        }

        let response = {
            let mut state = lock(&self.state);
            let response = state.response_text.clone();
            state.sequence.messages.push(ChatMessage::assistant(response.clone()));
            response
        };
        activity::log_for(
            Kind::Submission,
            Some(sequence_id),
            format!("Sequence {} received {} bytes", sequence_id, response.len()),
        );
        Ok(SubmitOutcome::Completed {
            sequence_id,
            response,
        })
    }

    /// Save the draft text as a user message and attach it to a sequence,
    /// creating the sequence first if needed. `None` means cancelled.
    async fn save_draft_text(
        &self,
        sequence: &ChatSequence,
        text: String,
        token: &CancellationToken,
        generation: u64,
    ) -> Result<Option<SequenceId>> {
        let mut message = ChatMessage::user(text);
        let message_id = match until_cancelled(token, self.backend.construct_message(&message)).await? {
            Some(id) => id.ok_or_else(|| anyhow!("server did not return a message id"))?,
            None => return Ok(None),
        };
        message.server_id = Some(message_id);

        let sequence_id = match sequence.server_id {
            None => {
                let created = until_cancelled(
                    token,
                    self.backend
                        .create_sequence(message_id, sequence.human_desc.as_deref()),
                )
                .await?;
                let id = match created {
                    Some(id) => id.ok_or_else(|| anyhow!("server did not return a sequence id"))?,
                    None => return Ok(None),
                };
                self.adopt_sequence_id(id, generation);
                id
            }
            Some(current) => {
                let extended = until_cancelled(token, self.backend.extend_sequence(current, message_id)).await?;
                let id = match extended {
                    Some(id) => id.ok_or_else(|| anyhow!("server did not return a sequence id"))?,
                    None => return Ok(None),
                };
                // The server may fork the sequence under a new id.
                if id != current {
                    self.adopt_sequence_id(id, generation);
                }
                id
            }
        };

        let mut state = lock(&self.state);
        state.sequence.server_id = Some(sequence_id);
        // Text typed while the save was in progress belongs to the next message.
        if state.draft_text == message.content {
            state.draft_text.clear();
        }
        state.sequence.messages.push(message);
        Ok(Some(sequence_id))
    }

    /// Move this submitter's settings and in-flight claim to a new server id,
    /// and write the settings through to the store.
    fn adopt_sequence_id(&self, id: SequenceId, generation: u64) {
        self.resolver.register_settings(&self.settings, id);
        if let Err(e) = self.resolver.persist_sequence_settings(id) {
            activity::log_for(
                Kind::Warning,
                Some(id),
                format!("Could not save settings for sequence {}: {}", id, e),
            );
        }

        let mut submissions = lock(&self.submissions);
        let Some(active) = submissions.active.as_mut().filter(|a| a.generation == generation) else {
            return;
        };
        if let Some(claim) = self.resolver.try_claim_submission(id) {
            if let Some((old, old_claim)) = active.claim.replace((id, claim)) {
                self.resolver.release_submission(old, old_claim);
            }
        }
    }

    fn generation_request(&self, sequence_id: SequenceId, with_retrieval: bool) -> GenerationRequest {
        let settings = &self.settings;
        let requested = with_retrieval && settings.show_separate_retrieval_button();
        let retrieval_policy = if requested || settings.force_retrieval_active() {
            Some(non_empty(settings.retrieval_policy()).unwrap_or_else(|| self.fallback_retrieval_policy.clone()))
        } else {
            None
        };

        GenerationRequest {
            sequence_id,
            retrieval_search_args: retrieval_policy
                .as_ref()
                .and_then(|_| non_empty(settings.retrieval_search_args())),
            retrieval_policy,
            override_system_prompt: non_empty(settings.override_system_prompt()),
            override_model_template: non_empty(settings.override_model_template()),
            seed_assistant_response: non_empty(settings.seed_assistant_response()),
            autonaming_policy: settings.autonaming_policy(),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// `Ok(None)` when the token fires first.
async fn until_cancelled<T>(token: &CancellationToken, fut: BackendFuture<'_, T>) -> Result<Option<T>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Ok(None),
        result = fut => result.map(Some),
    }
}
