//! Summarization scheduler.
//!
//! After every append the scheduler checks whether more than
//! `2 * max_turns` turns sit past the fold boundary. If so it folds
//! `turns[boundary..len - keep_count]` into the running summary.
//!
//! A fold works on a snapshot: the conversation lock is released for the
//! summarizer round trip, so appends can continue meanwhile. The result is
//! applied only if the conversation is still the same record with the same
//! boundary. At most one fold runs at a time; a trigger during a fold is a
//! no-op. A failed fold leaves the conversation untouched and the next
//! trigger tries again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use quill_core::conversation::Conversation;
use quill_core::errors::CompletionError;
use quill_core::messages::render_transcript;
use quill_core::summarizer::Summarizer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FoldPolicy {
    /// A fold fires once unfolded turns exceed twice this.
    pub max_turns: usize,
    /// Most recent turns left out of a triggered fold.
    pub keep_count: usize,
}

impl Default for FoldPolicy {
    fn default() -> Self {
        Self {
            max_turns: 10,
            keep_count: 4,
        }
    }
}

impl FoldPolicy {
    pub fn should_fold(&self, conversation: &Conversation) -> bool {
        conversation.unfolded_count() > 2 * self.max_turns
    }
}

/// Exclusive end of the slice a fold keeping `keep_count` turns would cover,
/// or `None` when that slice is empty.
pub fn fold_end_index(conversation: &Conversation, keep_count: usize) -> Option<usize> {
    let end = conversation.len().saturating_sub(keep_count);
    (end > conversation.fold_boundary()).then_some(end)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FoldOutcome {
    /// Below the threshold.
    NotNeeded,
    /// Another fold is in flight.
    AlreadyFolding,
    /// `end_index <= fold_boundary`; nothing changed.
    NothingToFold,
    Folded { from: usize, to: usize },
    /// Summarizer failed; summary and boundary are unchanged.
    Failed(CompletionError),
    /// The conversation was replaced or folded elsewhere while summarizing;
    /// the result was discarded.
    Stale,
}

impl FoldOutcome {
    pub fn is_folded(&self) -> bool {
        matches!(self, Self::Folded { .. })
    }
}

pub struct FoldScheduler {
    policy: FoldPolicy,
    summarizer: Arc<dyn Summarizer>,
    folding: AtomicBool,
}

/// Clears the in-flight flag when the fold future completes or is dropped.
struct FoldingGuard<'a>(&'a AtomicBool);

impl Drop for FoldingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FoldScheduler {
    pub fn new(policy: FoldPolicy, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            policy,
            summarizer,
            folding: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> FoldPolicy {
        self.policy
    }

    pub fn is_folding(&self) -> bool {
        self.folding.load(Ordering::Acquire)
    }

    /// Run after an append: fold with the policy's keep count if over threshold.
    pub async fn maybe_fold(&self, conversation: &Mutex<Conversation>) -> FoldOutcome {
        let due = self.policy.should_fold(&conversation.lock());
        if !due {
            return FoldOutcome::NotNeeded;
        }
        self.fold(conversation, self.policy.keep_count).await
    }

    /// Fold regardless of the threshold, leaving `keep_count` recent turns.
    #[instrument(skip_all, fields(keep_count = keep_count))]
    pub async fn fold(&self, conversation: &Mutex<Conversation>, keep_count: usize) -> FoldOutcome {
        if self
            .folding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("fold already in flight");
            return FoldOutcome::AlreadyFolding;
        }
        let _guard = FoldingGuard(&self.folding);

        let (id, boundary, end, existing, transcript) = {
            let conv = conversation.lock();
            let Some(end) = fold_end_index(&conv, keep_count) else {
                return FoldOutcome::NothingToFold;
            };
            let boundary = conv.fold_boundary();
            (
                conv.id().clone(),
                boundary,
                end,
                conv.summary().to_string(),
                render_transcript(&conv.turns()[boundary..end]),
            )
        };

        let summary = match self.summarizer.update(&existing, &transcript).await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(kind = error.error_kind(), error = %error, boundary, end, "fold failed, will retry on next trigger");
                return FoldOutcome::Failed(error);
            }
        };

        let mut conv = conversation.lock();
        if conv.id() != &id || conv.fold_boundary() != boundary {
            warn!(boundary, end, "conversation changed during fold, discarding summary");
            return FoldOutcome::Stale;
        }
        if !conv.apply_fold(summary, end) {
            return FoldOutcome::NothingToFold;
        }
        info!(from = boundary, to = end, remaining = conv.unfolded_count(), "folded turns into summary");
        FoldOutcome::Folded { from: boundary, to: end }
    }
}
