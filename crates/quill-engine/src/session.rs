use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use quill_core::conversation::Conversation;
use quill_core::ids::ConversationId;
use quill_core::messages::{Role, Turn};
use quill_core::persona::PersonaContext;
use quill_core::provider::{CompletionClient, CompletionOptions, FragmentStream};
use quill_core::stream::StreamFragment;
use quill_core::summarizer::Summarizer;
use quill_store::ConversationStore;

use crate::context::{build_context, estimate_context_tokens};
use crate::error::EngineError;
use crate::prompt::{DefaultPromptBuilder, PromptBuilder};
use crate::scheduler::{FoldOutcome, FoldPolicy, FoldScheduler};

const EVENT_CAPACITY: usize = 64;

/// Change notifications for whoever renders the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TurnAppended { role: Role, index: usize },
    Folded { from: usize, to: usize },
    FoldFailed { error: String },
    Reset { conversation_id: ConversationId },
}

/// One interactive writing session: the live conversation plus everything
/// needed to extend, fold, and persist it.
///
/// The conversation lock is never held across an `.await`.
pub struct WritingSession {
    name: String,
    conversation: Mutex<Conversation>,
    scheduler: FoldScheduler,
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn ConversationStore>,
    prompts: Arc<dyn PromptBuilder>,
    options: CompletionOptions,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl WritingSession {
    /// Resume `name` from the store, or start an empty conversation.
    #[instrument(skip_all, fields(session = %name))]
    pub fn open(
        name: &str,
        store: Arc<dyn ConversationStore>,
        client: Arc<dyn CompletionClient>,
        summarizer: Arc<dyn Summarizer>,
        policy: FoldPolicy,
        options: CompletionOptions,
    ) -> Result<Self, EngineError> {
        let conversation = match store.load(name)? {
            Some(conversation) => {
                info!(
                    turns = conversation.len(),
                    fold_boundary = conversation.fold_boundary(),
                    "resumed conversation"
                );
                conversation
            }
            None => {
                info!("starting new conversation");
                Conversation::empty()
            }
        };
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            name: name.to_string(),
            conversation: Mutex::new(conversation),
            scheduler: FoldScheduler::new(policy, summarizer),
            client,
            store,
            prompts: Arc::new(DefaultPromptBuilder),
            options,
            event_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// A copy of the current record.
    pub fn snapshot(&self) -> Conversation {
        self.conversation.lock().clone()
    }

    pub fn summary(&self) -> String {
        self.conversation.lock().summary().to_string()
    }

    pub async fn add_user_turn(&self, text: &str) -> Result<FoldOutcome, EngineError> {
        self.append(Role::User, text).await
    }

    pub async fn add_assistant_turn(&self, text: &str) -> Result<FoldOutcome, EngineError> {
        self.append(Role::Assistant, text).await
    }

    /// The scheduler runs even when the save fails; the save error is
    /// returned after the fold has been reported.
    async fn append(&self, role: Role, text: &str) -> Result<FoldOutcome, EngineError> {
        let (index, saved) = {
            let mut conv = self.conversation.lock();
            if role == Role::Assistant {
                conv.add_assistant_turn(text);
            } else {
                conv.add_user_turn(text);
            }
            (conv.len() - 1, self.persist(&conv))
        };
        self.send_event(SessionEvent::TurnAppended { role, index });

        let outcome = self.scheduler.maybe_fold(&self.conversation).await;
        let reported = self.report_fold(&outcome);
        saved.and(reported)?;
        Ok(outcome)
    }

    /// Publishes the outcome, then saves a successful fold.
    fn report_fold(&self, outcome: &FoldOutcome) -> Result<(), EngineError> {
        match outcome {
            FoldOutcome::Folded { from, to } => {
                self.send_event(SessionEvent::Folded { from: *from, to: *to });
                self.persist(&self.conversation.lock())?;
            }
            FoldOutcome::Failed(e) => {
                self.send_event(SessionEvent::FoldFailed { error: e.to_string() });
            }
            _ => {}
        }
        Ok(())
    }

    /// System turn plus unfolded turns, ready to send.
    pub fn build_context(&self, persona: &PersonaContext, action_hint: Option<&str>) -> Vec<Turn> {
        let conv = self.conversation.lock();
        build_context(&conv, persona, action_hint, self.prompts.as_ref())
    }

    pub fn token_estimate(&self, persona: &PersonaContext) -> u32 {
        estimate_context_tokens(&self.build_context(persona, None))
    }

    /// Stream a reply to the current context without recording anything.
    pub async fn stream_reply(&self, persona: &PersonaContext, action_hint: Option<&str>) -> FragmentStream {
        let turns = self.build_context(persona, action_hint);
        debug!(turns = turns.len(), tokens = estimate_context_tokens(&turns), "requesting reply");
        self.client.stream_complete(&turns, &self.options).await
    }

    /// Full exchange: record `text`, stream the reply through `on_fragment`,
    /// then record the assembled reply.
    ///
    /// An error fragment is surfaced as [`EngineError::Completion`] and is not
    /// recorded. An empty reply is not recorded either.
    #[instrument(skip_all, fields(session = %self.name))]
    pub async fn reply<F>(
        &self,
        text: &str,
        persona: &PersonaContext,
        action_hint: Option<&str>,
        mut on_fragment: F,
    ) -> Result<String, EngineError>
    where
        F: FnMut(&StreamFragment) + Send,
    {
        self.add_user_turn(text).await?;

        let mut stream = self.stream_reply(persona, action_hint).await;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            on_fragment(&fragment);
            match fragment {
                StreamFragment::Text(t) => reply.push_str(&t),
                StreamFragment::Error(e) => {
                    warn!(kind = e.error_kind(), error = %e, "reply failed");
                    return Err(e.into());
                }
            }
        }
        drop(stream);

        if reply.is_empty() {
            warn!("reply stream ended without text");
            return Ok(reply);
        }
        self.add_assistant_turn(&reply).await?;
        Ok(reply)
    }

    /// Replace the conversation with a fresh one.
    ///
    /// With `carry_over`, every unfolded turn is folded first and the new
    /// conversation is seeded with the resulting summary. If that fold fails
    /// the existing summary is carried as is.
    #[instrument(skip(self), fields(session = %self.name))]
    pub async fn start_new_conversation(&self, carry_over: bool) -> Result<ConversationId, EngineError> {
        let seed = if carry_over {
            let outcome = self.scheduler.fold(&self.conversation, 0).await;
            if let FoldOutcome::Failed(e) = &outcome {
                warn!(error = %e, "carry-over fold failed, carrying previous summary");
            }
            // The reset below saves the whole record again.
            let _ = self.report_fold(&outcome);
            self.summary()
        } else {
            String::new()
        };

        let fresh = Conversation::new(seed);
        let id = fresh.id().clone();
        {
            let mut conv = self.conversation.lock();
            *conv = fresh;
            self.persist(&conv)?;
        }
        info!(conversation_id = %id, carry_over, "started new conversation");
        self.send_event(SessionEvent::Reset {
            conversation_id: id.clone(),
        });
        Ok(id)
    }

    fn persist(&self, conversation: &Conversation) -> Result<(), EngineError> {
        self.store.save(&self.name, conversation).map_err(|e| {
            error!(error = %e, "failed to persist conversation");
            EngineError::Store(e)
        })
    }

    fn send_event(&self, event: SessionEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use quill_core::errors::CompletionError;
    use quill_llm::{MockCompletionClient, MockReply};
    use quill_store::{JsonFileStore, SqliteStore, StoreError};

    use super::*;

    struct CountingSummarizer {
        fail: bool,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn update(&self, existing: &str, new_text: &str) -> Result<String, CompletionError> {
            if self.fail {
                return Err(CompletionError::Transport("offline".into()));
            }
            Ok(format!("{existing}|{} lines", new_text.lines().count()))
        }
    }

    /// Store that refuses every write.
    struct ReadOnlyStore;

    impl ConversationStore for ReadOnlyStore {
        fn load(&self, _: &str) -> Result<Option<Conversation>, StoreError> {
            Ok(None)
        }
        fn save(&self, _: &str, _: &Conversation) -> Result<(), StoreError> {
            Err(StoreError::Io("read-only".into()))
        }
        fn list(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    fn session_with(
        store: Arc<dyn ConversationStore>,
        client: Arc<MockCompletionClient>,
        fail_summaries: bool,
        policy: FoldPolicy,
    ) -> WritingSession {
        WritingSession::open(
            "test",
            store,
            client,
            Arc::new(CountingSummarizer { fail: fail_summaries }),
            policy,
            CompletionOptions::default(),
        )
        .unwrap()
    }

    fn persona() -> PersonaContext {
        PersonaContext::new("A desert caravan.", "Tomas, a map-maker.")
    }

    #[tokio::test]
    async fn reply_records_both_turns_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let client = Arc::new(MockCompletionClient::new(vec![MockReply::fragments(&["Dunes ", "shift."])]));
        let session = session_with(store.clone(), client.clone(), false, FoldPolicy::default());

        let mut seen = Vec::new();
        let reply = session
            .reply("Look north.", &persona(), Some("wind rises"), |f| seen.push(f.clone()))
            .await
            .unwrap();

        assert_eq!(reply, "Dunes shift.");
        assert_eq!(seen.len(), 2);
        let conv = session.snapshot();
        assert_eq!(conv.turns(), &[Turn::user("Look north."), Turn::assistant("Dunes shift.")]);

        let sent = client.last_request().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("wind rises"));
        assert!(sent[0].content.contains("Tomas, a map-maker."));

        let stored = store.load("test").unwrap().unwrap();
        assert_eq!(stored, conv);
    }

    #[tokio::test]
    async fn error_fragment_is_not_recorded() {
        let client = Arc::new(MockCompletionClient::new(vec![MockReply::Error(CompletionError::Upstream {
            status: 401,
            body: "bad key".into(),
        })]));
        let session = session_with(Arc::new(SqliteStore::in_memory().unwrap()), client, false, FoldPolicy::default());

        let err = session.reply("Hello?", &persona(), None, |_| {}).await.unwrap_err();
        assert!(matches!(err, EngineError::Completion(CompletionError::Upstream { status: 401, .. })));
        assert_eq!(session.snapshot().turns(), &[Turn::user("Hello?")]);
    }

    #[tokio::test]
    async fn events_follow_appends_and_folds() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let policy = FoldPolicy { max_turns: 1, keep_count: 1 };
        let session = session_with(Arc::new(SqliteStore::in_memory().unwrap()), client, false, policy);
        let mut events = session.subscribe();

        session.add_user_turn("one").await.unwrap();
        session.add_assistant_turn("two").await.unwrap();
        let outcome = session.add_user_turn("three").await.unwrap();
        assert_eq!(outcome, FoldOutcome::Folded { from: 0, to: 2 });

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                SessionEvent::TurnAppended { role: Role::User, index: 0 },
                SessionEvent::TurnAppended { role: Role::Assistant, index: 1 },
                SessionEvent::TurnAppended { role: Role::User, index: 2 },
                SessionEvent::Folded { from: 0, to: 2 },
            ]
        );
        assert_eq!(session.summary(), "|2 lines");
    }

    #[tokio::test]
    async fn failed_fold_is_reported_and_state_kept() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let policy = FoldPolicy { max_turns: 1, keep_count: 0 };
        let session = session_with(Arc::new(SqliteStore::in_memory().unwrap()), client, true, policy);
        let mut events = session.subscribe();

        for text in ["a", "b", "c"] {
            session.add_user_turn(text).await.unwrap();
        }
        let conv = session.snapshot();
        assert_eq!(conv.fold_boundary(), 0);
        assert!(conv.summary().is_empty());

        let mut failures = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::FoldFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn context_shrinks_after_fold() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let session = session_with(
            Arc::new(SqliteStore::in_memory().unwrap()),
            client,
            false,
            FoldPolicy { max_turns: 10, keep_count: 4 },
        );
        for i in 0..21 {
            session.add_user_turn(&format!("turn {i}")).await.unwrap();
        }
        let ctx = session.build_context(&persona(), None);
        assert_eq!(ctx.len(), 1 + 4);
        assert!(session.token_estimate(&persona()) > 0);
    }

    #[tokio::test]
    async fn new_conversation_with_carry_over_seeds_summary() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let session = session_with(store.clone(), client, false, FoldPolicy::default());
        session.add_user_turn("x").await.unwrap();
        session.add_assistant_turn("y").await.unwrap();
        let old_id = session.snapshot().id().clone();
        let mut events = session.subscribe();

        let new_id = session.start_new_conversation(true).await.unwrap();
        assert_ne!(new_id, old_id);
        let conv = session.snapshot();
        assert!(conv.is_empty());
        assert_eq!(conv.fold_boundary(), 0);
        assert_eq!(conv.summary(), "|2 lines");
        assert_eq!(store.load("test").unwrap().unwrap().id(), &new_id);

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(received.last(), Some(&SessionEvent::Reset { conversation_id: new_id }));
    }

    #[tokio::test]
    async fn carry_over_falls_back_to_previous_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let mut seeded = Conversation::new("Chapter one in brief.");
        seeded.add_user_turn("more");
        store.save("test", &seeded).unwrap();

        let client = Arc::new(MockCompletionClient::new(vec![]));
        let session = session_with(store, client, true, FoldPolicy::default());
        assert_eq!(session.snapshot(), seeded);

        session.start_new_conversation(true).await.unwrap();
        assert_eq!(session.summary(), "Chapter one in brief.");
    }

    #[tokio::test]
    async fn new_conversation_without_carry_over_is_blank() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let session = session_with(Arc::new(SqliteStore::in_memory().unwrap()), client, false, FoldPolicy::default());
        session.add_user_turn("x").await.unwrap();
        session.start_new_conversation(false).await.unwrap();
        assert!(session.summary().is_empty());
        assert!(session.snapshot().is_empty());
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_store_error() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let session = session_with(Arc::new(ReadOnlyStore), client, false, FoldPolicy::default());
        let err = session.add_user_turn("lost?").await.unwrap_err();
        assert!(matches!(err, EngineError::Store(StoreError::Io(_))));
        // The in-memory record still has the turn.
        assert_eq!(session.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn folds_keep_running_while_saves_fail() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let policy = FoldPolicy { max_turns: 1, keep_count: 0 };
        let session = session_with(Arc::new(ReadOnlyStore), client, false, policy);
        let mut events = session.subscribe();

        for i in 0..10 {
            let err = session.add_user_turn(&format!("line {i}")).await.unwrap_err();
            assert!(matches!(err, EngineError::Store(_)));
        }

        let conv = session.snapshot();
        assert_eq!(conv.len(), 10);
        assert_eq!(conv.fold_boundary(), 9);
        assert!(conv.unfolded_count() <= 2 * policy.max_turns);

        let folds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, SessionEvent::Folded { .. }))
            .collect();
        assert_eq!(
            folds,
            vec![
                SessionEvent::Folded { from: 0, to: 3 },
                SessionEvent::Folded { from: 3, to: 6 },
                SessionEvent::Folded { from: 6, to: 9 },
            ]
        );
    }

    #[tokio::test]
    async fn carry_over_reset_survives_failed_fold_save() {
        let client = Arc::new(MockCompletionClient::new(vec![]));
        let session = session_with(Arc::new(ReadOnlyStore), client, false, FoldPolicy::default());
        let _ = session.add_user_turn("x").await;

        let err = session.start_new_conversation(true).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        let conv = session.snapshot();
        assert!(conv.is_empty());
        assert_eq!(conv.summary(), "|1 lines");
    }
}
