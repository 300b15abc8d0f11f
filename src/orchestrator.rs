use crate::providers::ModelConfig;
use crate::session::{ModelStreamSession, SessionState, StreamPolicy};
use crate::store::ConversationStore;
use crate::title::ChatTitleGenerator;
use crate::transport::Transport;
use crate::types::{ChatId, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct OrchestratorConfig {
    /// Leading instruction message for every model's history.
    pub system_prompt: String,
    pub policy: StreamPolicy,
    /// Model used for one-shot title summarization; `None` disables
    /// automatic titling entirely.
    pub title_model: Option<ModelConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            policy: StreamPolicy::default(),
            title_model: None,
        }
    }
}

/// Sends one user turn to every active model at once.
///
/// Each model gets its own independent session and cancellation handle; one
/// model failing never blocks or blanks the others. `send` resolves only
/// when every session has reached a terminal state.
pub struct FanOutOrchestrator {
    store: Arc<ConversationStore>,
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    /// Parent cancellation token per in-flight batch.
    batches: Mutex<HashMap<u64, CancellationToken>>,
    next_batch: AtomicU64,
    generating_tx: watch::Sender<bool>,
}

impl FanOutOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        transport: Arc<dyn Transport>,
        config: OrchestratorConfig,
    ) -> Self {
        let (generating_tx, _) = watch::channel(false);
        Self {
            store,
            transport,
            config,
            batches: Mutex::new(HashMap::new()),
            next_batch: AtomicU64::new(0),
            generating_tx,
        }
    }

    /// Convenience for the UI submit path: append the user turn, then fan
    /// it out.
    pub async fn send_message(
        &self,
        chat_id: &ChatId,
        content: impl Into<String>,
        models: &[ModelConfig],
    ) -> Result<()> {
        let msg_index = self
            .store
            .add_user_message(chat_id, content, Vec::new(), Vec::new())?;
        self.send(chat_id, msg_index, models).await
    }

    /// Fan the user message at `msg_index` out to every model. Resolves
    /// once all sessions settle, regardless of how each one ended.
    pub async fn send(
        &self,
        chat_id: &ChatId,
        msg_index: usize,
        models: &[ModelConfig],
    ) -> Result<()> {
        if models.is_empty() {
            return Ok(());
        }

        let batch = CancellationToken::new();
        let mut sessions = Vec::with_capacity(models.len());
        for model in models {
            let history =
                self.store
                    .build_history_for_model(chat_id, &model.id, &self.config.system_prompt)?;
            let session = ModelStreamSession::new(
                self.store.clone(),
                self.transport.clone(),
                self.config.policy.clone(),
                model.clone(),
                *chat_id,
                msg_index,
                history,
                self.store.message_has_images(chat_id, msg_index),
            )
            .with_token(batch.child_token());
            sessions.push(session.run());
        }

        let batch_id = self.register_batch(batch);
        let _ = self.generating_tx.send(true);

        let outcomes = futures_util::future::join_all(sessions).await;

        self.unregister_batch(batch_id);
        if !self.has_inflight_batches() {
            let _ = self.generating_tx.send(false);
        }

        let failed = outcomes
            .iter()
            .filter(|s| **s == SessionState::Errored)
            .count();
        tracing::info!(
            "Fan-out for chat {} settled: {} sessions, {} errored",
            chat_id.short(),
            outcomes.len(),
            failed
        );

        self.spawn_title_generation(*chat_id);
        Ok(())
    }

    /// Cancel every in-flight session. Safe to call at any time, any number
    /// of times; stopping nothing is a no-op.
    pub fn stop_all(&self) {
        let batches = match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for token in batches.values() {
            token.cancel();
        }
    }

    pub fn is_generating(&self) -> bool {
        *self.generating_tx.borrow()
    }

    /// Observable generating flag for the UI.
    pub fn generating(&self) -> watch::Receiver<bool> {
        self.generating_tx.subscribe()
    }

    fn spawn_title_generation(&self, chat_id: ChatId) {
        let Some(title_model) = self.config.title_model.clone() else {
            return;
        };
        let generator = ChatTitleGenerator::new(self.transport.clone(), title_model);
        let store = self.store.clone();
        // Fire-and-forget relative to the main flow.
        tokio::spawn(async move {
            generator.ensure_title(&store, &chat_id).await;
        });
    }

    fn register_batch(&self, token: CancellationToken) -> u64 {
        let id = self.next_batch.fetch_add(1, Ordering::Relaxed);
        match self.batches.lock() {
            Ok(mut guard) => {
                guard.insert(id, token);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, token);
            }
        }
        id
    }

    fn unregister_batch(&self, id: u64) {
        match self.batches.lock() {
            Ok(mut guard) => {
                guard.remove(&id);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&id);
            }
        }
    }

    fn has_inflight_batches(&self) -> bool {
        match self.batches.lock() {
            Ok(guard) => !guard.is_empty(),
            Err(poisoned) => !poisoned.into_inner().is_empty(),
        }
    }
}
