//! Conversation orchestrator: one chat turn from session load to reply.
//!
//! Flow of [`ConversationOrchestrator::handle_response`]:
//! 1. Load the session for the request scope
//! 2. Append the user turn and trim the history
//! 3. Optionally append search results as instruction turns
//! 4. Dispatch to the model's providers with failover
//! 5. On success append the reply, persist, and wrap it in the model header
//!
//! A failed dispatch is returned verbatim and nothing is persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use chatcord_core::config::BotConfig;
use chatcord_core::session::{push_user_turn, SessionStore};
use chatcord_core::storage::StorageError;
use chatcord_core::types::{ChatMessage, SessionRecord, SessionScope};
use chatcord_providers::failover::{DispatchOutcome, FailoverDispatcher};

use crate::presets::{find_preset, Preset};
use crate::search::{search_turns, SearchKind, SearchProvider};

/// Text returned when a turn fails unexpectedly.
pub fn critical_error_message(details: &str) -> String {
    format!(
        ":x: **Critical error:** Failed to process your request.\n\n\
         **Details:** ```{details}```"
    )
}

/// Header placed above every reply.
pub fn model_header(model: &str, bot_name: &str, version: &str) -> String {
    format!("**Model:** {model} | **{bot_name}** v{version}")
}

// ─────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub bot_name: String,
    pub version: String,
    pub max_history_length: usize,
    /// Serialise turns addressed to the same session.
    pub turn_lock: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for OrchestratorSettings {
    fn from(bot: &BotConfig) -> Self {
        Self {
            bot_name: bot.name.clone(),
            version: bot.version.clone(),
            max_history_length: bot.max_history_length.max(1),
            turn_lock: bot.turn_lock,
        }
    }
}

// ─────────────────────────────────────────────
// ConversationOrchestrator
// ─────────────────────────────────────────────

/// Composes session storage, history trimming, search and failover dispatch.
pub struct ConversationOrchestrator {
    sessions: Arc<SessionStore>,
    dispatcher: Arc<FailoverDispatcher>,
    search: Option<Arc<dyn SearchProvider>>,
    settings: OrchestratorSettings,
    /// One lock per scope with a turn in flight.
    turn_locks: StdMutex<HashMap<SessionScope, Arc<Mutex<()>>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        dispatcher: Arc<FailoverDispatcher>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            search: None,
            settings,
            turn_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Enable search augmentation.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Arc<FailoverDispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    // ─────────────────────────────────────────
    // Chat turn
    // ─────────────────────────────────────────

    /// Run one chat turn and return the text to show the user.
    ///
    /// Never fails: dispatch exhaustion returns the formatted provider error,
    /// anything unexpected (including a panic inside a provider) returns the
    /// critical-error template. The turn runs on its own task, so dropping
    /// this future does not abort an in-flight provider call.
    pub async fn handle_response(
        self: &Arc<Self>,
        user_id: Option<u64>,
        message: &str,
        search: Option<SearchKind>,
        channel_id: Option<u64>,
    ) -> String {
        let this = Arc::clone(self);
        let message = message.to_string();
        let turn = tokio::spawn(async move { this.run_turn(user_id, &message, search, channel_id).await });

        match turn.await {
            Ok(reply) => reply,
            Err(e) => {
                error!(user_id = ?user_id, error = %e, "chat turn failed");
                critical_error_message(&e.to_string())
            }
        }
    }

    async fn run_turn(
        &self,
        user_id: Option<u64>,
        message: &str,
        search: Option<SearchKind>,
        channel_id: Option<u64>,
    ) -> String {
        let scope = self.sessions.scope(user_id, channel_id);
        if !self.settings.turn_lock {
            return self.turn(scope, user_id, message, search, channel_id).await;
        }

        let lock = self.turn_lock(scope);
        let reply = {
            let _guard = lock.lock().await;
            self.turn(scope, user_id, message, search, channel_id).await
        };
        self.release_turn_lock(scope, lock);
        reply
    }

    async fn turn(
        &self,
        scope: SessionScope,
        user_id: Option<u64>,
        message: &str,
        search: Option<SearchKind>,
        channel_id: Option<u64>,
    ) -> String {
        let record = self.sessions.load(user_id, channel_id).await;
        let model = if record.model.is_empty() {
            self.sessions.default_model().to_string()
        } else {
            record.model.clone()
        };

        let mut history = push_user_turn(record.history, message, self.settings.max_history_length);
        if let Some(kind) = search {
            self.append_search_results(&mut history, message, kind).await;
        }

        debug!(scope = %scope, model = %model, turns = history.len(), "dispatching turn");
        let reply = match self.dispatcher.dispatch(&model, &history).await {
            DispatchOutcome::Reply { text, provider } => {
                info!(scope = %scope, model = %model, provider = %provider, "turn answered");
                text
            }
            DispatchOutcome::Exhausted { message } => return message,
        };

        history.push(ChatMessage::assistant(reply.clone()));
        let updated = SessionRecord {
            history,
            model: model.clone(),
            instruction: record.instruction,
        };
        // Already logged by the store; the reply is still delivered
        let _ = self.sessions.save(user_id, &updated, channel_id).await;

        format!(
            "{}\n\n{reply}",
            model_header(&model, &self.settings.bot_name, &self.settings.version)
        )
    }

    /// Append instruction turns built from search hits. Failures become a system note.
    async fn append_search_results(&self, history: &mut Vec<ChatMessage>, query: &str, kind: SearchKind) {
        let Some(search) = &self.search else {
            warn!(kind = %kind, "search requested but no search provider configured");
            history.push(ChatMessage::system("Search failed: web search is not configured."));
            return;
        };

        match search.search(query, kind).await {
            Ok(hits) => {
                debug!(kind = %kind, hits = hits.len(), "search results appended");
                history.extend(search_turns(query, kind, &hits).into_iter().map(ChatMessage::assistant));
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "search failed, continuing without results");
                history.push(ChatMessage::system(format!("Search failed: {e}")));
            }
        }
    }

    fn turn_lock(&self, scope: SessionScope) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(scope).or_default())
    }

    /// Forget the scope's lock once no other turn is holding or waiting on it.
    fn release_turn_lock(&self, scope: SessionScope, lock: Arc<Mutex<()>>) {
        let mut locks = self.turn_locks.lock().unwrap_or_else(|p| p.into_inner());
        // Map entry + ours
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&scope);
        }
    }

    /// Run the system channel's instruction as the first turn after startup.
    ///
    /// Returns `None` when no system channel is configured or it has no instruction.
    pub async fn start_prompt(self: &Arc<Self>) -> Option<String> {
        let Some(channel) = self.sessions.settings().system_channel else {
            warn!("no system channel configured, skipping start prompt");
            return None;
        };

        let record = self.sessions.load(None, Some(channel)).await;
        info!(size = record.instruction.len(), "system instruction loaded");
        if record.instruction.is_empty() {
            warn!("system instruction is empty, skipping start prompt");
            return None;
        }

        let reply = self.handle_response(None, &record.instruction, None, Some(channel)).await;
        info!("start prompt answered");
        Some(reply)
    }

    // ─────────────────────────────────────────
    // Session settings
    // ─────────────────────────────────────────

    /// Models with at least one registered provider, sorted.
    pub fn available_models(&self) -> Vec<String> {
        self.dispatcher.registry().models()
    }

    /// The model a user's DM session is using.
    pub async fn current_model(&self, user_id: u64) -> String {
        let record = self.sessions.load(Some(user_id), None).await;
        if record.model.is_empty() {
            self.sessions.default_model().to_string()
        } else {
            record.model
        }
    }

    /// Switch a user's model. Unknown models are rejected.
    pub async fn set_user_model(&self, user_id: u64, model: &str) -> anyhow::Result<()> {
        if !self.dispatcher.registry().contains_model(model) {
            anyhow::bail!("Unknown model '{model}'. Available: {}", self.available_models().join(", "));
        }
        let mut record = self.sessions.load(Some(user_id), None).await;
        record.model = model.to_string();
        self.sessions.save(Some(user_id), &record, None).await?;
        info!(user_id, model = %model, "model changed");
        Ok(())
    }

    /// Drop history and instruction, back to the default model.
    pub async fn reset_conversation_history(&self, user_id: u64) -> Result<(), StorageError> {
        let record = SessionRecord::new(self.sessions.default_model());
        self.sessions.save(Some(user_id), &record, None).await?;
        info!(user_id, "conversation reset");
        Ok(())
    }

    /// Replace the user's system instruction; a non-empty one becomes the first turn.
    pub async fn set_user_instruction(&self, user_id: u64, instruction: &str) -> Result<(), StorageError> {
        let mut record = self.sessions.load(Some(user_id), None).await;
        record.history.retain(|m| !m.is_system());
        if !instruction.is_empty() {
            record.history.insert(0, ChatMessage::system(instruction));
        }
        record.instruction = instruction.to_string();
        self.sessions.save(Some(user_id), &record, None).await?;
        info!(user_id, size = instruction.len(), "instruction set");
        Ok(())
    }

    /// Remove the user's instruction and every system turn.
    pub async fn reset_user_instruction(&self, user_id: u64) -> Result<(), StorageError> {
        let mut record = self.sessions.load(Some(user_id), None).await;
        record.history.retain(|m| !m.is_system());
        record.instruction.clear();
        if record.model.is_empty() {
            record.model = self.sessions.default_model().to_string();
        }
        self.sessions.save(Some(user_id), &record, None).await?;
        info!(user_id, "instruction reset");
        Ok(())
    }

    /// Apply a built-in preset as the user's instruction.
    pub async fn apply_preset(&self, user_id: u64, preset_id: &str) -> anyhow::Result<&'static Preset> {
        let preset = find_preset(preset_id).ok_or_else(|| anyhow::anyhow!("Unknown preset '{preset_id}'"))?;
        self.set_user_instruction(user_id, preset.instruction).await?;
        Ok(preset)
    }

    /// The stored history of a scope.
    pub async fn export_history(&self, user_id: Option<u64>, channel_id: Option<u64>) -> Vec<ChatMessage> {
        self.sessions.load(user_id, channel_id).await.history
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
