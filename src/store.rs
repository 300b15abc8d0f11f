use crate::types::{ChatId, ChorusError, Result, Role};
use crate::wire::{WireContent, WireFile, WireImageUrl, WireMessage, WirePart};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

/// One conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    /// model id -> message index -> that model's answer to that message.
    pub responses: HashMap<String, BTreeMap<usize, Response>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            title: None,
            messages: Vec::new(),
            responses: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn user_messages(&self) -> impl Iterator<Item = (usize, &Message)> {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64 payload for attachments carried inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Attachment {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            name: None,
            url: Some(url.into()),
            mime_type: None,
            data: None,
        }
    }

    pub fn inline(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            url: None,
            mime_type: Some(mime_type.into()),
            data: Some(data.into()),
        }
    }

    pub fn as_url(&self) -> String {
        match &self.url {
            Some(u) => u.clone(),
            None => format!(
                "data:{};base64,{}",
                self.mime_type.as_deref().unwrap_or("application/octet-stream"),
                self.data.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// One model's answer to one user message. Exactly one of these exists per
/// (model, message index) slot; streaming updates merge into it in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Fixed once reasoning ends; never recomputed afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_time: Option<String>,
    pub streaming: bool,
    #[serde(default)]
    pub stopped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported: Option<String>,
}

impl Response {
    /// A normally-finished answer usable as history for the next turn.
    pub fn is_complete(&self) -> bool {
        !self.streaming
            && !self.stopped
            && self.error.is_none()
            && self.unsupported.is_none()
            && !self.content.is_empty()
    }

    fn apply(&mut self, patch: ResponsePatch) {
        if patch.reset {
            *self = Response {
                streaming: true,
                ..Default::default()
            };
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(thinking) = patch.thinking {
            self.thinking = Some(thinking);
        }
        if let Some(thinking_time) = patch.thinking_time {
            self.thinking_time = Some(thinking_time);
        }
        if let Some(streaming) = patch.streaming {
            self.streaming = streaming;
        }
        // Terminal outcomes are mutually exclusive; the last one wins.
        if let Some(message) = patch.error {
            self.error = Some(message);
            self.stopped = false;
            self.unsupported = None;
        }
        if patch.stopped {
            self.stopped = true;
            self.error = None;
            self.unsupported = None;
        }
        if let Some(message) = patch.unsupported {
            self.unsupported = Some(message);
            self.stopped = false;
            self.error = None;
        }
    }
}

/// Partial update for one response slot. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ResponsePatch {
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub thinking_time: Option<String>,
    pub streaming: Option<bool>,
    pub stopped: bool,
    pub error: Option<String>,
    pub unsupported: Option<String>,
    /// Wipe the slot first: a new attempt starts its text fresh.
    pub reset: bool,
}

impl ResponsePatch {
    pub fn fresh_attempt() -> Self {
        Self {
            reset: true,
            streaming: Some(true),
            ..Default::default()
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            streaming: Some(false),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn stopped() -> Self {
        Self {
            streaming: Some(false),
            stopped: true,
            ..Default::default()
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self {
            streaming: Some(false),
            unsupported: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    ChatCreated { chat_id: ChatId },
    ChatDeleted { chat_id: ChatId },
    ActiveChatChanged { chat_id: Option<ChatId> },
    MessageAdded { chat_id: ChatId, index: usize },
    ResponseUpdated { chat_id: ChatId, model_id: String, index: usize },
    TitleChanged { chat_id: ChatId, title: String },
}

/// Serializable whole-store state: no live handles, so an external
/// persistence layer can snapshot it under a single key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub chats: Vec<Chat>,
    pub active_chat: Option<ChatId>,
}

/// The only shared mutable state in the system. Sessions write through
/// slot-scoped merges; the UI reads and subscribes to change events.
pub struct ConversationStore {
    inner: RwLock<StoreSnapshot>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(snapshot),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read().clone()
    }

    pub fn create_chat(&self) -> ChatId {
        let chat = Chat::new();
        let id = chat.id;
        {
            let mut inner = self.write();
            inner.chats.push(chat);
            inner.active_chat = Some(id);
        }
        self.emit(StoreEvent::ChatCreated { chat_id: id });
        self.emit(StoreEvent::ActiveChatChanged { chat_id: Some(id) });
        id
    }

    pub fn delete_chat(&self, id: &ChatId) -> Result<()> {
        let new_active = {
            let mut inner = self.write();
            let before = inner.chats.len();
            inner.chats.retain(|c| c.id != *id);
            if inner.chats.len() == before {
                return Err(ChorusError::UnknownChat(id.short()).into());
            }
            if inner.active_chat == Some(*id) {
                inner.active_chat = inner.chats.last().map(|c| c.id);
                Some(inner.active_chat)
            } else {
                None
            }
        };
        self.emit(StoreEvent::ChatDeleted { chat_id: *id });
        if let Some(active) = new_active {
            self.emit(StoreEvent::ActiveChatChanged { chat_id: active });
        }
        Ok(())
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.read().active_chat
    }

    pub fn set_active(&self, id: &ChatId) -> Result<()> {
        {
            let mut inner = self.write();
            if !inner.chats.iter().any(|c| c.id == *id) {
                return Err(ChorusError::UnknownChat(id.short()).into());
            }
            inner.active_chat = Some(*id);
        }
        self.emit(StoreEvent::ActiveChatChanged { chat_id: Some(*id) });
        Ok(())
    }

    pub fn chat(&self, id: &ChatId) -> Option<Chat> {
        self.read().chats.iter().find(|c| c.id == *id).cloned()
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        self.read().chats.iter().map(|c| c.id).collect()
    }

    /// Append one user turn; returns its index for response slotting.
    pub fn add_user_message(
        &self,
        id: &ChatId,
        content: impl Into<String>,
        images: Vec<Attachment>,
        files: Vec<Attachment>,
    ) -> Result<usize> {
        let index = {
            let mut inner = self.write();
            let chat = Self::chat_mut(&mut inner, id)?;
            chat.messages.push(Message {
                role: Role::User,
                content: content.into(),
                images,
                files,
            });
            chat.updated_at = Utc::now();
            chat.messages.len() - 1
        };
        self.emit(StoreEvent::MessageAdded {
            chat_id: *id,
            index,
        });
        Ok(index)
    }

    /// Merge a partial update into the `(model, msg_index)` slot, creating
    /// it on first touch. Called many times per second while streaming.
    pub fn update_response(
        &self,
        id: &ChatId,
        model_id: &str,
        msg_index: usize,
        patch: ResponsePatch,
    ) -> Result<()> {
        {
            let mut inner = self.write();
            let chat = Self::chat_mut(&mut inner, id)?;
            let slot = chat
                .responses
                .entry(model_id.to_string())
                .or_default()
                .entry(msg_index)
                .or_default();
            slot.apply(patch);
            chat.updated_at = Utc::now();
        }
        self.emit(StoreEvent::ResponseUpdated {
            chat_id: *id,
            model_id: model_id.to_string(),
            index: msg_index,
        });
        Ok(())
    }

    pub fn response(&self, id: &ChatId, model_id: &str, msg_index: usize) -> Option<Response> {
        self.read()
            .chats
            .iter()
            .find(|c| c.id == *id)?
            .responses
            .get(model_id)?
            .get(&msg_index)
            .cloned()
    }

    pub fn message_has_images(&self, id: &ChatId, msg_index: usize) -> bool {
        self.read()
            .chats
            .iter()
            .find(|c| c.id == *id)
            .and_then(|c| c.messages.get(msg_index))
            .map(|m| !m.images.is_empty())
            .unwrap_or(false)
    }

    pub fn title(&self, id: &ChatId) -> Option<String> {
        self.read()
            .chats
            .iter()
            .find(|c| c.id == *id)
            .and_then(|c| c.title.clone())
    }

    pub fn set_title(&self, id: &ChatId, title: impl Into<String>) -> Result<()> {
        let title = title.into();
        {
            let mut inner = self.write();
            let chat = Self::chat_mut(&mut inner, id)?;
            chat.title = Some(title.clone());
            chat.updated_at = Utc::now();
        }
        self.emit(StoreEvent::TitleChanged {
            chat_id: *id,
            title,
        });
        Ok(())
    }

    /// The message list sent to one model: a leading instruction message,
    /// then each user turn followed by that model's own completed answer.
    /// A model only ever sees its own history, which is what keeps the
    /// fan-out genuinely independent per model.
    pub fn build_history_for_model(
        &self,
        id: &ChatId,
        model_id: &str,
        system_prompt: &str,
    ) -> Result<Vec<WireMessage>> {
        let inner = self.read();
        let chat = inner
            .chats
            .iter()
            .find(|c| c.id == *id)
            .ok_or_else(|| ChorusError::UnknownChat(id.short()))?;

        let mut history = vec![WireMessage::system(system_prompt)];
        for (index, message) in chat.user_messages() {
            history.push(Self::user_wire_message(message));
            if let Some(answer) = chat
                .responses
                .get(model_id)
                .and_then(|slots| slots.get(&index))
            {
                if answer.is_complete() {
                    history.push(WireMessage::assistant(answer.content.clone()));
                }
            }
        }
        Ok(history)
    }

    fn user_wire_message(message: &Message) -> WireMessage {
        if message.images.is_empty() && message.files.is_empty() {
            return WireMessage::user_text(message.content.clone());
        }
        let mut parts = vec![WirePart::Text {
            text: message.content.clone(),
        }];
        for image in &message.images {
            parts.push(WirePart::ImageUrl {
                image_url: WireImageUrl {
                    url: image.as_url(),
                },
            });
        }
        for file in &message.files {
            parts.push(WirePart::File {
                file: WireFile {
                    filename: file.name.clone().unwrap_or_else(|| "attachment".to_string()),
                    file_data: file.data.clone().unwrap_or_default(),
                },
            });
        }
        WireMessage::User {
            content: WireContent::Parts(parts),
        }
    }

    fn chat_mut<'a>(inner: &'a mut StoreSnapshot, id: &ChatId) -> Result<&'a mut Chat> {
        inner
            .chats
            .iter_mut()
            .find(|c| c.id == *id)
            .ok_or_else(|| ChorusError::UnknownChat(id.short()).into())
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreSnapshot> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreSnapshot> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
