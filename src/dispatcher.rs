//! Per-message orchestration: resolve recipients, translate once per
//! distinct language, reply to the original message.

use crate::resolver::{LanguageGroup, Resolver};
use crate::settings::UserId;
use crate::translator::{TranslationResult, Translator};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Private,
    Group,
    Channel,
}

/// A text message as delivered by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub sender_id: UserId,
    pub message_id: i64,
    pub text: String,
    pub chat_type: ChatType,
}

impl InboundEvent {
    pub fn is_command(&self) -> bool {
        self.text.trim_start().starts_with('/')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub chat_id: i64,
    pub reply_to_message_id: i64,
    pub body_text: String,
}

/// Where replies go. The Telegram client in production, a recorder in tests.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: &OutboundReply) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Resolving,
    /// Number of distinct languages in flight
    Translating(usize),
    /// Number of replies being sent
    Replying(usize),
    Done,
    Failed,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub state: DispatchState,
    pub languages: usize,
    pub replies_sent: usize,
    /// Languages whose slot produced no reply
    pub dropped: Vec<String>,
}

impl DispatchReport {
    fn finished(state: DispatchState) -> Self {
        Self {
            state,
            languages: 0,
            replies_sent: 0,
            dropped: Vec::new(),
        }
    }
}

/// Body of a translation reply.
pub fn format_reply(result: &TranslationResult) -> String {
    format!(
        "{}\n🗣 {}",
        result.translated_text, result.phonetic_rendering
    )
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn preview(text: &str) -> String {
    if text.chars().count() > 50 {
        format!("{}...", text.chars().take(50).collect::<String>())
    } else {
        text.to_string()
    }
}

pub struct Dispatcher {
    resolver: Resolver,
    translator: Arc<dyn Translator>,
    sink: Arc<dyn ReplySink>,
}

impl Dispatcher {
    pub fn new(resolver: Resolver, translator: Arc<dyn Translator>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            resolver,
            translator,
            sink,
        }
    }

    /// Process one inbound message to completion.
    ///
    /// Never returns an error: every failure is logged and reflected in the
    /// report so the caller can move on to the next message.
    pub async fn dispatch(&self, event: &InboundEvent, members: Option<&[UserId]>) -> DispatchReport {
        let mut state = DispatchState::Received;

        if event.chat_type != ChatType::Group {
            debug!("Skipping message {} - not in a group chat", event.message_id);
            return DispatchReport::finished(DispatchState::Done);
        }
        if event.is_command() || event.text.trim().is_empty() {
            debug!("Skipping message {} - command or empty", event.message_id);
            return DispatchReport::finished(DispatchState::Done);
        }

        info!(
            "Processing message from user {} in chat {}: {}",
            event.sender_id,
            event.chat_id,
            preview(&event.text)
        );

        transition(event, &mut state, DispatchState::Resolving);
        let resolution = match self.resolver.resolve(event.sender_id, members).await {
            Ok(resolution) => resolution,
            Err(e) => {
                error!("Could not resolve recipients for message {}: {}", event.message_id, e);
                transition(event, &mut state, DispatchState::Failed);
                return DispatchReport::finished(state);
            }
        };

        if resolution.is_empty() {
            debug!("No recipients want message {} translated", event.message_id);
            transition(event, &mut state, DispatchState::Done);
            return DispatchReport::finished(state);
        }

        let groups = resolution.into_groups();
        let languages = groups.len();
        transition(event, &mut state, DispatchState::Translating(languages));

        let translations = join_all(groups.iter().map(|group| self.translate_slot(event, group))).await;

        let mut dropped = Vec::new();
        let mut replies = Vec::new();
        for (group, outcome) in groups.iter().zip(translations) {
            match outcome {
                Some(body_text) => replies.push((
                    group,
                    OutboundReply {
                        chat_id: event.chat_id,
                        reply_to_message_id: event.message_id,
                        body_text,
                    },
                )),
                None => dropped.push(group.target_language.clone()),
            }
        }

        if replies.is_empty() {
            warn!(
                "No translations produced for message {} ({} languages)",
                event.message_id, languages
            );
            transition(event, &mut state, DispatchState::Failed);
            return DispatchReport {
                state,
                languages,
                replies_sent: 0,
                dropped,
            };
        }

        transition(event, &mut state, DispatchState::Replying(replies.len()));
        let sent = join_all(replies.iter().map(|(group, reply)| async move {
            match self.sink.send_reply(reply).await {
                Ok(()) => {
                    info!(
                        "Sent {} translation of message {} for {} recipient(s)",
                        group.target_language,
                        event.message_id,
                        group.recipients.len()
                    );
                    None
                }
                Err(e) => {
                    error!(
                        "Failed to send {} translation of message {}: {:#}",
                        group.target_language, event.message_id, e
                    );
                    Some(group.target_language.clone())
                }
            }
        }))
        .await;

        let mut replies_sent = 0;
        for failure in sent {
            match failure {
                Some(language) => dropped.push(language),
                None => replies_sent += 1,
            }
        }

        transition(event, &mut state, DispatchState::Done);
        DispatchReport {
            state,
            languages,
            replies_sent,
            dropped,
        }
    }

    /// Reply body for one language, or `None` when the slot is dropped.
    async fn translate_slot(&self, event: &InboundEvent, group: &LanguageGroup) -> Option<String> {
        match self.translator.translate(&event.text, &group.target_language).await {
            Ok(result) if same_text(&result.translated_text, &event.text) => {
                debug!(
                    "{} translation of message {} matches the original, not posting",
                    group.target_language, event.message_id
                );
                None
            }
            Ok(result) => Some(format_reply(&result)),
            Err(e) => {
                warn!(
                    "Dropping {} translation of message {} for users {:?}: {}",
                    group.target_language, event.message_id, group.recipients, e
                );
                None
            }
        }
    }
}

fn transition(event: &InboundEvent, state: &mut DispatchState, next: DispatchState) {
    debug!("Message {}: {:?} -> {:?}", event.message_id, state, next);
    *state = next;
}
