use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::gemini::{ApiError, Completion};
use crate::history::{HistoryBuffer, Turn};
use crate::markdown::{self, RenderedReply};

#[derive(Debug, Clone)]
pub enum ChatMessage {
    /// Shown verbatim, never parsed.
    User(String),
    Bot {
        #[allow(dead_code)]
        text: String,
        reply: RenderedReply,
    },
}

/// The presentation surface the controller drives. It never writes back
/// into the history.
pub trait ChatView {
    fn set_thinking(&mut self, visible: bool);
    fn push_message(&mut self, message: ChatMessage);
    fn clear_messages(&mut self);
    fn clear_input(&mut self);
}

/// A request that has been started by [`ChatController::begin`] and must be
/// completed with [`ChatController::finish`].
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub epoch: u64,
    pub history: Vec<Turn>,
}

pub struct ChatController<C, V> {
    client: Arc<C>,
    view: V,
    history: HistoryBuffer,
    history_limit: usize,
    fallback_message: String,
    copy_label: String,
    in_flight: bool,
    epoch: u64,
}

impl<C: Completion, V: ChatView> ChatController<C, V> {
    pub fn new(client: Arc<C>, view: V, config: &ChatConfig) -> Self {
        ChatController {
            client,
            view,
            history: HistoryBuffer::new(),
            history_limit: config.effective_history_limit(),
            fallback_message: config.fallback_message.clone(),
            copy_label: config.copy_label.clone(),
            in_flight: false,
            epoch: 0,
        }
    }

    pub fn client(&self) -> Arc<C> {
        self.client.clone()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    /// Everything `submit` does before the network call. Returns `None` for
    /// blank input or while another request is outstanding.
    pub fn begin(&mut self, text: &str) -> Option<PendingRequest> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.in_flight {
            debug!("request already in flight, ignoring submit");
            return None;
        }

        self.in_flight = true;
        self.view.set_thinking(true);

        self.view.push_message(ChatMessage::User(text.to_string()));
        self.history.append(Turn::user(text));
        self.history.truncate(self.history_limit);

        self.view.clear_input();

        Some(PendingRequest {
            epoch: self.epoch,
            history: self.history.snapshot(),
        })
    }

    /// Everything `submit` does once the network call settles. Replies that
    /// belong to a conversation cleared by [`reset`](Self::reset) are dropped.
    pub fn finish(&mut self, epoch: u64, result: Result<String, ApiError>) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "discarding reply for a cleared conversation");
            return;
        }

        match result {
            Ok(text) => {
                debug!(chars = text.len(), "reply received");
                let reply = markdown::render_bot_text(&text, &self.copy_label);
                self.history.append(Turn::model(text.clone()));
                self.history.truncate(self.history_limit);
                self.view.push_message(ChatMessage::Bot { text, reply });
            }
            Err(e) => {
                warn!("Gemini request failed: {}", e);
                let text = self.fallback_message.clone();
                let reply = markdown::render_bot_text(&text, &self.copy_label);
                self.view.push_message(ChatMessage::Bot { text, reply });
            }
        }

        self.in_flight = false;
        self.view.set_thinking(false);
    }

    /// One full request/response cycle.
    #[allow(dead_code)]
    pub async fn submit(&mut self, text: &str) {
        let Some(pending) = self.begin(text) else {
            return;
        };
        let result = self.client.complete(&pending.history).await;
        self.finish(pending.epoch, result);
    }

    pub fn reset(&mut self) {
        info!("starting a new chat");
        self.epoch += 1;
        self.in_flight = false;
        self.history.clear();
        self.view.clear_messages();
        self.view.clear_input();
        self.view.set_thinking(false);
    }
}
