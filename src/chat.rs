use crate::error::ChatError;
use crate::shell::{SessionShell, ShellEvent};
use crate::signaling::{ChatMessage, SignalMessage, SignalingChannel, EVENT_CHAT_MESSAGE};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Чат на канале сессии; лента только дополняется
pub struct ChatWidget {
    signaling: SignalingChannel,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    shell: Arc<dyn SessionShell>,
}

impl ChatWidget {
    pub fn attach(signaling: SignalingChannel, shell: Arc<dyn SessionShell>) -> Self {
        let messages = Arc::new(Mutex::new(Vec::new()));
        {
            let messages = messages.clone();
            let shell = shell.clone();
            signaling.on(EVENT_CHAT_MESSAGE, move |msg| {
                if let SignalMessage::ChatMessage(message) = msg {
                    debug!(from = %message.sender_identity, "chat message received");
                    messages.lock().push(message.clone());
                    shell.emit(ShellEvent::ChatAppended(message));
                }
            });
        }
        Self {
            signaling,
            messages,
            shell,
        }
    }

    /// Отправляет текст; пустые и пробельные сообщения отклоняются
    pub fn send(&self, text: &str) -> Result<ChatMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Empty);
        }
        let message = ChatMessage {
            sender_identity: self.signaling.identity().to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        };
        self.signaling
            .send(&SignalMessage::ChatMessage(message.clone()))?;
        self.messages.lock().push(message.clone());
        self.shell.emit(ShellEvent::ChatAppended(message.clone()));
        Ok(message)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}
