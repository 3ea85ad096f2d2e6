use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::role::Role;

/// Ordered conversation history.
///
/// Messages are only ever appended; a turn loop borrows the conversation
/// mutably for its whole duration so nothing else can interleave writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from a system prompt
    pub fn with_system<S: Into<String>>(system: S) -> Self {
        Self {
            messages: vec![Message::system(system)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Split into the system message and everything else.
    ///
    /// Only one system message is expected; when several are present the
    /// first one wins and the rest are dropped from the exchange.
    pub fn partition(&self) -> (Option<&Message>, Vec<&Message>) {
        let mut system = None;
        let mut exchange = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            if message.role == Role::System {
                if system.is_none() {
                    system = Some(message);
                }
            } else {
                exchange.push(message);
            }
        }
        (system, exchange)
    }

    pub fn log(&self) {
        for message in &self.messages {
            message.log();
        }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl Extend<Message> for Conversation {
    fn extend<I: IntoIterator<Item = Message>>(&mut self, iter: I) {
        self.messages.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
