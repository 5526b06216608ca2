use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters of the first user message used for a conversation title.
const TITLE_MAX_CHARS: usize = 30;

/// A chat message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

/// One conversation: a stable id, a display title and the messages in
/// submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    fn new(first_message: &Message) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: derive_title(&first_message.content),
            messages: vec![first_message.clone()],
        }
    }
}

/// Truncate the first user message to a short display title.
fn derive_title(content: &str) -> String {
    let char_count = content.chars().count();
    if char_count > TITLE_MAX_CHARS {
        let truncated: String = content.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", truncated)
    } else {
        content.to_string()
    }
}

/// In-memory collection of conversations for one session. All access runs on
/// the UI thread; nothing here is shared across tasks.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            conversations: Vec::new(),
        }
    }

    /// Start a new conversation from its first message and return its id.
    pub fn create(&mut self, first_message: Message) -> String {
        let conversation = Conversation::new(&first_message);
        let id = conversation.id.clone();
        self.conversations.push(conversation);
        id
    }

    /// Append a message to an existing conversation. Unknown ids are ignored;
    /// the caller always holds an id it got from `create`.
    pub fn append(&mut self, id: &str, message: Message) {
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.messages.push(message);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Conversations for display, most recent first.
    pub fn list(&self) -> Vec<&Conversation> {
        self.conversations.iter().rev().collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.conversations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> Message {
        Message {
            role: Role::User,
            content: content.to_string(),
        }
    }

    fn assistant(content: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_create_append_get_preserves_order() {
        let mut store = ConversationStore::new();
        let id = store.create(user("What is a vector database?"));
        store.append(&id, assistant("A store for embeddings."));

        let conversation = store.get(&id).unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].role, Role::User);
        assert_eq!(conversation.messages[0].content, "What is a vector database?");
        assert_eq!(conversation.messages[1].role, Role::Assistant);
        assert_eq!(conversation.messages[1].content, "A store for embeddings.");
    }

    #[test]
    fn test_short_title_is_verbatim() {
        let mut store = ConversationStore::new();
        let id = store.create(user("Hello"));
        assert_eq!(store.get(&id).unwrap().title, "Hello");
    }

    #[test]
    fn test_title_at_limit_is_verbatim() {
        let text = "a".repeat(30);
        let mut store = ConversationStore::new();
        let id = store.create(user(&text));
        assert_eq!(store.get(&id).unwrap().title, text);
    }

    #[test]
    fn test_long_title_is_truncated_with_ellipsis() {
        let text = "x".repeat(45);
        let mut store = ConversationStore::new();
        let id = store.create(user(&text));
        let title = store.get(&id).unwrap().title.clone();
        assert_eq!(title, format!("{}...", "x".repeat(30)));
    }

    #[test]
    fn test_title_truncation_counts_chars_not_bytes() {
        // 35 multi-byte chars; slicing 30 bytes would split a codepoint
        let text = "什".repeat(35);
        let mut store = ConversationStore::new();
        let id = store.create(user(&text));
        let title = store.get(&id).unwrap().title.clone();
        assert_eq!(title, format!("{}...", "什".repeat(30)));
    }

    #[test]
    fn test_ids_are_unique() {
        let mut store = ConversationStore::new();
        let a = store.create(user("first"));
        let b = store.create(user("second"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_list_is_most_recent_first() {
        let mut store = ConversationStore::new();
        let first = store.create(user("first"));
        let second = store.create(user("second"));

        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
    }

    #[test]
    fn test_clear_all_empties_store() {
        let mut store = ConversationStore::new();
        store.create(user("one"));
        store.create(user("two"));
        store.clear_all();
        assert!(store.is_empty());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_append_to_unknown_id_is_a_no_op() {
        let mut store = ConversationStore::new();
        store.create(user("hello"));
        store.append("no-such-id", assistant("lost"));
        assert_eq!(store.list()[0].messages.len(), 1);
    }
}
