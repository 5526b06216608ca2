use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::client::{ChatClient, ChatModel};
use crate::config::Config;
use crate::index::ChunkIndex;
use crate::prompt;
use crate::store::{Conversation, ConversationStore, Message, Role};
use crate::tui::AppEvent;

/// Quick questions offered in the sidebar; selecting one pre-fills the input
/// and then follows the exact same submission path as typed text.
pub const PRESET_QUESTIONS: [&str; 5] = [
    "Explain Retrieval Augmented Generation (RAG)",
    "What is a vector database? Name the leading products",
    "How do you evaluate a large language model?",
    "How does the Transformer architecture work?",
    "What does the LangChain framework do?",
];

/// How many chunks are pulled from the index per question.
const RETRIEVAL_TOP_K: usize = 5;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const TEMPERATURE_STEP: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    History,
    Presets,
    Chat,
    Input,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Input state
    pub input: String,
    pub input_cursor: usize, // cursor position in chars

    // Conversations
    pub store: ConversationStore,
    pub active_id: Option<String>,
    pub history_state: ListState,

    // Generation state (IDLE vs AWAITING_RESPONSE)
    pub streaming: bool,
    pub partial_response: String,
    pub status: Option<String>,

    // Generation settings
    pub model: ChatModel,
    pub temperature: f32,

    // Presets
    pub preset_state: ListState,

    // Model picker popup
    pub show_model_picker: bool,
    pub model_picker_state: ListState,

    // API key input popup
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_cursor: usize,

    // Chat viewport (updated during render)
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Collaborators
    pub base_url: String,
    pub client: Option<ChatClient>,
    pub retriever: Option<ChunkIndex>,
}

impl App {
    pub fn new(config: &Config, client: Option<ChatClient>, retriever: Option<ChunkIndex>) -> Self {
        let model = config
            .default_model
            .as_deref()
            .and_then(ChatModel::from_str)
            .unwrap_or_default();
        let temperature = config
            .temperature
            .unwrap_or(DEFAULT_TEMPERATURE)
            .clamp(0.0, 1.0);

        let mut preset_state = ListState::default();
        preset_state.select(Some(0));

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Input,

            input: String::new(),
            input_cursor: 0,

            store: ConversationStore::new(),
            active_id: None,
            history_state: ListState::default(),

            streaming: false,
            partial_response: String::new(),
            status: None,

            model,
            temperature,

            preset_state,

            show_model_picker: false,
            model_picker_state: ListState::default(),

            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,

            animation_frame: 0,

            base_url: config.base_url(),
            client,
            retriever,
        }
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.store.get(id))
    }

    pub fn has_credential(&self) -> bool {
        self.client.is_some()
    }

    /// Submit the current input. Implements the IDLE -> AWAITING_RESPONSE
    /// transition: the credential gate comes first (no network call is ever
    /// attempted without a key), then retrieval, composition and the
    /// streaming request. Fragments come back through `tx` as app events.
    pub fn submit(&mut self, tx: &UnboundedSender<AppEvent>) {
        if self.streaming {
            return;
        }
        let question = self.input.trim().to_string();
        if question.is_empty() {
            return;
        }

        let Some(client) = self.client.clone() else {
            self.status =
                Some("Enter your API key to start chatting (press 'K').".to_string());
            return;
        };

        // Index unavailable aborts the request with a visible warning rather
        // than silently answering without grounding.
        let Some(retriever) = self.retriever.as_mut() else {
            self.status = Some(
                "Knowledge base index unavailable. Build it with `kbchat build-index`."
                    .to_string(),
            );
            return;
        };
        let chunks = match retriever.retrieve(&question, RETRIEVAL_TOP_K) {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!("retrieval failed: {}", err);
                self.status = Some(err.to_string());
                return;
            }
        };

        let user_message = Message {
            role: Role::User,
            content: question.clone(),
        };
        if let Some(id) = self.active_id.clone() {
            self.store.append(&id, user_message);
        } else {
            self.active_id = Some(self.store.create(user_message));
        }
        self.history_state.select(Some(0));

        self.input.clear();
        self.input_cursor = 0;
        self.status = None;
        self.streaming = true;
        self.partial_response.clear();
        self.scroll_chat_to_bottom();

        info!(
            model = self.model.as_str(),
            temperature = self.temperature,
            chunks = chunks.len(),
            "starting completion request"
        );

        let prompt = prompt::compose(&question, &chunks);
        let mut stream = client.stream_completion(self.model, &prompt, self.temperature);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(fragment) = stream.recv().await {
                if tx.send(AppEvent::StreamChunk(fragment)).is_err() {
                    return;
                }
            }
            let _ = tx.send(AppEvent::StreamDone);
        });
    }

    /// A fragment arrived: extend the partial response and keep the tail of
    /// the chat in view (progressive redraw, not atomic).
    pub fn on_stream_chunk(&mut self, fragment: &str) {
        self.partial_response.push_str(fragment);
        self.scroll_chat_to_bottom();
    }

    /// Stream exhausted (or terminated by a failure fragment): the assembled
    /// response becomes the assistant message and the session returns to IDLE.
    pub fn on_stream_done(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;

        let content = std::mem::take(&mut self.partial_response);
        let message = Message {
            role: Role::Assistant,
            content,
        };
        if let Some(id) = self.active_id.clone() {
            self.store.append(&id, message);
        } else {
            self.active_id = Some(self.store.create(message));
        }
        self.scroll_chat_to_bottom();
    }

    // Conversation actions

    pub fn new_conversation(&mut self) {
        if self.streaming {
            return;
        }
        self.active_id = None;
        self.input.clear();
        self.input_cursor = 0;
        self.status = None;
        self.chat_scroll = 0;
    }

    pub fn clear_all_conversations(&mut self) {
        if self.streaming {
            return;
        }
        self.store.clear_all();
        self.active_id = None;
        self.history_state.select(None);
        self.chat_scroll = 0;
    }

    /// Switch to the conversation at `idx` in the display (most-recent-first)
    /// order.
    pub fn select_conversation(&mut self, idx: usize) {
        if self.streaming {
            return;
        }
        let id = self.store.list().get(idx).map(|c| c.id.clone());
        if let Some(id) = id {
            self.active_id = Some(id);
            self.input.clear();
            self.input_cursor = 0;
            self.scroll_chat_to_bottom();
        }
    }

    /// Pre-fill the input with a preset question; submission still goes
    /// through the normal pipeline.
    pub fn apply_preset(&mut self, idx: usize) {
        if let Some(question) = PRESET_QUESTIONS.get(idx) {
            self.input = question.to_string();
            self.input_cursor = self.input.chars().count();
            self.focus = FocusPane::Input;
            self.input_mode = InputMode::Editing;
        }
    }

    // Generation settings

    pub fn temperature_up(&mut self) {
        self.temperature = (self.temperature + TEMPERATURE_STEP).clamp(0.0, 1.0);
    }

    pub fn temperature_down(&mut self) {
        self.temperature = (self.temperature - TEMPERATURE_STEP).clamp(0.0, 1.0);
    }

    // List navigation helpers

    pub fn history_nav_down(&mut self) {
        let len = self.store.len();
        if len > 0 {
            let i = self.history_state.selected().unwrap_or(0);
            self.history_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn history_nav_up(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        self.history_state.select(Some(i.saturating_sub(1)));
    }

    pub fn preset_nav_down(&mut self) {
        let len = PRESET_QUESTIONS.len();
        let i = self.preset_state.selected().unwrap_or(0);
        self.preset_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn preset_nav_up(&mut self) {
        let i = self.preset_state.selected().unwrap_or(0);
        self.preset_state.select(Some(i.saturating_sub(1)));
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = ChatModel::all().len();
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some((i + 1).min(len - 1)));
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn open_model_picker(&mut self) {
        let current_idx = ChatModel::all()
            .iter()
            .position(|m| *m == self.model)
            .unwrap_or(0);
        self.model_picker_state.select(Some(current_idx));
        self.show_model_picker = true;
    }

    pub fn select_model(&mut self) {
        if let Some(i) = self.model_picker_state.selected() {
            if let Some(&model) = ChatModel::all().get(i) {
                self.model = model;
                self.show_model_picker = false;
                // Save to config
                let _ = Config::save_default_model(model.as_str());
            }
        }
    }

    /// Install a credential supplied through the key popup: enables the
    /// generation path and persists the key for the next session.
    pub fn set_api_key(&mut self, key: &str) {
        if key.is_empty() {
            return;
        }
        self.client = Some(ChatClient::new(&self.base_url, key));
        self.status = None;
        let _ = Config::save_api_key(key);
    }

    // Chat scrolling

    pub fn chat_scroll_down(&mut self) {
        let max_scroll = self.total_chat_lines().saturating_sub(self.chat_height);
        if self.chat_scroll < max_scroll {
            self.chat_scroll = self.chat_scroll.saturating_add(1);
        }
    }

    pub fn chat_scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    /// Estimate the rendered line count of the conversation, wrap-aware.
    pub fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        if let Some(conversation) = self.active_conversation() {
            for msg in &conversation.messages {
                total_lines += 1; // Role line
                total_lines += wrapped_line_count(&msg.content, wrap_width);
                total_lines += 1; // Blank line after message
            }
        }

        if self.streaming {
            total_lines += 1; // Role line for the pending response
            if self.partial_response.is_empty() {
                total_lines += 1; // "Thinking..." indicator
            } else {
                total_lines += wrapped_line_count(&self.partial_response, wrap_width);
            }
            total_lines += 1;
        }

        total_lines
    }

    /// Scroll so the newest output stays visible while fragments arrive.
    pub fn scroll_chat_to_bottom(&mut self) {
        let total_lines = self.total_chat_lines();
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines.saturating_sub(visible_height);
        } else {
            self.chat_scroll = 0;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.streaming {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

fn wrapped_line_count(content: &str, wrap_width: usize) -> u16 {
    let mut lines = 0u16;
    for line in content.lines() {
        // Use character count, not byte length, for proper UTF-8 handling
        let char_count = line.chars().count();
        if char_count == 0 {
            lines += 1;
        } else {
            lines += ((char_count / wrap_width) + 1) as u16;
        }
    }
    lines.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_app(client: Option<ChatClient>, retriever: Option<ChunkIndex>) -> App {
        App::new(&Config::default(), client, retriever)
    }

    #[test]
    fn test_submit_without_credential_never_reaches_the_network() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut app = test_app(None, None);
        app.input = "what is RAG?".to_string();

        app.submit(&tx);

        // Stays IDLE with a blocking warning; no stream task, no events.
        assert!(!app.streaming);
        assert!(app.status.is_some());
        assert!(app.active_id.is_none());
        assert!(rx.try_recv().is_err());
        // The input is preserved so the user can submit after adding a key.
        assert_eq!(app.input, "what is RAG?");
    }

    #[test]
    fn test_submit_empty_input_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = test_app(None, None);
        app.input = "   ".to_string();

        app.submit(&tx);

        assert!(!app.streaming);
        assert!(app.status.is_none());
    }

    #[tokio::test]
    async fn test_submit_without_index_aborts_with_warning() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = ChatClient::new("http://127.0.0.1:9", "key");
        let mut app = test_app(Some(client), None);
        app.input = "a question".to_string();

        app.submit(&tx);

        assert!(!app.streaming);
        let status = app.status.unwrap();
        assert!(status.contains("index unavailable"), "got: {}", status);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_lifecycle_appends_assistant_message() {
        let mut app = test_app(None, None);
        // Simulate the state right after a successful submit.
        let id = app.store.create(Message {
            role: Role::User,
            content: "question".to_string(),
        });
        app.active_id = Some(id.clone());
        app.streaming = true;

        app.on_stream_chunk("Hello");
        app.on_stream_chunk(" world");
        assert_eq!(app.partial_response, "Hello world");

        app.on_stream_done();
        assert!(!app.streaming);
        assert!(app.partial_response.is_empty());

        let conversation = app.store.get(&id).unwrap();
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[1].role, Role::Assistant);
        assert_eq!(conversation.messages[1].content, "Hello world");
    }

    #[test]
    fn test_preset_prefills_input_without_submitting() {
        let mut app = test_app(None, None);
        app.apply_preset(0);

        assert_eq!(app.input, PRESET_QUESTIONS[0]);
        assert_eq!(app.input_cursor, PRESET_QUESTIONS[0].chars().count());
        assert_eq!(app.focus, FocusPane::Input);
        assert!(!app.streaming);
    }

    #[test]
    fn test_temperature_stays_within_bounds() {
        let mut app = test_app(None, None);
        app.temperature = 0.95;
        app.temperature_up();
        assert!(app.temperature <= 1.0);

        app.temperature = 0.05;
        app.temperature_down();
        assert!(app.temperature >= 0.0);
    }

    #[test]
    fn test_new_conversation_detaches_active_id() {
        let mut app = test_app(None, None);
        let id = app.store.create(Message {
            role: Role::User,
            content: "old".to_string(),
        });
        app.active_id = Some(id);

        app.new_conversation();
        assert!(app.active_id.is_none());
        assert_eq!(app.store.len(), 1);
    }

    #[test]
    fn test_select_conversation_uses_display_order() {
        let mut app = test_app(None, None);
        let _first = app.store.create(Message {
            role: Role::User,
            content: "first".to_string(),
        });
        let second = app.store.create(Message {
            role: Role::User,
            content: "second".to_string(),
        });

        // Display order is most-recent-first, so index 0 is the second chat.
        app.select_conversation(0);
        assert_eq!(app.active_id.as_deref(), Some(second.as_str()));
    }
}
