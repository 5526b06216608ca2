use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{App, FocusPane, InputMode, PRESET_QUESTIONS};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub fn handle_event(app: &mut App, event: AppEvent, tx: &UnboundedSender<AppEvent>) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, tx)?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::StreamChunk(fragment) => app.on_stream_chunk(&fragment),
        AppEvent::StreamDone => app.on_stream_done(),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) -> Result<()> {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return Ok(());
    }

    // Popups swallow all input while open
    if app.show_api_key_input {
        handle_api_key_input(app, key);
        return Ok(());
    }
    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key, tx),
    }

    Ok(())
}

fn handle_api_key_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_api_key_input = false;
            app.api_key_input.clear();
            app.api_key_cursor = 0;
        }
        KeyCode::Enter => {
            if !app.api_key_input.is_empty() {
                let key = app.api_key_input.clone();
                app.set_api_key(&key);
            }
            app.show_api_key_input = false;
            app.api_key_input.clear();
            app.api_key_cursor = 0;
        }
        KeyCode::Backspace => {
            if app.api_key_cursor > 0 {
                app.api_key_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_cursor);
                app.api_key_input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.api_key_cursor = app.api_key_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.api_key_input.chars().count();
            app.api_key_cursor = (app.api_key_cursor + 1).min(char_count);
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.api_key_input, app.api_key_cursor);
            app.api_key_input.insert(byte_pos, c);
            app.api_key_cursor += 1;
        }
        _ => {}
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.show_model_picker = false;
        }
        KeyCode::Char('j') | KeyCode::Down => app.model_picker_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.model_picker_nav_up(),
        KeyCode::Enter => app.select_model(),
        _ => {}
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') => app.should_quit = true,

        // Tab cycles focus: Input -> History -> Presets -> Chat -> Input
        KeyCode::Tab => {
            app.focus = match app.focus {
                FocusPane::Input => FocusPane::History,
                FocusPane::History => FocusPane::Presets,
                FocusPane::Presets => FocusPane::Chat,
                FocusPane::Chat => FocusPane::Input,
            };
            if app.focus == FocusPane::History && app.history_state.selected().is_none() {
                if !app.store.is_empty() {
                    app.history_state.select(Some(0));
                }
            }
            if app.focus == FocusPane::Input {
                app.input_mode = InputMode::Editing;
                app.input_cursor = app.input.chars().count();
            }
        }

        // Jump straight to the input
        KeyCode::Char('i') | KeyCode::Char('/') => {
            app.focus = FocusPane::Input;
            app.input_mode = InputMode::Editing;
            app.input_cursor = app.input.chars().count();
        }

        // Conversation actions
        KeyCode::Char('n') => app.new_conversation(),
        KeyCode::Char('C') => app.clear_all_conversations(),

        // Settings
        KeyCode::Char('M') => app.open_model_picker(),
        KeyCode::Char('K') => {
            app.show_api_key_input = true;
            app.api_key_input.clear();
            app.api_key_cursor = 0;
        }
        KeyCode::Char('+') | KeyCode::Char('=') => app.temperature_up(),
        KeyCode::Char('-') => app.temperature_down(),

        // Navigation within the focused pane
        KeyCode::Char('j') | KeyCode::Down => match app.focus {
            FocusPane::History => app.history_nav_down(),
            FocusPane::Presets => app.preset_nav_down(),
            FocusPane::Chat => app.chat_scroll_down(),
            FocusPane::Input => {}
        },
        KeyCode::Char('k') | KeyCode::Up => match app.focus {
            FocusPane::History => app.history_nav_up(),
            FocusPane::Presets => app.preset_nav_up(),
            FocusPane::Chat => app.chat_scroll_up(),
            FocusPane::Input => {}
        },
        KeyCode::Char('g') => {
            if app.focus == FocusPane::Chat {
                app.chat_scroll = 0;
            }
        }
        KeyCode::Char('G') => {
            if app.focus == FocusPane::Chat {
                app.scroll_chat_to_bottom();
            }
        }

        // Enter activates the focused selection
        KeyCode::Enter => match app.focus {
            FocusPane::History => {
                if let Some(idx) = app.history_state.selected() {
                    app.select_conversation(idx);
                }
            }
            FocusPane::Presets => {
                if let Some(idx) = app.preset_state.selected() {
                    if idx < PRESET_QUESTIONS.len() {
                        app.apply_preset(idx);
                    }
                }
            }
            FocusPane::Input => {
                app.input_mode = InputMode::Editing;
            }
            FocusPane::Chat => {}
        },

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Tab => {
            app.input_mode = InputMode::Normal;
            app.focus = FocusPane::History;
            if app.history_state.selected().is_none() && !app.store.is_empty() {
                app.history_state.select(Some(0));
            }
        }
        KeyCode::Enter => app.submit(tx),
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
            app.input.insert(byte_pos, c);
            app.input_cursor += 1;
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);

    match mouse.kind {
        MouseEventKind::ScrollDown if in_chat => {
            app.chat_scroll_down();
            app.chat_scroll_down();
            app.chat_scroll_down();
        }
        MouseEventKind::ScrollUp if in_chat => {
            app.chat_scroll_up();
            app.chat_scroll_up();
            app.chat_scroll_up();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tokio::sync::mpsc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn editing_app() -> App {
        App::new(&Config::default(), None, None)
    }

    #[test]
    fn test_char_to_byte_index_handles_multibyte() {
        let s = "日本語abc";
        assert_eq!(char_to_byte_index(s, 0), 0);
        assert_eq!(char_to_byte_index(s, 1), 3);
        assert_eq!(char_to_byte_index(s, 3), 9);
        assert_eq!(char_to_byte_index(s, 100), s.len());
    }

    #[test]
    fn test_editing_inserts_at_cursor() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = editing_app();

        for c in "héllo".chars() {
            handle_event(&mut app, AppEvent::Key(key(KeyCode::Char(c))), &tx).unwrap();
        }
        handle_event(&mut app, AppEvent::Key(key(KeyCode::Left)), &tx).unwrap();
        handle_event(&mut app, AppEvent::Key(key(KeyCode::Backspace)), &tx).unwrap();

        assert_eq!(app.input, "hélo");
        assert_eq!(app.input_cursor, 3);
    }

    #[test]
    fn test_tab_cycles_through_panes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = editing_app();
        assert_eq!(app.focus, FocusPane::Input);

        handle_event(&mut app, AppEvent::Key(key(KeyCode::Tab)), &tx).unwrap();
        assert_eq!(app.focus, FocusPane::History);
        handle_event(&mut app, AppEvent::Key(key(KeyCode::Tab)), &tx).unwrap();
        assert_eq!(app.focus, FocusPane::Presets);
        handle_event(&mut app, AppEvent::Key(key(KeyCode::Tab)), &tx).unwrap();
        assert_eq!(app.focus, FocusPane::Chat);
        handle_event(&mut app, AppEvent::Key(key(KeyCode::Tab)), &tx).unwrap();
        assert_eq!(app.focus, FocusPane::Input);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[test]
    fn test_preset_enter_prefills_input() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = editing_app();
        app.input_mode = InputMode::Normal;
        app.focus = FocusPane::Presets;
        app.preset_state.select(Some(1));

        handle_event(&mut app, AppEvent::Key(key(KeyCode::Enter)), &tx).unwrap();
        assert_eq!(app.input, PRESET_QUESTIONS[1]);
        assert_eq!(app.focus, FocusPane::Input);
    }

    #[test]
    fn test_stream_events_flow_into_app_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut app = editing_app();
        let id = app.store.create(crate::store::Message {
            role: crate::store::Role::User,
            content: "q".to_string(),
        });
        app.active_id = Some(id.clone());
        app.streaming = true;

        handle_event(&mut app, AppEvent::StreamChunk("partial".to_string()), &tx).unwrap();
        assert_eq!(app.partial_response, "partial");

        handle_event(&mut app, AppEvent::StreamDone, &tx).unwrap();
        assert!(!app.streaming);
        assert_eq!(app.store.get(&id).unwrap().messages.len(), 2);
    }
}
