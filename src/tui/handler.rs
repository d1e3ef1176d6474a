use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    MoveUp,
    MoveDown,
    MoveToTop,
    MoveToBottom,
    ToggleFocus,
    FocusTopics,
    FocusArticles,
    OpenInBrowser,
    ShowHelp,
    HideHelp,
}

pub fn handle_key_event(key: KeyEvent, show_help: bool) -> Option<AppAction> {
    // If help is showing, any key closes it
    if show_help {
        return Some(AppAction::HideHelp);
    }

    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => Some(AppAction::Quit),
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(AppAction::Quit),

        (KeyCode::Char('j'), _) | (KeyCode::Down, _) => Some(AppAction::MoveDown),
        (KeyCode::Char('k'), _) | (KeyCode::Up, _) => Some(AppAction::MoveUp),
        (KeyCode::Char('<'), _) | (KeyCode::Home, _) => Some(AppAction::MoveToTop),
        (KeyCode::Char('>'), _) | (KeyCode::End, _) => Some(AppAction::MoveToBottom),

        (KeyCode::Tab, _) => Some(AppAction::ToggleFocus),
        (KeyCode::Char('h'), _) | (KeyCode::Left, _) => Some(AppAction::FocusTopics),
        (KeyCode::Char('l'), _) | (KeyCode::Right, _) | (KeyCode::Enter, _) => {
            Some(AppAction::FocusArticles)
        }

        (KeyCode::Char('o'), _) => Some(AppAction::OpenInBrowser),
        (KeyCode::Char('?'), _) => Some(AppAction::ShowHelp),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn vim_and_arrow_keys_navigate() {
        assert_eq!(handle_key_event(key(KeyCode::Char('j')), false), Some(AppAction::MoveDown));
        assert_eq!(handle_key_event(key(KeyCode::Up), false), Some(AppAction::MoveUp));
        assert_eq!(handle_key_event(key(KeyCode::Enter), false), Some(AppAction::FocusArticles));
        assert_eq!(handle_key_event(key(KeyCode::Tab), false), Some(AppAction::ToggleFocus));
        assert_eq!(handle_key_event(key(KeyCode::Char('x')), false), None);
    }

    #[test]
    fn any_key_closes_help() {
        assert_eq!(handle_key_event(key(KeyCode::Char('q')), true), Some(AppAction::HideHelp));
        assert_eq!(
            handle_key_event(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL), false),
            Some(AppAction::Quit)
        );
    }
}
