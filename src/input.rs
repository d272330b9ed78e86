use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Down,
    Up,
    PageDown,
    PageUp,
    Top,
    Bottom,
    Enter,
    Back,
    Refresh,
    StartCommand,
    StartFilter,
    /// Shift-letter sort hotkey; the controller resolves it per view.
    Sort(char),
    PortForward,
    BenchStart,
    BenchStop,
    DeleteSelected,
    SubmitInput,
    CancelInput,
    Backspace,
    InputChar(char),
    ConfirmYes,
    ConfirmNo,
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return match mode {
            InputMode::Normal => Some(Action::Quit),
            InputMode::Command | InputMode::Filter | InputMode::Confirm => {
                Some(Action::CancelInput)
            }
        };
    }

    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Command | InputMode::Filter => map_input_mode_key(key),
        InputMode::Confirm => map_confirm_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    match key.code {
        KeyCode::Char('b') if alt => Some(Action::BenchStop),
        KeyCode::Char('b') if ctrl => Some(Action::BenchStart),
        KeyCode::Char('d') if ctrl => Some(Action::DeleteSelected),
        KeyCode::Char('f') if ctrl => Some(Action::PageDown),
        KeyCode::Char('u') if ctrl => Some(Action::PageUp),
        KeyCode::Char('r') if ctrl => Some(Action::Refresh),
        _ if ctrl || alt => None,
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') | KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') | KeyCode::Up => Some(Action::Up),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Enter => Some(Action::Enter),
        KeyCode::Esc | KeyCode::Char('p') => Some(Action::Back),
        KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char('/') => Some(Action::StartFilter),
        KeyCode::Char('F') => Some(Action::PortForward),
        KeyCode::Char(c) if c.is_ascii_uppercase() => Some(Action::Sort(c)),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

fn map_confirm_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Action::ConfirmNo),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, map_key};
    use crate::app::InputMode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    #[test]
    fn normal_mode_maps_quit() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::Quit));
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Normal, ctrl_c), Some(Action::Quit));
    }

    #[test]
    fn input_mode_maps_char() {
        let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Command, key), Some(Action::InputChar('a')));
    }

    #[test]
    fn input_mode_cancels_on_ctrl_c() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Filter, key), Some(Action::CancelInput));
    }

    #[test]
    fn shift_f_opens_a_port_forward() {
        let key = KeyEvent::new(KeyCode::Char('F'), KeyModifiers::SHIFT);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::PortForward));
    }

    #[test]
    fn shifted_letters_are_sort_hotkeys() {
        let key = KeyEvent::new(KeyCode::Char('T'), KeyModifiers::SHIFT);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::Sort('T')));
    }

    #[test]
    fn bench_keys_follow_ctrl_and_alt() {
        let start = KeyEvent::new(KeyCode::Char('b'), KeyModifiers::CONTROL);
        let stop = KeyEvent::new(KeyCode::Char('b'), KeyModifiers::ALT);
        assert_eq!(map_key(InputMode::Normal, start), Some(Action::BenchStart));
        assert_eq!(map_key(InputMode::Normal, stop), Some(Action::BenchStop));
    }

    #[test]
    fn ctrl_d_deletes_instead_of_paging() {
        let key = KeyEvent::new(KeyCode::Char('d'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::DeleteSelected));
    }

    #[test]
    fn unknown_ctrl_chords_are_ignored() {
        let key = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Normal, key), None);
    }

    #[test]
    fn confirm_mode_accepts_enter_and_rejects_escape() {
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        let upper_n = KeyEvent::new(KeyCode::Char('N'), KeyModifiers::SHIFT);
        assert_eq!(map_key(InputMode::Confirm, enter), Some(Action::ConfirmYes));
        assert_eq!(map_key(InputMode::Confirm, esc), Some(Action::ConfirmNo));
        assert_eq!(map_key(InputMode::Confirm, upper_n), Some(Action::ConfirmNo));
    }
}
