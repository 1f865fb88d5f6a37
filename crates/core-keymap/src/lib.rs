//! Key-sequence mapping engine.
//!
//! Bindings are layered into a small trie so multi-key chords ("C-x,C-c")
//! resolve incrementally: the input loop feeds its pending key buffer in and
//! gets back a terminal action, "keep collecting", or "no such binding".
//! Resolution is pure; the loop owns all side effects.
//!
//! Rc-file entries rebind by name: `"C-r" = "RotateMatcher"`. Binding
//! `Noop` removes a default.

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use core_terminal::{Key, KeyCode, Mods};

mod jump;
pub use jump::JumpMap;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeymapError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("unparsable key: {0}")]
    BadKey(String),
}

/// Everything a key gesture can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Noop,
    Finish,
    Cancel,
    RefreshScreen,
    // Cursor / paging
    SelectUp,
    SelectDown,
    ScrollPageUp,
    ScrollPageDown,
    ScrollFirst,
    ScrollLast,
    // Selection
    ToggleSelection,
    ToggleSelectionAndSelectNext,
    ToggleRangeMode,
    // Modes
    RotateMatcher,
    ToggleSingleKeyJump,
    // Query caret
    BeginningOfLine,
    EndOfLine,
    ForwardChar,
    BackwardChar,
    // Query editing
    DeleteBackwardChar,
    DeleteForwardChar,
    DeleteBackwardWord,
    KillBeginningOfLine,
    KillEndOfLine,
    DeleteAll,
}

impl Action {
    pub fn by_name(name: &str) -> Result<Self, KeymapError> {
        let action = match name {
            "Noop" => Action::Noop,
            "Finish" => Action::Finish,
            "Cancel" => Action::Cancel,
            "RefreshScreen" => Action::RefreshScreen,
            "SelectUp" => Action::SelectUp,
            "SelectDown" => Action::SelectDown,
            "ScrollPageUp" => Action::ScrollPageUp,
            "ScrollPageDown" => Action::ScrollPageDown,
            "ScrollFirst" => Action::ScrollFirst,
            "ScrollLast" => Action::ScrollLast,
            "ToggleSelection" => Action::ToggleSelection,
            "ToggleSelectionAndSelectNext" => Action::ToggleSelectionAndSelectNext,
            "ToggleRangeMode" => Action::ToggleRangeMode,
            "RotateMatcher" => Action::RotateMatcher,
            "ToggleSingleKeyJump" => Action::ToggleSingleKeyJump,
            "BeginningOfLine" => Action::BeginningOfLine,
            "EndOfLine" => Action::EndOfLine,
            "ForwardChar" => Action::ForwardChar,
            "BackwardChar" => Action::BackwardChar,
            "DeleteBackwardChar" => Action::DeleteBackwardChar,
            "DeleteForwardChar" => Action::DeleteForwardChar,
            "DeleteBackwardWord" => Action::DeleteBackwardWord,
            "KillBeginningOfLine" => Action::KillBeginningOfLine,
            "KillEndOfLine" => Action::KillEndOfLine,
            "DeleteAll" => Action::DeleteAll,
            _ => return Err(KeymapError::UnknownAction(name.to_owned())),
        };
        Ok(action)
    }
}

/// Parse one key chord: optional `C-` / `M-` / `S-` prefixes followed by a
/// character or a named key (`Enter`, `Esc`, `Space`, `Tab`, `Backspace`,
/// `Delete`, `Insert`, `Home`, `End`, `PgUp`, `PgDn`, arrows, `F1`..).
pub fn parse_key(spec: &str) -> Result<Key, KeymapError> {
    let mut rest = spec;
    let mut mods = Mods::empty();
    loop {
        if let Some(tail) = rest.strip_prefix("C-") {
            if tail.is_empty() {
                break;
            }
            mods |= Mods::CTRL;
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("M-") {
            if tail.is_empty() {
                break;
            }
            mods |= Mods::ALT;
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("S-") {
            if tail.is_empty() {
                break;
            }
            mods |= Mods::SHIFT;
            rest = tail;
        } else {
            break;
        }
    }
    let code = match rest {
        "" => return Err(KeymapError::BadKey(spec.to_owned())),
        "Enter" => KeyCode::Enter,
        "Esc" => KeyCode::Esc,
        "Space" => KeyCode::Char(' '),
        "Tab" => KeyCode::Tab,
        "Backspace" | "BS" => KeyCode::Backspace,
        "Delete" | "Del" => KeyCode::Delete,
        "Insert" => KeyCode::Insert,
        "Home" => KeyCode::Home,
        "End" => KeyCode::End,
        "PgUp" | "PageUp" => KeyCode::PageUp,
        "PgDn" | "PageDown" => KeyCode::PageDown,
        "Up" | "ArrowUp" => KeyCode::Up,
        "Down" | "ArrowDown" => KeyCode::Down,
        "Left" | "ArrowLeft" => KeyCode::Left,
        "Right" | "ArrowRight" => KeyCode::Right,
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => KeyCode::Char(ch),
                _ => {
                    if let Some(n) = other.strip_prefix('F').and_then(|n| n.parse().ok()) {
                        KeyCode::F(n)
                    } else {
                        return Err(KeymapError::BadKey(spec.to_owned()));
                    }
                }
            }
        }
    };
    Ok(Key::new(code, mods))
}

/// Parse a comma-separated chord sequence (`"C-x,C-c"`).
pub fn parse_seq(spec: &str) -> Result<Vec<Key>, KeymapError> {
    let keys = spec
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_key)
        .collect::<Result<Vec<_>, _>>()?;
    if keys.is_empty() {
        return Err(KeymapError::BadKey(spec.to_owned()));
    }
    Ok(keys)
}

#[derive(Debug)]
enum Node {
    Leaf(Action),
    Branch(HashMap<Key, Node>),
}

/// Result of resolving the pending key buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A terminal binding matched.
    Matched(Action),
    /// A strict prefix of one or more bindings matched; keep collecting.
    Pending,
    /// No binding starts with this sequence.
    Unmapped,
}

#[derive(Debug)]
pub struct Keymap {
    root: HashMap<Key, Node>,
}

impl Keymap {
    pub fn empty() -> Self {
        Self {
            root: HashMap::new(),
        }
    }

    /// The built-in bindings every session starts from.
    pub fn default_bindings() -> Self {
        let mut map = Self::empty();
        let bindings: &[(&str, Action)] = &[
            ("Enter", Action::Finish),
            ("Esc", Action::Cancel),
            ("C-c", Action::Cancel),
            ("C-l", Action::RefreshScreen),
            ("Up", Action::SelectUp),
            ("C-p", Action::SelectUp),
            ("Down", Action::SelectDown),
            ("C-n", Action::SelectDown),
            ("PgUp", Action::ScrollPageUp),
            ("M-v", Action::ScrollPageUp),
            ("PgDn", Action::ScrollPageDown),
            ("C-v", Action::ScrollPageDown),
            ("M-<", Action::ScrollFirst),
            ("M->", Action::ScrollLast),
            ("C-Space", Action::ToggleSelectionAndSelectNext),
            ("C-t", Action::ToggleRangeMode),
            ("C-r", Action::RotateMatcher),
            ("C-g", Action::ToggleSingleKeyJump),
            ("C-a", Action::BeginningOfLine),
            ("Home", Action::BeginningOfLine),
            ("C-e", Action::EndOfLine),
            ("End", Action::EndOfLine),
            ("C-f", Action::ForwardChar),
            ("Right", Action::ForwardChar),
            ("C-b", Action::BackwardChar),
            ("Left", Action::BackwardChar),
            ("Backspace", Action::DeleteBackwardChar),
            ("C-h", Action::DeleteBackwardChar),
            ("Delete", Action::DeleteForwardChar),
            ("C-d", Action::DeleteForwardChar),
            ("C-w", Action::DeleteBackwardWord),
            ("C-u", Action::KillBeginningOfLine),
            ("C-k", Action::KillEndOfLine),
        ];
        for (spec, action) in bindings {
            let keys = parse_seq(spec).expect("default binding must parse");
            map.bind(&keys, *action);
        }
        map
    }

    /// Install a binding, replacing whatever the sequence previously
    /// resolved to. `Noop` removes the binding instead.
    pub fn bind(&mut self, seq: &[Key], action: Action) {
        let Some((first, rest)) = seq.split_first() else {
            return;
        };
        if action == Action::Noop {
            Self::unbind(&mut self.root, *first, rest);
            return;
        }
        let mut node = self
            .root
            .entry(*first)
            .and_modify(|n| {
                if rest.is_empty() || matches!(n, Node::Leaf(_)) {
                    *n = if rest.is_empty() {
                        Node::Leaf(action)
                    } else {
                        Node::Branch(HashMap::new())
                    };
                }
            })
            .or_insert_with(|| {
                if rest.is_empty() {
                    Node::Leaf(action)
                } else {
                    Node::Branch(HashMap::new())
                }
            });
        for (i, key) in rest.iter().enumerate() {
            let last = i + 1 == rest.len();
            let Node::Branch(children) = node else {
                unreachable!("interior nodes are branches");
            };
            node = children
                .entry(*key)
                .and_modify(|n| {
                    if last || matches!(n, Node::Leaf(_)) {
                        *n = if last {
                            Node::Leaf(action)
                        } else {
                            Node::Branch(HashMap::new())
                        };
                    }
                })
                .or_insert_with(|| {
                    if last {
                        Node::Leaf(action)
                    } else {
                        Node::Branch(HashMap::new())
                    }
                });
        }
    }

    /// Apply one rc-file entry.
    pub fn bind_spec(&mut self, key_spec: &str, action_name: &str) -> Result<(), KeymapError> {
        let keys = parse_seq(key_spec)?;
        let action = Action::by_name(action_name)?;
        trace!(target: "keymap", key = %key_spec, action = %action_name, "bind");
        self.bind(&keys, action);
        Ok(())
    }

    fn unbind(children: &mut HashMap<Key, Node>, first: Key, rest: &[Key]) {
        match rest.split_first() {
            None => {
                children.remove(&first);
            }
            Some((next, tail)) => {
                if let Some(Node::Branch(inner)) = children.get_mut(&first) {
                    Self::unbind(inner, *next, tail);
                    if inner.is_empty() {
                        children.remove(&first);
                    }
                }
            }
        }
    }

    /// Resolve a pending key sequence.
    pub fn lookup(&self, seq: &[Key]) -> Lookup {
        let Some((first, rest)) = seq.split_first() else {
            return Lookup::Unmapped;
        };
        let mut node = match self.root.get(first) {
            Some(node) => node,
            None => return Lookup::Unmapped,
        };
        for key in rest {
            match node {
                Node::Branch(children) => match children.get(key) {
                    Some(next) => node = next,
                    None => return Lookup::Unmapped,
                },
                Node::Leaf(_) => return Lookup::Unmapped,
            }
        }
        match node {
            Node::Leaf(action) => Lookup::Matched(*action),
            Node::Branch(_) => Lookup::Pending,
        }
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Self::default_bindings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_named_and_chorded_keys() {
        assert_eq!(parse_key("a").unwrap(), Key::plain(KeyCode::Char('a')));
        assert_eq!(parse_key("Enter").unwrap(), Key::plain(KeyCode::Enter));
        assert_eq!(parse_key("C-x").unwrap(), Key::ctrl('x'));
        assert_eq!(
            parse_key("C-M-q").unwrap(),
            Key::new(KeyCode::Char('q'), Mods::CTRL | Mods::ALT)
        );
        assert_eq!(
            parse_key("C-Space").unwrap(),
            Key::new(KeyCode::Char(' '), Mods::CTRL)
        );
        assert_eq!(parse_key("F5").unwrap(), Key::plain(KeyCode::F(5)));
        // A bare dash is the '-' key, not a modifier separator.
        assert_eq!(parse_key("-").unwrap(), Key::plain(KeyCode::Char('-')));
        assert_eq!(parse_key("C--").unwrap(), Key::ctrl('-'));
    }

    #[test]
    fn rejects_garbage_keys() {
        assert!(parse_key("").is_err());
        assert!(parse_key("NotAKey").is_err());
        assert!(parse_seq(" , ").is_err());
    }

    #[test]
    fn default_bindings_resolve() {
        let map = Keymap::default_bindings();
        assert_eq!(
            map.lookup(&[Key::plain(KeyCode::Enter)]),
            Lookup::Matched(Action::Finish)
        );
        assert_eq!(
            map.lookup(&[Key::ctrl('n')]),
            Lookup::Matched(Action::SelectDown)
        );
        assert_eq!(
            map.lookup(&[Key::plain(KeyCode::Char('z'))]),
            Lookup::Unmapped
        );
    }

    #[test]
    fn chord_sequences_report_pending_then_match() {
        let mut map = Keymap::empty();
        map.bind(&parse_seq("C-x,C-c").unwrap(), Action::Cancel);
        assert_eq!(map.lookup(&[Key::ctrl('x')]), Lookup::Pending);
        assert_eq!(
            map.lookup(&[Key::ctrl('x'), Key::ctrl('c')]),
            Lookup::Matched(Action::Cancel)
        );
        assert_eq!(
            map.lookup(&[Key::ctrl('x'), Key::ctrl('q')]),
            Lookup::Unmapped
        );
    }

    #[test]
    fn rebinding_replaces_and_noop_removes() {
        let mut map = Keymap::default_bindings();
        map.bind_spec("C-n", "ScrollPageDown").unwrap();
        assert_eq!(
            map.lookup(&[Key::ctrl('n')]),
            Lookup::Matched(Action::ScrollPageDown)
        );
        map.bind_spec("C-n", "Noop").unwrap();
        assert_eq!(map.lookup(&[Key::ctrl('n')]), Lookup::Unmapped);
    }

    #[test]
    fn unknown_action_names_fail() {
        let mut map = Keymap::empty();
        assert_eq!(
            map.bind_spec("C-q", "Explode"),
            Err(KeymapError::UnknownAction("Explode".into()))
        );
    }

    #[test]
    fn longer_binding_over_a_leaf_converts_it() {
        let mut map = Keymap::empty();
        map.bind(&parse_seq("C-x").unwrap(), Action::Cancel);
        map.bind(&parse_seq("C-x,k").unwrap(), Action::Finish);
        // The leaf became a branch; the single-chord binding is gone.
        assert_eq!(map.lookup(&[Key::ctrl('x')]), Lookup::Pending);
        assert_eq!(
            map.lookup(&[Key::ctrl('x'), Key::plain(KeyCode::Char('k'))]),
            Lookup::Matched(Action::Finish)
        );
    }
}
