//! Poll-based input state and named actions.
//!
//! The host (window layer) feeds raw key and mouse-button transitions into
//! [`InputState`]; scripts query named actions mapped onto keys. Action
//! state is refreshed once per frame by [`InputState::update_actions`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Keys the engine binds actions to.
///
/// Covers movement, camera and menu navigation. The window layer drops
/// native keys that have no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum KeyCode {
    W,
    A,
    S,
    D,
    Q,
    E,
    Space,
    ShiftLeft,
    ControlLeft,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Enter,
    Escape,
    Tab,
}

/// Mouse button identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Per-frame state of a named action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionState {
    /// Any bound key is held.
    pub pressed: bool,
    /// Became pressed this frame.
    pub just_pressed: bool,
    /// Became released this frame.
    pub just_released: bool,
}

/// Raw key/button state plus named action bindings.
#[derive(Debug, Default)]
pub struct InputState {
    keys: HashSet<KeyCode>,
    buttons: HashSet<MouseButton>,
    cursor: (f32, f32),
    bindings: HashMap<String, Vec<KeyCode>>,
    actions: HashMap<String, ActionState>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a key transition reported by the window layer.
    pub fn set_key(&mut self, key: KeyCode, down: bool) {
        if down {
            self.keys.insert(key);
        } else {
            self.keys.remove(&key);
        }
    }

    pub fn set_mouse_button(&mut self, button: MouseButton, down: bool) {
        if down {
            self.buttons.insert(button);
        } else {
            self.buttons.remove(&button);
        }
    }

    pub fn set_cursor_position(&mut self, x: f32, y: f32) {
        self.cursor = (x, y);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_mouse_button_down(&self, button: MouseButton) -> bool {
        self.buttons.contains(&button)
    }

    pub fn cursor_position(&self) -> (f32, f32) {
        self.cursor
    }

    /// Binds `action` to `keys`, replacing any previous binding.
    pub fn bind_action(&mut self, action: impl Into<String>, keys: impl IntoIterator<Item = KeyCode>) {
        let action = action.into();
        self.bindings.insert(action.clone(), keys.into_iter().collect());
        self.actions.entry(action).or_default();
    }

    /// Recomputes every action from the current key state.
    pub fn update_actions(&mut self) {
        for (name, keys) in &self.bindings {
            let pressed = keys.iter().any(|k| self.keys.contains(k));
            let state = self.actions.entry(name.clone()).or_default();
            let was_pressed = state.pressed;
            *state = ActionState {
                pressed,
                just_pressed: pressed && !was_pressed,
                just_released: !pressed && was_pressed,
            };
        }
    }

    /// State of `action`; unbound actions report all-false.
    pub fn action(&self, action: &str) -> ActionState {
        self.actions.get(action).copied().unwrap_or_default()
    }
}
