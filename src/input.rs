//! Input state and the input → event bus producer.
//!
//! The windowing layer feeds raw device notifications into an [`InputPublisher`],
//! which keeps per-frame [`Input`] state and broadcasts the matching events so
//! cameras, HUDs and game logic can react without polling.
//!
//! ```
//! use archetype_pipeline::event_bus::EventBus;
//! use archetype_pipeline::input::{InputPublisher, KeyCode};
//! use std::sync::Arc;
//!
//! let mut input = InputPublisher::new(Arc::new(EventBus::new()));
//! input.key_down(KeyCode::Space);
//! assert!(input.keyboard().just_pressed(KeyCode::Space));
//! input.end_frame();
//! ```

use crate::event_bus::EventBus;
use crate::event_types::{
    KeyPressedEvent, KeyReleasedEvent, MouseButtonEvent, MouseMovedEvent, WindowResizedEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

/// Pressed / just-pressed / just-released tracker
#[derive(Clone, Debug)]
pub struct Input<T: Copy + Eq + Hash> {
    pressed: HashSet<T>,
    just_pressed: HashSet<T>,
    just_released: HashSet<T>,
}

impl<T: Copy + Eq + Hash> Input<T> {
    pub fn new() -> Self {
        Self {
            pressed: HashSet::new(),
            just_pressed: HashSet::new(),
            just_released: HashSet::new(),
        }
    }

    /// Returns `false` for an auto-repeat of a key already held
    pub fn press(&mut self, input: T) -> bool {
        let fresh = self.pressed.insert(input);
        if fresh {
            self.just_pressed.insert(input);
        }
        fresh
    }

    /// Returns `false` if the input was not held
    pub fn release(&mut self, input: T) -> bool {
        let held = self.pressed.remove(&input);
        if held {
            self.just_released.insert(input);
        }
        held
    }

    pub fn pressed(&self, input: T) -> bool {
        self.pressed.contains(&input)
    }

    pub fn just_pressed(&self, input: T) -> bool {
        self.just_pressed.contains(&input)
    }

    pub fn just_released(&self, input: T) -> bool {
        self.just_released.contains(&input)
    }

    pub fn any_pressed(&self, inputs: &[T]) -> bool {
        inputs.iter().any(|i| self.pressed.contains(i))
    }

    pub fn get_pressed(&self) -> impl Iterator<Item = &T> {
        self.pressed.iter()
    }

    /// Forget this frame's transitions (call at end of frame)
    pub fn clear_just_changed(&mut self) {
        self.just_pressed.clear();
        self.just_released.clear();
    }

    /// Release everything, e.g. on focus loss
    pub fn reset(&mut self) {
        self.pressed.clear();
        self.just_pressed.clear();
        self.just_released.clear();
    }
}

impl<T: Copy + Eq + Hash> Default for Input<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyboard key codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    // Letters
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
    I,
    J,
    K,
    L,
    M,
    N,
    O,
    P,
    Q,
    R,
    S,
    T,
    U,
    V,
    W,
    X,
    Y,
    Z,

    // Numbers
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,

    // Function keys
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,

    // Editing
    Space,
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,

    // Arrows
    Left,
    Right,
    Up,
    Down,

    // Modifiers
    LShift,
    RShift,
    LControl,
    RControl,
    LAlt,
    RAlt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

pub type KeyboardInput = Input<KeyCode>;
pub type MouseInput = Input<MouseButton>;

/// Cursor position and per-frame delta
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MousePosition {
    pub x: f32,
    pub y: f32,
    pub delta_x: f32,
    pub delta_y: f32,
    initialized: bool,
}

impl MousePosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new position. The first sample produces no delta.
    pub fn update(&mut self, x: f32, y: f32) {
        if self.initialized {
            self.delta_x += x - self.x;
            self.delta_y += y - self.y;
        }
        self.x = x;
        self.y = y;
        self.initialized = true;
    }

    pub fn clear_delta(&mut self) {
        self.delta_x = 0.0;
        self.delta_y = 0.0;
    }
}

/// Turns raw device notifications into input state plus bus events
pub struct InputPublisher {
    bus: Arc<EventBus>,
    keyboard: KeyboardInput,
    mouse: MouseInput,
    cursor: MousePosition,
    window_size: (u32, u32),
}

impl InputPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            keyboard: KeyboardInput::new(),
            mouse: MouseInput::new(),
            cursor: MousePosition::new(),
            window_size: (0, 0),
        }
    }

    pub fn key_down(&mut self, key: KeyCode) {
        let fresh = self.keyboard.press(key);
        self.bus.broadcast(KeyPressedEvent {
            key,
            repeat: !fresh,
        });
    }

    pub fn key_up(&mut self, key: KeyCode) {
        if self.keyboard.release(key) {
            self.bus.broadcast(KeyReleasedEvent { key });
        }
    }

    pub fn mouse_moved(&mut self, x: f32, y: f32) {
        let (prev_x, prev_y) = (self.cursor.x, self.cursor.y);
        let first = !self.cursor.initialized;
        self.cursor.update(x, y);
        let (delta_x, delta_y) = if first { (0.0, 0.0) } else { (x - prev_x, y - prev_y) };
        self.bus.broadcast(MouseMovedEvent {
            x,
            y,
            delta_x,
            delta_y,
        });
    }

    pub fn mouse_button(&mut self, button: MouseButton, pressed: bool) {
        let changed = if pressed {
            self.mouse.press(button)
        } else {
            self.mouse.release(button)
        };
        if changed {
            self.bus.broadcast(MouseButtonEvent {
                button,
                pressed,
                x: self.cursor.x,
                y: self.cursor.y,
            });
        }
    }

    /// Repeated notifications with an unchanged size are dropped
    pub fn window_resized(&mut self, width: u32, height: u32) {
        if self.window_size == (width, height) {
            return;
        }
        self.window_size = (width, height);
        self.bus.broadcast(WindowResizedEvent { width, height });
    }

    /// Window lost focus: release everything that is held
    pub fn focus_lost(&mut self) {
        let keys: Vec<KeyCode> = self.keyboard.get_pressed().copied().collect();
        for key in keys {
            self.key_up(key);
        }
        let buttons: Vec<MouseButton> = self.mouse.get_pressed().copied().collect();
        for button in buttons {
            self.mouse_button(button, false);
        }
    }

    pub fn keyboard(&self) -> &KeyboardInput {
        &self.keyboard
    }

    pub fn mouse(&self) -> &MouseInput {
        &self.mouse
    }

    pub fn cursor(&self) -> &MousePosition {
        &self.cursor
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Clear per-frame transitions and deltas
    pub fn end_frame(&mut self) {
        self.keyboard.clear_just_changed();
        self.mouse.clear_just_changed();
        self.cursor.clear_delta();
    }
}
