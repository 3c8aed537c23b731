use crate::assets::{AssetId, AssetType};
use crate::bundle::BundleLoadProgress;
use crate::event_bus::Event;
use crate::input::{KeyCode, MouseButton};

/// Macro for defining events with automatic Event trait implementation
#[macro_export]
macro_rules! define_event {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($field:ident : $ty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name {
            $(pub $field : $ty),*
        }

        impl $crate::event_bus::Event for $name {
            fn event_name(&self) -> &str {
                stringify!($name)
            }
        }
    };

    // Support for unit structs (no fields)
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $name;

        impl $crate::event_bus::Event for $name {
            fn event_name(&self) -> &str {
                stringify!($name)
            }
        }
    };
}

/// Bundle progress changed (one per asset completion, plus terminal states)
#[derive(Clone, Debug)]
pub struct BundleProgressEvent {
    pub progress: BundleLoadProgress,
}

impl Event for BundleProgressEvent {
    fn event_name(&self) -> &str {
        "BundleProgressEvent"
    }
}

/// A worker admitted a resource to the cache
#[derive(Clone, Debug)]
pub struct AssetLoadedEvent {
    pub asset: AssetId,
    pub asset_type: AssetType,
    pub bundle: String,
    pub size_bytes: usize,
}

impl Event for AssetLoadedEvent {
    fn event_name(&self) -> &str {
        "AssetLoadedEvent"
    }
}

/// A load request finished as failed
#[derive(Clone, Debug)]
pub struct AssetLoadFailedEvent {
    pub asset: AssetId,
    pub asset_type: AssetType,
    pub bundle: String,
    pub reason: String,
}

impl Event for AssetLoadFailedEvent {
    fn event_name(&self) -> &str {
        "AssetLoadFailedEvent"
    }
}

define_event! {
    /// Entries dropped by one cache admission or budget change
    pub struct CacheEvictionEvent {
        evicted: Vec<AssetId>,
        bytes_reclaimed: usize,
        over_budget: bool,
    }
}

define_event! {
    pub struct KeyPressedEvent {
        key: KeyCode,
        repeat: bool,
    }
}

define_event! {
    pub struct KeyReleasedEvent {
        key: KeyCode,
    }
}

define_event! {
    /// Cursor moved; deltas are relative to the previous notification
    pub struct MouseMovedEvent {
        x: f32,
        y: f32,
        delta_x: f32,
        delta_y: f32,
    }
}

define_event! {
    pub struct MouseButtonEvent {
        button: MouseButton,
        pressed: bool,
        x: f32,
        y: f32,
    }
}

define_event! {
    pub struct WindowResizedEvent {
        width: u32,
        height: u32,
    }
}

define_event! {
    /// Engine core finished shutting down its workers
    pub struct EngineShutdownEvent;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_define_event_names() {
        let ev = WindowResizedEvent {
            width: 800,
            height: 600,
        };
        assert_eq!(ev.event_name(), "WindowResizedEvent");
        assert_eq!(EngineShutdownEvent.event_name(), "EngineShutdownEvent");
    }

    #[test]
    fn test_macro_events_route_through_bus() {
        let bus = EventBus::new();
        let width = Arc::new(AtomicU32::new(0));
        let w = width.clone();
        bus.subscribe::<WindowResizedEvent, _>(move |e| {
            w.store(e.width, Ordering::SeqCst);
        });

        bus.broadcast(WindowResizedEvent {
            width: 1280,
            height: 720,
        });
        assert_eq!(width.load(Ordering::SeqCst), 1280);
    }
}
