//! Convenient re-exports of commonly used types.
//!
//! The prelude can be imported with:
//! ```
//! use archetype_pipeline::prelude::*;
//! ```

pub use crate::assets::{AssetId, AssetType, LoadContext, LoaderRegistry};
pub use crate::bundle::{BundleLoadProgress, BundleLoadState, BundleManager};
pub use crate::component_any_impls;
pub use crate::config::{OctreeConfig, PipelineConfig};
pub use crate::engine::EngineCore;
pub use crate::error::{PipelineError, Result};
pub use crate::event_bus::{Event, EventBus, SubscriptionId};
pub use crate::input::{Input, KeyCode, MouseButton, MousePosition};
pub use crate::math::{Aabb, Frustum, Mat4, Quat, Ray, Sphere, Vec3};
pub use crate::resources::{
    CachedResourceManager, Handle, MaterialResource, MemoryBudget, MeshResource, Resource,
};
pub use crate::scene::{
    Camera, Component, ComponentContext, EntityId, MeshRenderer, RenderQueueKind, Renderer,
    Scene, SceneMessage, Transform,
};
pub use crate::time::{FixedTime, Time};
