pub mod config;
pub mod containment;
pub mod dirty;
pub mod error;
pub mod hit;
pub mod id;
pub mod layout;
pub mod model;
pub mod nav;
pub mod project;
pub mod selection;
pub mod store;

pub use config::{CanvasConfig, LayoutConfig};
pub use containment::{DragEnd, DropContext, DropDecision, Reparent, resolve_drop};
pub use dirty::DirtyTracker;
pub use error::{CanvasError, Result};
pub use hit::{BreadcrumbHitbox, hit_breadcrumb, hit_test, hit_test_rect};
pub use id::{EdgeId, NodeId};
pub use layout::{rearrange, resize_to_fit, scale_children};
pub use model::*;
pub use nav::{Breadcrumbs, Crumb};
pub use project::{Projection, VisibleNode, project, project_store};
pub use selection::{EdgeHighlighter, EdgeVisual};
pub use store::{CanvasStore, LoadReport};
