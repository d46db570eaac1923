//! CircleHunt Core Library
//!
//! Geometric reasoning engine for the CircleHunt treasure hunt: players draw
//! circles that the hidden target is inside or outside of, and the engine
//! merges overlapping constraints, computes the remaining candidate area and
//! persists the map between sessions.

pub mod algebra;
pub mod codec;
pub mod config;
pub mod geometry;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod session;
pub mod shapes;
pub mod sharing;
pub mod storage;

pub use algebra::{LayerKind, RegionLayers, registry_solution, solution_region, unified_fill};
pub use codec::{CodecError, DecodedEntry, DecodedMap, FeatureCollection, decode, decode_with, encode};
pub use config::{ConfigError, HuntConfig};
pub use geometry::{GeometryError, LatLng, RegionPart, Ring};
pub use registry::{RegistryChange, RegistryError, RegistrySnapshot, ShapeRegistry};
pub use render::{EventKind, MapRenderer, RenderHandle, RenderTable, ShapeEvent, ShapeStyle};
pub use resolver::{IntersectionResolver, MergeRecord, ResolveReport};
pub use session::{ContextMenu, MapSession, MenuAction, SessionError};
pub use shapes::{Circle, Footprint, Marker, MergedRegion, Shape, ShapeId};
pub use sharing::{AcceptedShare, ShareBackend, ShareError, SharedCircle, SharingService};
pub use storage::{AutoSaveManager, LoadState, MapDocument, PersistenceError, Storage};
