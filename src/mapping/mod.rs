//! Mapping engine interface, the map guard, radius clearing and the
//! reference block map.

pub mod block_map;
pub mod clearing;
pub mod engine;
pub mod guard;

pub use block_map::BlockMap;
pub use clearing::RadiusClearer;
pub use engine::{BlockIndex, DistanceSlice, MappingEngine, MeshBlock, MeshUpdate, SliceRequest};
pub use guard::MapGuard;
