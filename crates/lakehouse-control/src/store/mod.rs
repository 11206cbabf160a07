//! Lifecycle-tracked caches of remotely fetched state.
//!
//! A [`ResourceStore`] wraps one remote value and exposes a uniform
//! `New → Loading → Ready | Error` lifecycle, with `Reloading` standing in
//! for a refresh of data that is already on screen. A [`StoreRegistry`]
//! memoises one store per key for the lifetime of the registry.
//!
//! ```text
//! New ──▶ Loading ──▶ Ready ──▶ Reloading ──▶ Ready
//!            │  ▲                  │
//!            ▼  │                  ▼
//!           Error ◀────────────────┘
//! ```

mod registry;
mod resource;

pub use registry::{StoreKey, StoreRegistry};
pub use resource::{LoadPhase, ResourceStore, StoreState, StoreView};
