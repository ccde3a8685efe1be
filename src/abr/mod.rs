//! Adaptive bitrate subsystem.
//!
//! # Data Flow
//! ```text
//! manifest reply body
//!     → catalog.rs (distinct bitrate="..." values)
//!
//! completed segment transfer (bytes, forward→complete time)
//!     → estimator.rs (EWMA in kbit/s)
//!
//! next GET from the player
//!     → uri.rs (Manifest / Segment / Other, segment name fields)
//!     → controller.rs (select bitrate, plan the upstream request)
//! ```
//!
//! # Design Decisions
//! - Catalog and estimator are per client; only the fallback bitrate is shared
//! - Selection is a pure function of catalog, estimate and fallback, so it
//!   never decreases when the estimate rises

pub mod catalog;
pub mod controller;
pub mod estimator;
pub mod uri;

pub use catalog::BitrateCatalog;
pub use controller::{BitrateController, GlobalBest, RequestPlan, Selection, SelectionSource};
pub use estimator::ThroughputEstimator;
pub use uri::{classify_uri, ContentKind, ParsedUri, SegmentName};
