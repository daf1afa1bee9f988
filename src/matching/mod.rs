//! Identifier reconciliation layer
//!
//! Catalog entities are referenced inconsistently across the data set:
//! database keys, human codes, slugs, legacy string ids, and nested
//! reference objects wrapping any of them. This layer resolves every
//! historical spelling to the same logical entity.
//!
//! ```text
//! raw identifier
//!     │ normalize (variant generation)
//!     ▼
//! alias set ──► Aliasable entities (alias builder)
//!     │
//!     ▼
//! MatchingContext (alias→entity, alias→progress, per operation)
//! ```

pub mod alias;
pub mod context;
pub mod normalize;

pub use alias::{identifier_aliases, slugify, Aliasable};
pub use context::{
    find_lesson_progress, find_lesson_progress_by_identifier, lesson_aliases, AliasCollision,
    ModuleMatchingContext, Resolution, TrackMatchingContext,
};
pub use normalize::{looks_like_primary_key, normalize_identifier, normalize_str};
