//! Data models shared across services and handlers.

pub mod board;
pub mod crash;
pub mod modpack;
pub mod mods;
pub mod plan;
pub mod user;

pub use board::{BoardCategory, BoardMod, BoardState, Camera, Position};
pub use crash::{CrashErrorKind, CrashSession, FixPriority, RepairAction, RepairOperation};
pub use modpack::{ModpackRow, PackArchitecture, PackCategory, RefModpack};
pub use mods::{
    DependencyType, ModDependency, ModEntry, ModFilters, ModRow, UNIVERSAL_LOADER,
    decode_embedding, encode_embedding, is_valid_capability,
};
pub use plan::{
    PlannedArchitecture, PlannedCategory, QueryKind, RequestType, SearchPlan, SearchQuery,
    SelectedMod, SelectionRole,
};
pub use user::{CustomLimits, EffectiveLimits, SubscriptionTier, UNLIMITED, User, UserRow};
