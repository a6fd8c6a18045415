//! mp_timeline: Message timeline for Memopark Chat
//!
//! Pure, synchronous view-model code: time-gap grouping, a virtualized
//! window over a long message list, and the ordered per-session timeline
//! that feeds both.
//!
//! # Modules
//! - `group`: split a time-ordered list into display groups
//! - `window`: visible / render ranges with overscan and tail-following
//! - `timeline`: messages in ledger order, upserted as content decrypts

pub mod group;
pub mod timeline;
pub mod window;

pub use group::{group_by_gap, TimeGroup, DEFAULT_GROUP_GAP};
pub use timeline::{Timeline, TimelineConfig};
pub use window::VirtualWindow;
