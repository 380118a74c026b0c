//! Walker Module
//!
//! Pointer tracing over persisted records without a typed decode of the payload
//! bytes it does not need.
//!
//! ## Flow
//! ```text
//! load root ──► replay CommandStream ──► marker? ──► callback(visit) ──► WalkFlags
//!                     ▲                                                    │
//!                     └──── descend (reference / chain / inline / list) ◄──┘
//! ```
//!
//! A callback answers `CONTINUE` or `END`, optionally with `SAVE` (the owner was
//! changed in place) or `HOLDER_COPY` (the owner is replaced by a copy holding the
//! value put into the visit's holder).

mod flags;
mod stats;
mod walk;

pub use flags::{Flow, WalkFlags};
pub use stats::{TypeTiming, WalkStats};
pub use walk::{Pointee, Visit, WalkCallback, WalkOutcome, Walker};
