//! Lifecycle Orchestrator
//!
//! Runs the fixed-order callback pipeline on every instance the container
//! creates, and the symmetric teardown at shutdown.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Instantiate (constructor, resolved constructor args only)
//!    ↓
//! 2. PopulateProperties (property-level dependencies)
//!    ↓
//! 3. Aware callbacks                   ← fixed capability order
//!    ↓
//! 4. before_init post-processors      ← registration order
//!    ↓
//! 5. Init hook, then custom init method
//!    ↓
//! 6. after_init post-processors       ← registration order
//!    ↓
//! [Ready...]
//!    ↓
//! 7. before_destruction processors    ← shutdown, reverse creation order
//!    ↓
//! 8. Destroy hook, then custom destroy method
//! ```
//!
//! Post-processors may substitute the instance flowing through the pipeline;
//! destruction failures are collected and reported once, never interrupting
//! the rest of teardown.

mod aware;
mod orchestrator;
mod processor;

pub use aware::{AwareWiring, Capability, EventPublisher, MessageSource, ResourceLoader};
pub use processor::{DestructionAwareProcessor, ServicePostProcessor};

pub(crate) use orchestrator::{destroy, initialize};

use strum_macros::Display;

/// Phase of the per-instance lifecycle, reported on creation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecyclePhase {
    #[strum(serialize = "instantiate")]
    Instantiate,
    #[strum(serialize = "populate-properties")]
    PopulateProperties,
    #[strum(serialize = "aware-callbacks")]
    Aware,
    #[strum(serialize = "before-init")]
    BeforeInit,
    #[strum(serialize = "init")]
    Init,
    #[strum(serialize = "after-init")]
    AfterInit,
    #[strum(serialize = "before-destruction")]
    BeforeDestruction,
    #[strum(serialize = "destroy")]
    Destroy,
}
