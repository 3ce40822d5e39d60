//! `scrub-kernel` – decision core.
//!
//! Deterministic, I/O-free pieces of the instruction cycle.
//!
//! # Modules
//!
//! - [`command_table`] – [`CommandTable`][command_table::CommandTable]: action →
//!   firmware code mapping with first-letter fallback, and the lock-guarded
//!   [`SharedCommandTable`][command_table::SharedCommandTable].
//! - [`resolver`] – [`resolve`][resolver::resolve]: pure
//!   `(intent, detection, table) → command` function.
//! - [`operators`] – [`OperatorProfiles`][operators::OperatorProfiles]: known
//!   operators, their handedness, and detection in instruction text.

pub mod command_table;
pub mod operators;
pub mod resolver;

pub use command_table::{ActionCodes, CommandTable, MappingError, SharedCommandTable};
pub use operators::{OperatorProfile, OperatorProfiles};
pub use resolver::{NO_ACTION, resolve};
