//! Command Resolver – pure `(intent, detection, table) → code`.
//!
//! Rules, in order:
//!
//! 1. suffix `l` for a left-handed operator, `r` otherwise;
//! 2. the object criterion is the colour-only flag when present, otherwise
//!    presence plus both geometric windows;
//! 3. no action ⇒ [`NO_ACTION`];
//! 4. base code from the [`CommandTable`] (with fallback);
//! 5. `base + suffix`.

use scrub_types::{DetectionResult, Handedness, IntentRecord};
use tracing::debug;

use crate::command_table::CommandTable;

/// Sentinel sent when no action was understood.  Never suffixed.
pub const NO_ACTION: &str = "x";

/// Resolve one cycle to the firmware command string.
///
/// Deterministic and side-effect free.
///
/// ```
/// use scrub_kernel::{resolve, CommandTable};
/// use scrub_types::{DetectionMode, DetectionResult, Handedness, IntentRecord, SurgicalAction};
///
/// let intent = IntentRecord {
///     action: Some(SurgicalAction::Incision),
///     handedness: Some(Handedness::Right),
///     ..Default::default()
/// };
/// let nothing = DetectionResult::no_object(DetectionMode::Full);
/// assert_eq!(resolve(&intent, &nothing, &CommandTable::new()), "a0r");
/// ```
pub fn resolve(intent: &IntentRecord, detection: &DetectionResult, table: &CommandTable) -> String {
    let suffix = intent.handedness.map_or('r', Handedness::suffix);
    let object_present = detection.criteria_met();

    let Some(action) = &intent.action else {
        debug!("no action in intent");
        return NO_ACTION.to_string();
    };

    let base = table.code_for(action, object_present);
    let command = format!("{base}{suffix}");
    debug!(%action, object_present, %command, "command resolved");
    command
}
