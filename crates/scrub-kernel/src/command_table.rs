//! [`CommandTable`] – action → firmware code mapping.
//!
//! Every action owns two base codes: one for "instrument not confirmed in
//! view" and one for "instrument confirmed".  The resolver appends the
//! handedness suffix.
//!
//! | action | without object | with object |
//! |---|---|---|
//! | incision | `a0` | `a1` |
//! | stitch | `b0` | `b1` |
//! | grasp | `d0` | `d1` |
//! | cut | `e0` | `e1` |
//!
//! Actions missing from the table (or missing a with-object code) fall back
//! to `<first letter><0|1>`, so a lookup never fails.
//!
//! The table is owned and injected.  Share it between a running pipeline and
//! an operator shell through [`SharedCommandTable`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use scrub_types::{ScrubError, SurgicalAction};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Base codes of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCodes {
    pub without_object: String,
    /// `None` means "use the `<letter>1` fallback".
    pub with_object: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("command code for '{action}' must not be blank")]
    BlankCode { action: String },

    #[error("command code {code:?} for '{action}' must not contain whitespace")]
    Whitespace { action: String, code: String },
}

impl From<MappingError> for ScrubError {
    fn from(e: MappingError) -> Self {
        ScrubError::InvalidMapping(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CommandTable
// ────────────────────────────────────────────────────────────────────────────

/// Ordered action → [`ActionCodes`] table.
///
/// # Example
///
/// ```
/// use scrub_kernel::command_table::CommandTable;
/// use scrub_types::SurgicalAction;
///
/// let mut table = CommandTable::new();
/// assert_eq!(table.code_for(&SurgicalAction::Stitch, true), "b1");
///
/// let retract = SurgicalAction::Custom("retract".into());
/// assert_eq!(table.code_for(&retract, false), "r0");
///
/// table.add_action_mapping(retract.clone(), "r5", Some("r6")).unwrap();
/// assert_eq!(table.code_for(&retract, true), "r6");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    entries: Vec<(SurgicalAction, ActionCodes)>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// Table pre-loaded with the built-in actions.
    pub fn new() -> Self {
        let defaults = [("a0", "a1"), ("b0", "b1"), ("d0", "d1"), ("e0", "e1")];
        let entries = SurgicalAction::BUILTIN
            .into_iter()
            .zip(defaults)
            .map(|(action, (without, with))| {
                (
                    action,
                    ActionCodes {
                        without_object: without.to_string(),
                        with_object: Some(with.to_string()),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Table with no mappings; every lookup uses the fallback.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert or replace the codes of `action`.
    ///
    /// Idempotent.  Passing `None` for `code_with_object` keeps whatever
    /// with-object code the action already had.
    ///
    /// # Errors
    ///
    /// [`MappingError`] for blank codes or codes containing whitespace; the
    /// table is left unchanged.
    pub fn add_action_mapping(
        &mut self,
        action: SurgicalAction,
        code_without_object: &str,
        code_with_object: Option<&str>,
    ) -> Result<(), MappingError> {
        let without = check_code(&action, code_without_object)?;
        let with = code_with_object
            .map(|c| check_code(&action, c))
            .transpose()?;

        match self.entries.iter_mut().find(|(a, _)| *a == action) {
            Some((_, codes)) => {
                codes.without_object = without;
                if with.is_some() {
                    codes.with_object = with;
                }
            }
            None => self.entries.push((
                action.clone(),
                ActionCodes {
                    without_object: without,
                    with_object: with,
                },
            )),
        }
        info!(%action, "action mapping updated");
        Ok(())
    }

    pub fn get(&self, action: &SurgicalAction) -> Option<&ActionCodes> {
        self.entries
            .iter()
            .find(|(a, _)| a == action)
            .map(|(_, codes)| codes)
    }

    /// Base code for `action`, falling back to `<first letter><0|1>`.
    pub fn code_for(&self, action: &SurgicalAction, object_present: bool) -> String {
        let mapped = self.get(action).and_then(|codes| {
            if object_present {
                codes.with_object.clone()
            } else {
                Some(codes.without_object.clone())
            }
        });
        mapped.unwrap_or_else(|| format!("{}{}", action.first_letter(), u8::from(object_present)))
    }

    /// Mapped actions in insertion order.
    pub fn actions(&self) -> Vec<&SurgicalAction> {
        self.entries.iter().map(|(a, _)| a).collect()
    }

    /// Flat `(key, code)` view: `incision`, `incision_with_object`, …
    pub fn flat_mappings(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.entries.len() * 2);
        for (action, codes) in &self.entries {
            out.push((action.to_string(), codes.without_object.clone()));
            if let Some(with) = &codes.with_object {
                out.push((format!("{action}_with_object"), with.clone()));
            }
        }
        out
    }

    /// Whether `code` is one of the base codes in the table.
    pub fn is_known_code(&self, code: &str) -> bool {
        self.entries.iter().any(|(_, codes)| {
            codes.without_object == code || codes.with_object.as_deref() == Some(code)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_code(action: &SurgicalAction, code: &str) -> Result<String, MappingError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(MappingError::BlankCode {
            action: action.to_string(),
        });
    }
    if code.chars().any(char::is_whitespace) {
        return Err(MappingError::Whitespace {
            action: action.to_string(),
            code: code.to_string(),
        });
    }
    Ok(code.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// SharedCommandTable
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to one [`CommandTable`] behind a reader-writer lock.
///
/// Resolution holds a read guard for its whole duration so it never observes
/// a half-applied mapping.  A poisoned lock is recovered: the table is only
/// ever mutated through [`CommandTable::add_action_mapping`], which validates
/// before touching any entry.
#[derive(Debug, Clone, Default)]
pub struct SharedCommandTable {
    inner: Arc<RwLock<CommandTable>>,
}

impl SharedCommandTable {
    pub fn new(table: CommandTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, CommandTable> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CommandTable> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add_action_mapping(
        &self,
        action: SurgicalAction,
        code_without_object: &str,
        code_with_object: Option<&str>,
    ) -> Result<(), MappingError> {
        self.write()
            .add_action_mapping(action, code_without_object, code_with_object)
    }

    /// Owned copy of the current table.
    pub fn snapshot(&self) -> CommandTable {
        self.read().clone()
    }
}
