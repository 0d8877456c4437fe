//! Slot-based program builder.
//!
//! Programs are rendered from four named slots in a fixed order. Slots are
//! filled independently and each may be filled once; rendering fails if any
//! slot is missing, so a partially built program can never reach disk.

use super::AssemblyError;
use std::fmt;

/// Named segment of an assembled program, in render order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    /// Imports, credential lookups and embedded configuration.
    Preamble,
    /// Data-loading and indicator helpers.
    Helpers,
    /// The user script, verbatim.
    Body,
    /// Entry-point invocation and result serialization.
    Harness,
}

impl Slot {
    /// All slots in render order.
    pub const ORDER: [Slot; 4] = [Slot::Preamble, Slot::Helpers, Slot::Body, Slot::Harness];

    fn index(self) -> usize {
        match self {
            Slot::Preamble => 0,
            Slot::Helpers => 1,
            Slot::Body => 2,
            Slot::Harness => 3,
        }
    }

    /// Lower-case slot name used in section banners.
    pub fn name(self) -> &'static str {
        match self {
            Slot::Preamble => "preamble",
            Slot::Helpers => "helpers",
            Slot::Body => "user code",
            Slot::Harness => "harness",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builder that collects slot contents and renders them in order.
#[derive(Clone, Debug)]
pub struct ProgramTemplate {
    comment_prefix: &'static str,
    slots: [Option<String>; 4],
}

impl ProgramTemplate {
    /// Start an empty template. `comment_prefix` introduces line comments in
    /// the target language and is used for section banners.
    pub fn new(comment_prefix: &'static str) -> Self {
        Self {
            comment_prefix,
            slots: [None, None, None, None],
        }
    }

    /// Fill a slot.
    pub fn fill(mut self, slot: Slot, content: impl Into<String>) -> Result<Self, AssemblyError> {
        let entry = self
            .slots
            .get_mut(slot.index())
            .ok_or(AssemblyError::MissingSlot(slot))?;
        if entry.is_some() {
            return Err(AssemblyError::DuplicateSlot(slot));
        }
        *entry = Some(content.into());
        Ok(self)
    }

    /// Render all slots, each under a banner, separated by blank lines.
    pub fn render(&self) -> Result<String, AssemblyError> {
        let mut out = String::new();
        for slot in Slot::ORDER {
            let content = self
                .slots
                .get(slot.index())
                .and_then(Option::as_deref)
                .ok_or(AssemblyError::MissingSlot(slot))?;
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.comment_prefix);
            out.push_str(" ---- ");
            out.push_str(slot.name());
            out.push_str(" ----\n");
            out.push_str(content);
            if !content.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }
}
