//! # Scale/Chord Membership Resolver
//!
//! Tags each generated position that belongs to the selected scale or chord
//! with its degree, interval and root flag. Positions outside the selection
//! are dropped; the full generator output remains available for dimmed
//! display.

use std::collections::BTreeSet;

use crate::fretboard::NotePosition;
use crate::note::PitchClass;
use crate::theory::{Interval, Selection};

/// A position that belongs to the current selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPosition {
    pub position: NotePosition,
    /// 1-based index into the formula; the root is degree 1.
    pub degree: u8,
    pub interval: Interval,
    pub is_root: bool,
}

impl TaggedPosition {
    pub fn pitch_class(&self) -> PitchClass {
        self.position.pitch_class()
    }

    pub fn midi(&self) -> i32 {
        self.position.midi
    }

    pub fn bound(&self) -> i32 {
        self.position.bound()
    }

    pub fn string(&self) -> Option<u8> {
        self.position.string()
    }
}

/// Label for a member note: the interval spelled from the root when that
/// spelling lands on the same degree as the formula, else the formula's own
/// interval (e.g. `F` in C# major is spelled `4d` from the root but is the
/// formula's `3M`).
fn interval_label(root: PitchClass, note: PitchClass, catalog: Interval) -> Interval {
    match Interval::between(root, note) {
        Some(spelled) if spelled.simple_number() == catalog.simple_number() => spelled,
        _ => catalog,
    }
}

/// Tags every position of `all_positions` that belongs to `selection`,
/// preserving input order. When a pitch class appears more than once in the
/// formula, the first degree wins.
pub fn resolve(selection: &Selection, all_positions: &[NotePosition]) -> Vec<TaggedPosition> {
    let root = selection.root();
    let formula = selection.formula();
    let members = formula.pitch_classes(root);

    all_positions
        .iter()
        .filter_map(|pos| {
            let pc = pos.pitch_class();
            let idx = members.iter().position(|m| *m == pc)?;
            Some(TaggedPosition {
                position: pos.clone(),
                degree: idx as u8 + 1,
                interval: interval_label(root, pc, formula.intervals[idx]),
                is_root: pc == root,
            })
        })
        .collect()
}

/// Number of distinct degrees present in `positions`.
pub fn distinct_degrees(positions: &[TaggedPosition]) -> usize {
    positions
        .iter()
        .map(|p| p.degree)
        .collect::<BTreeSet<_>>()
        .len()
}
