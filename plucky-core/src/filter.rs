//! # Window Filter
//!
//! Narrows the tagged positions of a selection to what the learner is
//! practicing: the selected window (if any) and the note-range mode.
//!
//! Guitar scale windows are widened by one fret on each side, at most twice,
//! while a degree of the scale is missing from the inner strings (1-4); the
//! outer strings alone make for awkward fingerings.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::clustering::PositionWindow;
use crate::fretboard::MAX_FRET;
use crate::membership::TaggedPosition;
use crate::theory::Selection;
use crate::tuning::InstrumentKind;

const MAX_EXPANSIONS: usize = 2;
const INNER_STRINGS: std::ops::RangeInclusive<u8> = 1..=4;

/// Which octave span of the selection is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteRange {
    #[default]
    All,
    /// Drop everything below the lowest root.
    FromRoot,
    /// Keep only notes between the lowest and highest root.
    RootToRoot,
}

/// Applies a note-range mode. Needs at least two roots to do anything.
pub fn filter_by_note_range(positions: &[TaggedPosition], mode: NoteRange) -> Vec<TaggedPosition> {
    if mode == NoteRange::All {
        return positions.to_vec();
    }
    let root_midis: Vec<i32> = positions.iter().filter(|p| p.is_root).map(|p| p.midi()).collect();
    if root_midis.len() < 2 {
        return positions.to_vec();
    }
    let low = root_midis.iter().copied().min().unwrap_or(i32::MIN);
    let high = root_midis.iter().copied().max().unwrap_or(i32::MAX);

    positions
        .iter()
        .filter(|p| match mode {
            NoteRange::FromRoot => p.midi() >= low,
            NoteRange::RootToRoot => p.midi() >= low && p.midi() <= high,
            NoteRange::All => true,
        })
        .cloned()
        .collect()
}

/// The positions left after window and range filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredView {
    /// The selected window, as listed in the catalog.
    pub window: Option<PositionWindow>,
    /// Bounds actually used, after any inner-string expansion.
    pub span: Option<(i32, i32)>,
    pub positions: Vec<TaggedPosition>,
}

fn within(tagged: &[TaggedPosition], start: i32, end: i32) -> Vec<TaggedPosition> {
    tagged
        .iter()
        .filter(|p| p.bound() >= start && p.bound() <= end)
        .cloned()
        .collect()
}

fn inner_strings_miss_a_degree(filtered: &[TaggedPosition], all_degrees: &BTreeSet<u8>) -> bool {
    let inner: BTreeSet<u8> = filtered
        .iter()
        .filter(|p| p.string().is_some_and(|s| INNER_STRINGS.contains(&s)))
        .map(|p| p.degree)
        .collect();
    !all_degrees.is_subset(&inner)
}

/// Filters `tagged` by the window at `selected` (ignored when out of range)
/// and by `range`.
pub fn apply_window(
    selection: &Selection,
    kind: InstrumentKind,
    tagged: &[TaggedPosition],
    windows: &[PositionWindow],
    selected: Option<usize>,
    range: NoteRange,
) -> FilteredView {
    let window = selected.and_then(|i| windows.get(i)).cloned();

    let Some(active) = window else {
        let positions = if selection.is_chord() {
            tagged.to_vec()
        } else {
            filter_by_note_range(tagged, range)
        };
        return FilteredView {
            window: None,
            span: None,
            positions,
        };
    };

    // Chords keep their window verbatim: the voicing is the exercise.
    if selection.is_chord() || kind == InstrumentKind::Piano {
        return FilteredView {
            span: Some((active.start, active.end)),
            positions: within(tagged, active.start, active.end),
            window: Some(active),
        };
    }

    let all_degrees: BTreeSet<u8> = tagged.iter().map(|p| p.degree).collect();
    let (mut start, mut end) = (active.start, active.end);
    let mut positions = filter_by_note_range(&within(tagged, start, end), range);

    for _ in 0..MAX_EXPANSIONS {
        if !inner_strings_miss_a_degree(&positions, &all_degrees) {
            break;
        }
        start = (start - 1).max(0);
        end = (end + 1).min(MAX_FRET as i32);
        positions = filter_by_note_range(&within(tagged, start, end), range);
    }

    FilteredView {
        window: Some(active),
        span: Some((start, end)),
        positions,
    }
}
