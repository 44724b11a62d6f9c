//! # Position Clustering Engine
//!
//! Splits the tagged positions of a selection into small playable windows:
//! "positions" for guitar scales, "voicings" for guitar and piano chords.
//!
//! Guitar windows are found with a greedy interval-covering search seeded by
//! anchors on the bass string:
//! 1. every anchor fret (lowest anchor first) tries windows of 4 then 5 frets
//!    that start at or before the anchor and still contain it;
//! 2. the narrowest window covering every degree wins; among equal widths the
//!    latest start (closest to the anchor) wins;
//! 3. the window is dropped when it shares more than the allowed number of
//!    frets with a window accepted earlier.
//!
//! Piano chord voicings are whole octaves that contain every chord degree.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::fretboard::MAX_FRET;
use crate::membership::{TaggedPosition, distinct_degrees};
use crate::theory::Selection;
use crate::tuning::{InstrumentKind, STRING_COUNT};

/// Candidate window widths in frets, narrowest first.
pub const POSITION_WIDTHS: [i32; 2] = [4, 5];

/// A contiguous range on the fret (or octave) axis, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionWindow {
    pub ordinal: usize,
    pub label: String,
    pub start: i32,
    pub end: i32,
}

impl PositionWindow {
    pub fn contains(&self, bound: i32) -> bool {
        bound >= self.start && bound <= self.end
    }

    pub fn width(&self) -> i32 {
        self.end - self.start + 1
    }

    /// Number of axis units shared with `[start, end]`.
    pub fn shared_units(&self, start: i32, end: i32) -> i32 {
        (self.end.min(end) - self.start.max(start) + 1).max(0)
    }
}

/// Which bass-string positions may seed a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    AnyDegree,
    RootOnly,
}

impl Anchor {
    fn admits(self, position: &TaggedPosition) -> bool {
        match self {
            Anchor::AnyDegree => true,
            Anchor::RootOnly => position.is_root,
        }
    }
}

/// Tunables of the fret search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FretRules {
    pub anchor: Anchor,
    /// Anchors above this fret are ignored.
    pub max_anchor_fret: i32,
    /// A window sharing more frets than this with an accepted one is dropped.
    pub max_shared_frets: i32,
    pub label_prefix: &'static str,
}

pub const SCALE_RULES: FretRules = FretRules {
    anchor: Anchor::AnyDegree,
    max_anchor_fret: 11,
    max_shared_frets: 2,
    label_prefix: "Position",
};

pub const CHORD_RULES: FretRules = FretRules {
    anchor: Anchor::RootOnly,
    max_anchor_fret: 14,
    max_shared_frets: 0,
    label_prefix: "Voicing",
};

/// Windows for a selection on an instrument kind. Piano scales have no
/// windows: the whole range is practiced.
pub fn windows_for(
    selection: &Selection,
    kind: InstrumentKind,
    tagged: &[TaggedPosition],
) -> Vec<PositionWindow> {
    match (kind, selection.is_chord()) {
        (InstrumentKind::Guitar, false) => cluster_frets(tagged, &SCALE_RULES),
        (InstrumentKind::Guitar, true) => cluster_frets(tagged, &CHORD_RULES),
        (InstrumentKind::Piano, true) => cluster_octaves(tagged),
        (InstrumentKind::Piano, false) => Vec::new(),
    }
}

/// Bass-string positions used as anchors: the lowest string, else the one
/// above it; if the anchor rule admits nothing on either, any note on those
/// strings.
fn bass_anchors<'a>(tagged: &'a [TaggedPosition], anchor: Anchor) -> Vec<&'a TaggedPosition> {
    let lowest = (STRING_COUNT - 1) as u8;
    let on_string = |string: u8, restrict: bool| -> Vec<&'a TaggedPosition> {
        tagged
            .iter()
            .filter(|p| p.string() == Some(string))
            .filter(|p| !restrict || anchor.admits(p))
            .collect()
    };

    [(lowest, true), (lowest - 1, true), (lowest, false), (lowest - 1, false)]
        .into_iter()
        .map(|(string, restrict)| on_string(string, restrict))
        .find(|candidates| !candidates.is_empty())
        .unwrap_or_default()
}

fn covers_all(tagged: &[TaggedPosition], start: i32, end: i32, total_degrees: usize) -> bool {
    let degrees: BTreeSet<u8> = tagged
        .iter()
        .filter(|p| p.bound() >= start && p.bound() <= end)
        .map(|p| p.degree)
        .collect();
    degrees.len() >= total_degrees
}

/// Narrowest window around `anchor` covering every degree; ties go to the
/// latest start.
fn best_window(tagged: &[TaggedPosition], anchor: i32, total_degrees: usize) -> Option<(i32, i32)> {
    let widest = POSITION_WIDTHS[POSITION_WIDTHS.len() - 1];
    let lowest_start = (anchor - widest).max(0);
    let mut best: Option<(i32, i32)> = None;

    for start in (lowest_start..=anchor.max(0)).rev() {
        for width in POSITION_WIDTHS {
            let end = start + width - 1;
            if end > MAX_FRET as i32 || anchor > end {
                continue;
            }
            if !covers_all(tagged, start, end, total_degrees) {
                continue;
            }
            let narrower = best.is_none_or(|(s, e)| width < e - s + 1);
            if narrower {
                best = Some((start, end));
            }
        }
    }
    best
}

fn relabel(windows: &mut [PositionWindow], prefix: &str) {
    for (i, window) in windows.iter_mut().enumerate() {
        window.ordinal = i;
        window.label = format!("{} {}", prefix, i + 1);
    }
}

/// Clusters guitar positions into fret windows.
pub fn cluster_frets(tagged: &[TaggedPosition], rules: &FretRules) -> Vec<PositionWindow> {
    if tagged.is_empty() {
        return Vec::new();
    }
    let total_degrees = distinct_degrees(tagged);

    let anchor_frets: BTreeSet<i32> = bass_anchors(tagged, rules.anchor)
        .into_iter()
        .map(TaggedPosition::bound)
        .filter(|fret| *fret <= rules.max_anchor_fret)
        .collect();

    let mut windows: Vec<PositionWindow> = Vec::new();
    for anchor in anchor_frets {
        let Some((start, end)) = best_window(tagged, anchor, total_degrees) else {
            continue;
        };
        let overlaps = windows
            .iter()
            .any(|w| w.shared_units(start, end) > rules.max_shared_frets);
        if overlaps {
            continue;
        }
        windows.push(PositionWindow {
            ordinal: windows.len(),
            label: String::new(),
            start,
            end,
        });
    }

    relabel(&mut windows, rules.label_prefix);
    windows
}

/// Clusters piano chord positions into single-octave voicings.
pub fn cluster_octaves(tagged: &[TaggedPosition]) -> Vec<PositionWindow> {
    let total_degrees = distinct_degrees(tagged);
    let mut by_octave: BTreeMap<i32, BTreeSet<u8>> = BTreeMap::new();
    for p in tagged {
        by_octave.entry(p.bound()).or_default().insert(p.degree);
    }

    by_octave
        .into_iter()
        .filter(|(_, degrees)| degrees.len() >= total_degrees)
        .enumerate()
        .map(|(i, (octave, _))| PositionWindow {
            ordinal: i,
            label: format!("Voicing {} (Oct {})", i + 1, octave),
            start: octave,
            end: octave,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fretboard::NoteGenerator;
    use crate::membership::resolve;
    use crate::note::PitchClass;
    use crate::theory::SCALES;
    use crate::tuning::{DEFAULT_TUNING_ID, Instrument, PianoRange, tuning_or_default};

    fn tagged_on(instrument: &Instrument, selection: &Selection) -> Vec<TaggedPosition> {
        let all = NoteGenerator::new().generate(instrument).unwrap();
        resolve(selection, &all)
    }

    fn standard() -> Instrument {
        Instrument::Fretted(tuning_or_default(DEFAULT_TUNING_ID).clone())
    }

    fn bounds(windows: &[PositionWindow]) -> Vec<(i32, i32)> {
        windows.iter().map(|w| (w.start, w.end)).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_frets(&[], &SCALE_RULES).is_empty());
        assert!(cluster_frets(&[], &CHORD_RULES).is_empty());
        assert!(cluster_octaves(&[]).is_empty());
    }

    #[test]
    fn test_c_major_positions() {
        let selection = Selection::scale(PitchClass::C, "major").unwrap();
        let windows = cluster_frets(&tagged_on(&standard(), &selection), &SCALE_RULES);
        assert_eq!(bounds(&windows), [(0, 3), (3, 6), (5, 8), (7, 10), (10, 13)]);
        assert_eq!(windows[0].label, "Position 1");
        assert_eq!(windows[4].label, "Position 5");
        assert_eq!(windows[2].ordinal, 2);
    }

    #[test]
    fn test_a_minor_pentatonic_positions() {
        let selection = Selection::scale(PitchClass::A, "minor-pentatonic").unwrap();
        let windows = cluster_frets(&tagged_on(&standard(), &selection), &SCALE_RULES);
        assert_eq!(bounds(&windows), [(0, 3), (3, 6), (5, 8), (8, 11), (10, 13)]);
    }

    #[test]
    fn test_chord_voicings_are_root_anchored() {
        let c = Selection::chord(PitchClass::C, "major").unwrap();
        let windows = cluster_frets(&tagged_on(&standard(), &c), &CHORD_RULES);
        assert_eq!(bounds(&windows), [(8, 11)]);
        assert_eq!(windows[0].label, "Voicing 1");

        let am = Selection::chord(PitchClass::A, "minor").unwrap();
        let windows = cluster_frets(&tagged_on(&standard(), &am), &CHORD_RULES);
        assert_eq!(bounds(&windows), [(5, 8)]);
    }

    #[test]
    fn test_every_window_covers_every_degree() {
        for formula in SCALES.iter() {
            let selection = Selection::scale(PitchClass::E, &formula.id).unwrap();
            let tagged = tagged_on(&standard(), &selection);
            let total = distinct_degrees(&tagged);
            for window in cluster_frets(&tagged, &SCALE_RULES) {
                let inside: Vec<TaggedPosition> = tagged
                    .iter()
                    .filter(|p| window.contains(p.bound()))
                    .cloned()
                    .collect();
                assert_eq!(distinct_degrees(&inside), total, "{} {}", formula.id, window.label);
                assert!(window.end <= MAX_FRET as i32);
                assert!(window.width() == 4 || window.width() == 5);
            }
        }
    }

    #[test]
    fn test_overlap_limits() {
        for formula in SCALES.iter() {
            let selection = Selection::scale(PitchClass::G, &formula.id).unwrap();
            let windows = cluster_frets(&tagged_on(&standard(), &selection), &SCALE_RULES);
            for (i, a) in windows.iter().enumerate() {
                for b in &windows[i + 1..] {
                    assert!(a.shared_units(b.start, b.end) <= 2, "{}", formula.id);
                }
            }
        }

        for root in PitchClass::ALL {
            let selection = Selection::chord(root, "7").unwrap();
            let windows = cluster_frets(&tagged_on(&standard(), &selection), &CHORD_RULES);
            for (i, a) in windows.iter().enumerate() {
                for b in &windows[i + 1..] {
                    assert_eq!(a.shared_units(b.start, b.end), 0, "{}", root);
                }
            }
        }
    }

    #[test]
    fn test_narrowest_then_latest_start() {
        // Anchor A on the low string at fret 5; B sits at fret 2 (A string)
        // and fret 4 (G string). Both [2,5] and [4,7] are 4 wide; the later
        // start wins.
        let selection = Selection::scale(PitchClass::C, "major").unwrap();
        let tagged: Vec<TaggedPosition> = tagged_on(&standard(), &selection)
            .into_iter()
            .filter(|p| {
                matches!(
                    (p.string(), p.bound(), p.degree),
                    (Some(5), 5, 6) | (Some(4), 2, 7) | (Some(2), 4, 7)
                )
            })
            .collect();
        assert_eq!(tagged.len(), 3);
        let windows = cluster_frets(&tagged, &SCALE_RULES);
        assert_eq!(bounds(&windows), [(4, 7)]);
    }

    #[test]
    fn test_piano_chord_voicings_by_octave() {
        let selection = Selection::chord(PitchClass::C, "major").unwrap();
        let piano = Instrument::Keyed(PianoRange::new(3, 6).unwrap());
        let windows = windows_for(&selection, InstrumentKind::Piano, &tagged_on(&piano, &selection));
        assert_eq!(windows.len(), 4);
        assert_eq!(windows[0].label, "Voicing 1 (Oct 3)");
        assert_eq!((windows[3].start, windows[3].end), (6, 6));
    }

    #[test]
    fn test_piano_scales_have_no_windows() {
        let selection = Selection::scale(PitchClass::C, "major").unwrap();
        let piano = Instrument::Keyed(PianoRange::default());
        let tagged = tagged_on(&piano, &selection);
        assert!(windows_for(&selection, InstrumentKind::Piano, &tagged).is_empty());
    }
}
