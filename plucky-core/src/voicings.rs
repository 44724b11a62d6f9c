//! # Chord Voicing Table
//!
//! Known chord fingerings for standard tuning. Each shape is charted once,
//! low E string first (`x` mutes a string), in the key it is usually taught
//! in, and slid up the neck to reach any other root. A shape that lands
//! entirely at fret 12 or above drops an octave, so the barre shapes come
//! back as the familiar open chords.
//!
//! When a chord has charted shapes they stand in for the computed voicing
//! windows; other chords and tunings keep the clustering search.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::clustering::PositionWindow;
use crate::filter::FilteredView;
use crate::fretboard::{Location, MAX_FRET};
use crate::membership::TaggedPosition;
use crate::note::PitchClass;
use crate::theory::Selection;
use crate::tuning::{DEFAULT_TUNING_ID, Instrument, STRING_COUNT, tuning_or_default};

/// Fret per string, highest string (index 0) first. `None` is a muted string.
pub type Frets = [Option<u8>; STRING_COUNT];

struct Shape {
    chord_id: &'static str,
    root: PitchClass,
    frets: Frets,
}

impl Shape {
    fn new(chord_id: &'static str, root: PitchClass, chart: &str) -> Self {
        let mut frets = [None; STRING_COUNT];
        // Charts read low E first, strings are indexed high E first.
        for (slot, c) in frets.iter_mut().rev().zip(chart.chars()) {
            *slot = c.to_digit(10).map(|d| d as u8);
        }
        Self {
            chord_id,
            root,
            frets,
        }
    }

    fn transposed_to(&self, root: PitchClass) -> Option<Frets> {
        let shift = self.root.semitones_to(root) as u8;
        let mut frets = self.frets.map(|f| f.map(|f| f + shift));
        if frets.iter().flatten().all(|&f| f >= 12) {
            frets = frets.map(|f| f.map(|f| f - 12));
        }
        if frets.iter().flatten().any(|&f| f > MAX_FRET) {
            return None;
        }
        Some(frets)
    }
}

static SHAPES: Lazy<Vec<Shape>> = Lazy::new(|| {
    use PitchClass::*;
    [
        ("major", F, "133211"),
        ("major", ASharp, "x13331"),
        ("major", C, "x32010"),
        ("major", D, "xx0232"),
        ("major", G, "320003"),
        ("minor", F, "133111"),
        ("minor", ASharp, "x13321"),
        ("minor", D, "xx0231"),
        ("7", F, "131211"),
        ("7", ASharp, "x13131"),
        ("7", C, "x32310"),
        ("maj7", F, "1x221x"),
        ("maj7", ASharp, "x13231"),
        ("maj7", C, "x32000"),
        ("m7", F, "131111"),
        ("m7", ASharp, "x13121"),
        ("m7", A, "x02010"),
        ("sus2", ASharp, "x13311"),
        ("sus2", A, "x02200"),
        ("sus2", D, "xx0230"),
        ("sus4", F, "133311"),
        ("sus4", ASharp, "x13341"),
        ("sus4", D, "xx0233"),
        ("7sus4", F, "131311"),
        ("7sus4", A, "x02030"),
        ("add9", C, "x32030"),
        ("9", C, "x32333"),
        ("dim", B, "x2343x"),
        ("dim7", D, "xx0101"),
        ("dim7", G, "3x2323"),
        ("m7b5", B, "x2323x"),
        ("aug", C, "x32110"),
    ]
    .into_iter()
    .map(|(id, root, chart)| Shape::new(id, root, chart))
    .collect()
});

/// One charted fingering placed on the neck.
#[derive(Debug, Clone, PartialEq)]
pub struct Voicing {
    /// `start`/`end` are the lowest and highest fretted (non-open) frets.
    pub window: PositionWindow,
    pub frets: Frets,
    /// One tagged position per sounded string.
    pub positions: Vec<TaggedPosition>,
}

impl Voicing {
    /// Chord-chart spelling, low E first, e.g. `x-3-2-0-1-0`.
    pub fn chart(&self) -> String {
        self.frets
            .iter()
            .rev()
            .map(|f| f.map_or_else(|| "x".to_string(), |f| f.to_string()))
            .collect::<Vec<_>>()
            .join("-")
    }
}

fn plays_standard_tuning(instrument: &Instrument) -> bool {
    match instrument {
        Instrument::Fretted(tuning) => tuning.strings == tuning_or_default(DEFAULT_TUNING_ID).strings,
        Instrument::Keyed(_) => false,
    }
}

fn fretted_span(frets: &Frets) -> (i32, i32) {
    let fretted = frets.iter().flatten().filter(|&&f| f > 0).map(|&f| f as i32);
    let start = fretted.clone().min().unwrap_or(0);
    let end = fretted.max().unwrap_or(0);
    (start, end)
}

/// Finds the tagged position under every sounded string. A shape that
/// sounds a note outside the chord is rejected.
fn place(frets: &Frets, tagged: &[TaggedPosition]) -> Option<Vec<TaggedPosition>> {
    frets
        .iter()
        .enumerate()
        .filter_map(|(string, fret)| fret.map(|fret| (string as u8, fret)))
        .map(|(string, fret)| {
            tagged
                .iter()
                .find(|p| p.position.location == Location::Fret { string, fret })
                .cloned()
        })
        .collect()
}

/// Charted voicings of a chord in standard tuning, lowest on the neck first
/// and labelled `Voicing N`. `None` when the selection is not a chord, the
/// instrument is not a standard-tuned guitar, or nothing is charted.
pub fn lookup_voicings(
    selection: &Selection,
    instrument: &Instrument,
    tagged: &[TaggedPosition],
) -> Option<Vec<Voicing>> {
    if !selection.is_chord() || !plays_standard_tuning(instrument) {
        return None;
    }

    let mut charted: Vec<Frets> = Vec::new();
    for frets in SHAPES
        .iter()
        .filter(|s| s.chord_id == selection.id())
        .filter_map(|s| s.transposed_to(selection.root()))
    {
        if !charted.contains(&frets) {
            charted.push(frets);
        }
    }
    charted.sort_by_key(fretted_span);

    let voicings: Vec<Voicing> = charted
        .into_iter()
        .filter_map(|frets| place(&frets, tagged).map(|positions| (frets, positions)))
        .enumerate()
        .map(|(i, (frets, positions))| {
            let (start, end) = fretted_span(&frets);
            Voicing {
                window: PositionWindow {
                    ordinal: i,
                    label: format!("Voicing {}", i + 1),
                    start,
                    end,
                },
                frets,
                positions,
            }
        })
        .collect();

    (!voicings.is_empty()).then_some(voicings)
}

/// The view for a charted voicing: exactly its notes, or with no (or an
/// out-of-range) selection every note any voicing sounds.
pub fn voicing_view(voicings: &[Voicing], selected: Option<usize>) -> FilteredView {
    if let Some(voicing) = selected.and_then(|i| voicings.get(i)) {
        return FilteredView {
            window: Some(voicing.window.clone()),
            span: Some((voicing.window.start, voicing.window.end)),
            positions: voicing.positions.clone(),
        };
    }

    let mut seen = HashSet::new();
    let positions = voicings
        .iter()
        .flat_map(|v| v.positions.iter())
        .filter(|p| seen.insert(p.position.location))
        .cloned()
        .collect();
    FilteredView {
        window: None,
        span: None,
        positions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fretboard::NoteGenerator;
    use crate::membership::resolve;
    use crate::tuning::find_tuning;

    fn standard() -> Instrument {
        Instrument::Fretted(tuning_or_default(DEFAULT_TUNING_ID).clone())
    }

    fn voicings_of(instrument: &Instrument, selection: &Selection) -> Option<Vec<Voicing>> {
        let all = NoteGenerator::new().generate(instrument).unwrap();
        let tagged = resolve(selection, &all);
        lookup_voicings(selection, instrument, &tagged)
    }

    fn chord(root: PitchClass, id: &str) -> Selection {
        Selection::chord(root, id).unwrap()
    }

    #[test]
    fn test_every_charted_shape_spells_its_chord_in_every_key() {
        let instrument = standard();
        let mut ids: Vec<&str> = SHAPES.iter().map(|s| s.chord_id).collect();
        ids.dedup();

        for id in ids {
            let charted = SHAPES.iter().filter(|s| s.chord_id == id).count();
            for root in PitchClass::ALL {
                let selection = chord(root, id);
                let voicings = voicings_of(&instrument, &selection).unwrap();
                assert_eq!(voicings.len(), charted, "{root} {id}");

                let degree_count = selection.formula().pitch_classes(root).len();
                for (i, v) in voicings.iter().enumerate() {
                    assert_eq!(v.window.label, format!("Voicing {}", i + 1));
                    assert_eq!(v.positions.len(), v.frets.iter().flatten().count());

                    let degrees: HashSet<u8> = v.positions.iter().map(|p| p.degree).collect();
                    assert_eq!(degrees.len(), degree_count, "{root} {id} {:?}", v.frets);

                    let bass = v.positions.iter().min_by_key(|p| p.position.midi).unwrap();
                    assert!(bass.is_root, "{root} {id} {:?}", v.frets);
                }
                assert!(voicings.windows(2).all(|w| w[0].window.start <= w[1].window.start));
            }
        }
    }

    #[test]
    fn test_barre_shapes_fall_back_to_open_chords() {
        let e = voicings_of(&standard(), &chord(PitchClass::E, "major")).unwrap();
        assert_eq!(
            e[0].frets,
            [Some(0), Some(0), Some(1), Some(2), Some(2), Some(0)]
        );
        assert_eq!((e[0].window.start, e[0].window.end), (1, 2));

        let c = voicings_of(&standard(), &chord(PitchClass::C, "major")).unwrap();
        let open_c = [Some(0), Some(1), Some(0), Some(2), Some(3), None];
        assert!(c.iter().any(|v| v.frets == open_c && v.chart() == "x-3-2-0-1-0"));
        assert!(c.iter().all(|v| v.window.end <= MAX_FRET as i32));
    }

    #[test]
    fn test_only_standard_tuned_guitar_chords_are_charted() {
        let drop_d = Instrument::Fretted(find_tuning("drop-d").unwrap().clone());
        assert!(voicings_of(&drop_d, &chord(PitchClass::D, "major")).is_none());

        let piano = Instrument::Keyed(Default::default());
        assert!(voicings_of(&piano, &chord(PitchClass::C, "major")).is_none());

        let scale = Selection::scale(PitchClass::C, "major").unwrap();
        assert!(voicings_of(&standard(), &scale).is_none());

        assert!(voicings_of(&standard(), &chord(PitchClass::C, "mMaj7")).is_none());
    }

    #[test]
    fn test_voicing_view_is_exactly_the_shape() {
        let voicings = voicings_of(&standard(), &chord(PitchClass::G, "major")).unwrap();

        let one = voicing_view(&voicings, Some(1));
        assert_eq!(one.window.as_ref(), Some(&voicings[1].window));
        assert_eq!(one.positions, voicings[1].positions);

        let all = voicing_view(&voicings, None);
        let locations: HashSet<Location> = all.positions.iter().map(|p| p.position.location).collect();
        assert_eq!(locations.len(), all.positions.len());
        assert!(voicings.iter().flat_map(|v| &v.positions).all(|p| locations.contains(&p.position.location)));

        assert_eq!(voicing_view(&voicings, Some(99)), all);
    }
}
