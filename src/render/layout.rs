/// Line breaking for the three quote runs.
/// Greedy word wrap across run boundaries, with shrink-to-fit when the
/// wrapped text is taller than the canvas.
use tracing::{debug, warn};

use crate::config::{Align, CanvasSpec, LayoutTuning, RunStyles};
use crate::quotes::model::RunId;
use crate::render::font::FontBook;

/// Float slack for width/height comparisons
const EPSILON: f32 = 0.01;

/// A contiguous same-run substring placed on one line
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub run: RunId,
    /// Includes the separating space when the fragment does not start its line
    pub text: String,
    /// Font size after scaling
    pub size: f32,
    pub x: f32,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub fragments: Vec<Fragment>,
    pub top: f32,
    pub baseline: f32,
    pub height: f32,
    pub width: f32,
}

impl Line {
    pub fn text(&self) -> String {
        self.fragments.iter().map(|f| f.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub lines: Vec<Line>,
    /// Font scale the text was wrapped at (1.0 = configured sizes)
    pub scale: f32,
    pub width: f32,
    pub height: f32,
    /// False when even the smallest attempted scale overflows the canvas
    pub fits: bool,
}

impl Layout {
    /// Fragments in reading order, with line breaks replaced by single spaces
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(Line::text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.lines.iter().flat_map(|l| l.fragments.iter())
    }
}

#[derive(Debug, Clone, Copy)]
struct Word<'a> {
    run: RunId,
    text: &'a str,
}

/// Run text accumulated for one line before geometry is assigned
#[derive(Debug, Clone)]
struct Piece {
    run: RunId,
    text: String,
}

fn tokenize(runs: [&str; 3]) -> Vec<Word<'_>> {
    RunId::ALL
        .into_iter()
        .zip(runs)
        .flat_map(|(run, text)| text.split_whitespace().map(move |w| Word { run, text: w }))
        .collect()
}

fn append(pieces: &mut Vec<Piece>, word: Word<'_>) {
    match pieces.last_mut() {
        Some(last) if last.run == word.run => {
            last.text.push(' ');
            last.text.push_str(word.text);
        }
        Some(_) => pieces.push(Piece {
            run: word.run,
            text: format!(" {}", word.text),
        }),
        None => pieces.push(Piece {
            run: word.run,
            text: word.text.to_string(),
        }),
    }
}

pub struct LayoutEngine<'a> {
    fonts: &'a FontBook,
    tuning: &'a LayoutTuning,
}

impl<'a> LayoutEngine<'a> {
    pub fn new(fonts: &'a FontBook, tuning: &'a LayoutTuning) -> Self {
        Self { fonts, tuning }
    }

    /// Wrap the runs onto the canvas, shrinking the font scale in fixed steps
    /// until the text fits or the attempt budget runs out. Never drops words.
    pub fn wrap(&self, runs: [&str; 3], styles: &RunStyles, canvas: &CanvasSpec) -> Layout {
        let words = tokenize(runs);
        let step = self.tuning.shrink_step;
        let mut scale = 1.0_f32;
        let mut attempt = 0u32;

        loop {
            let layout = self.wrap_at_scale(&words, styles, canvas, scale);
            if layout.fits {
                if attempt > 0 {
                    debug!("Layout fits after {} shrink step(s), scale {:.2}", attempt, scale);
                }
                return layout;
            }

            let next = (1.0 - (attempt + 1) as f32 * step).max(step);
            if attempt >= self.tuning.max_shrink_attempts || next >= scale {
                warn!(
                    "Quote does not fit {}x{} canvas even at scale {:.2} ({} lines, {:.0}px tall)",
                    canvas.width,
                    canvas.height,
                    scale,
                    layout.lines.len(),
                    layout.height
                );
                return layout;
            }
            attempt += 1;
            scale = next;
        }
    }

    fn size(&self, styles: &RunStyles, run: RunId, scale: f32) -> f32 {
        styles.get(run).size * scale
    }

    fn measure(&self, pieces: &[Piece], styles: &RunStyles, scale: f32) -> f32 {
        pieces
            .iter()
            .map(|p| {
                self.fonts
                    .face(p.run)
                    .width(&p.text, self.size(styles, p.run, scale))
            })
            .sum()
    }

    fn wrap_at_scale(&self, words: &[Word<'_>], styles: &RunStyles, canvas: &CanvasSpec, scale: f32) -> Layout {
        let usable_width = canvas.usable_width();

        let mut rows: Vec<Vec<Piece>> = Vec::new();
        let mut current: Vec<Piece> = Vec::new();
        for &word in words {
            if current.is_empty() {
                // A word wider than the canvas still gets a line of its own
                append(&mut current, word);
                continue;
            }
            let mut candidate = current.clone();
            append(&mut candidate, word);
            if self.measure(&candidate, styles, scale) <= usable_width + EPSILON {
                current = candidate;
            } else {
                rows.push(std::mem::take(&mut current));
                append(&mut current, word);
            }
        }
        if !current.is_empty() {
            rows.push(current);
        }

        let margin = canvas.margin as f32;
        let gap = self.tuning.line_gap;
        let mut lines = Vec::with_capacity(rows.len());
        let mut top = margin;

        for row in rows {
            let mut fragments = Vec::with_capacity(row.len());
            let mut cursor = 0.0;
            let mut em = 0.0_f32;
            let mut ascent = 0.0_f32;
            for piece in row {
                let face = self.fonts.face(piece.run);
                let size = self.size(styles, piece.run, scale);
                let width = face.width(&piece.text, size);
                em = em.max(face.em_height(size));
                ascent = ascent.max(face.ascent(size));
                fragments.push(Fragment {
                    run: piece.run,
                    text: piece.text,
                    size,
                    x: cursor,
                    width,
                });
                cursor += width;
            }

            let offset = margin
                + match self.tuning.align {
                    Align::Left => 0.0,
                    Align::Center => ((usable_width - cursor) / 2.0).max(0.0),
                    Align::Right => (usable_width - cursor).max(0.0),
                };
            for f in &mut fragments {
                f.x += offset;
            }

            let height = em + gap;
            lines.push(Line {
                fragments,
                top,
                baseline: top + ascent,
                height,
                width: cursor,
            });
            top += height;
        }

        let height = if lines.is_empty() { 0.0 } else { top - margin - gap };
        let width = lines.iter().map(|l| l.width).fold(0.0, f32::max);
        let fits = height <= canvas.usable_height() + EPSILON;

        Layout {
            lines,
            scale,
            width,
            height,
            fits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rgb, StyleSpec};
    use crate::render::font::BUILTIN_FAMILY;

    /// Built-in face at 20px: every character is 10px wide, lines are 20px tall
    fn styles(size: f32) -> RunStyles {
        let style = |color| StyleSpec {
            font: BUILTIN_FAMILY.into(),
            size,
            color,
            weight: "regular".into(),
        };
        RunStyles::new(style(Rgb::BLACK), style(Rgb::RED), style(Rgb::BLACK))
    }

    fn canvas(width: u32, height: u32, margin: u32) -> CanvasSpec {
        CanvasSpec {
            width,
            height,
            margin,
            background_color: Rgb::WHITE,
        }
    }

    fn wrap(runs: [&str; 3], canvas: &CanvasSpec, tuning: &LayoutTuning) -> Layout {
        let styles = styles(20.0);
        let fonts = FontBook::builtin(&styles);
        LayoutEngine::new(&fonts, tuning).wrap(runs, &styles, canvas)
    }

    fn expected_text(runs: [&str; 3]) -> String {
        runs.iter()
            .flat_map(|r| r.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    }

    const QUOTE: [&str; 3] = [
        "The clock read",
        "eight forty-three",
        "A cat barked in the distance.",
    ];

    #[test]
    fn test_reading_order_is_preserved() {
        let c = canvas(200, 400, 10);
        let layout = wrap(QUOTE, &c, &LayoutTuning::default());
        assert!(layout.fits);
        assert!(layout.lines.len() > 1);
        assert_eq!(layout.text(), expected_text(QUOTE));
        assert_eq!(
            layout.text(),
            "The clock read eight forty-three A cat barked in the distance."
        );
    }

    #[test]
    fn test_lines_stay_within_usable_width() {
        let c = canvas(200, 400, 10);
        let layout = wrap(QUOTE, &c, &LayoutTuning::default());
        for line in &layout.lines {
            assert!(line.width <= c.usable_width(), "{:?} is {}px", line.text(), line.width);
            let right = line.fragments.last().map(|f| f.x + f.width).unwrap();
            assert!(right <= (c.width - c.margin) as f32 + EPSILON);
        }
    }

    #[test]
    fn test_greedy_fill() {
        // 18 characters per line at 10px each
        let c = canvas(200, 400, 10);
        let layout = wrap(QUOTE, &c, &LayoutTuning::default());
        let lines: Vec<String> = layout.lines.iter().map(Line::text).collect();
        assert_eq!(
            lines,
            vec![
                "The clock read",
                "eight forty-three",
                "A cat barked in",
                "the distance.",
            ]
        );
    }

    #[test]
    fn test_runs_share_a_line_without_forced_break() {
        let c = canvas(640, 400, 20);
        let layout = wrap(QUOTE, &c, &LayoutTuning::default());
        let first = &layout.lines[0];
        let runs: Vec<RunId> = first.fragments.iter().map(|f| f.run).collect();
        assert_eq!(runs, vec![RunId::Prefix, RunId::TimePhrase, RunId::Suffix]);
        assert_eq!(first.fragments[0].text, "The clock read");
        assert_eq!(first.fragments[1].text, " eight forty-three");
        // Fragments abut left to right
        assert_eq!(first.fragments[1].x, first.fragments[0].x + first.fragments[0].width);
    }

    #[test]
    fn test_oversized_word_gets_its_own_line() {
        let c = canvas(200, 400, 10);
        let runs = ["It was", "Supercalifragilisticexpialidocious", "o'clock."];
        let layout = wrap(runs, &c, &LayoutTuning::default());
        let texts: Vec<String> = layout.lines.iter().map(Line::text).collect();
        assert_eq!(texts, vec!["It was", "Supercalifragilisticexpialidocious", "o'clock."]);
        assert!(layout.lines[1].width > c.usable_width());
        assert_eq!(layout.lines[1].fragments.len(), 1);
        assert_eq!(layout.text(), expected_text(runs));
    }

    #[test]
    fn test_lines_stack_from_margin() {
        let c = canvas(200, 400, 10);
        let tuning = LayoutTuning::default();
        let layout = wrap(QUOTE, &c, &tuning);
        assert_eq!(layout.lines[0].top, 10.0);
        for pair in layout.lines.windows(2) {
            assert_eq!(pair[0].height, 20.0 + tuning.line_gap);
            assert_eq!(pair[1].top, pair[0].top + pair[0].height);
            assert!(pair[0].baseline > pair[0].top);
        }
        assert_eq!(layout.height, 4.0 * 28.0 - tuning.line_gap);
    }

    #[test]
    fn test_shrinks_instead_of_truncating() {
        let c = canvas(200, 60, 10);
        let runs = ["It was a", "bright cold day", "in April"];
        let tuning = LayoutTuning {
            max_shrink_attempts: 9,
            ..LayoutTuning::default()
        };
        let layout = wrap(runs, &c, &tuning);
        assert!(layout.fits);
        assert!(layout.scale < 1.0);
        assert!(layout.height <= c.usable_height());
        assert_eq!(layout.text(), expected_text(runs));
    }

    #[test]
    fn test_gives_up_without_dropping_words() {
        let c = canvas(60, 30, 10);
        let tuning = LayoutTuning {
            max_shrink_attempts: 3,
            ..LayoutTuning::default()
        };
        let layout = wrap(QUOTE, &c, &tuning);
        assert!(!layout.fits);
        assert!((layout.scale - 0.7).abs() < 1e-4);
        assert_eq!(layout.text(), expected_text(QUOTE));
    }

    #[test]
    fn test_center_alignment() {
        let c = canvas(200, 400, 10);
        let tuning = LayoutTuning {
            align: Align::Center,
            ..LayoutTuning::default()
        };
        let layout = wrap(["noon", "", ""], &c, &tuning);
        let f = &layout.lines[0].fragments[0];
        assert_eq!(f.width, 40.0);
        assert_eq!(f.x, 10.0 + (180.0 - 40.0) / 2.0);
    }

    #[test]
    fn test_empty_runs_and_extra_whitespace() {
        let c = canvas(640, 400, 20);
        let runs = ["  It was ", " ", "\tmidnight. "];
        let layout = wrap(runs, &c, &LayoutTuning::default());
        assert_eq!(layout.text(), "It was midnight.");
        assert!(layout.fragments().all(|f| f.run != RunId::TimePhrase));

        let empty = wrap(["", " ", ""], &c, &LayoutTuning::default());
        assert!(empty.lines.is_empty());
        assert!(empty.fits);
        assert_eq!(empty.height, 0.0);
    }
}
