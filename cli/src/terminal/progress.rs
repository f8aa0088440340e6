use colored::*;
use indicatif::ProgressStyle;
use tilestitch_core::{ExportProgress, Stage};
use tracing::{Span, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

const TICKS: &[&str] = &[
    "▁▁▁▁▁",
    "▁▂▂▂▁",
    "▁▄▂▄▁",
    "▂▄▆▄▂",
    "▄▆█▆▄",
    "▂▄▆▄▂",
    "▁▄▂▄▁",
    "▁▂▂▂▁",
];

/// Drives the export progress bar, which lives on a span so that
/// `tracing-indicatif` can keep log lines above it.
pub struct ExportBar {
    span: Span,
}

impl ExportBar {
    /// `-qq` and above get no bar at all.
    pub fn new(quiet: u8) -> Self {
        let span = if quiet < 2 {
            info_span!("export", indicatif.pb_show = true)
        } else {
            info_span!("export")
        };
        span.pb_set_style(&spinner_style());
        span.pb_set_message(&stage_label(Stage::Capabilities));
        Self { span }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }
}

impl ExportProgress for ExportBar {
    fn stage(&self, stage: Stage) {
        match stage {
            Stage::Tiles { total } => {
                self.span.pb_set_style(&bar_style());
                self.span.pb_set_length(total as u64);
                self.span.pb_set_position(0);
            }
            Stage::Mosaic => self.span.pb_set_style(&spinner_style()),
            _ => {}
        }
        self.span.pb_set_message(&stage_label(stage));
    }

    fn tile_done(&self, done: usize, _total: usize) {
        self.span.pb_set_position(done as u64);
    }
}

fn stage_label(stage: Stage) -> String {
    let label = match stage {
        Stage::Capabilities => "Reading capabilities".to_string(),
        Stage::SeedConfig => "Writing MapProxy configuration".to_string(),
        Stage::Tiles { total } => format!("Fetching {total} tiles"),
        Stage::Mosaic => "Stitching tiles".to_string(),
        Stage::Reproject => "Reprojecting".to_string(),
        Stage::Encode => "Encoding GeoTIFF".to_string(),
    };
    format!("{}", label.italic())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.blue} {msg} {wide_bar:.green/bright_black} {pos}/{len} [{elapsed}]",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .tick_strings(TICKS)
    .progress_chars("━╸ ")
}
