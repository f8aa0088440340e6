use colored::*;
use tilestitch_common::config::Config;
use tilestitch_core::ExportSummary;
use tracing::Instrument;

use crate::commands::CommandLine;
use crate::terminal::{colors, print, progress::ExportBar};

pub async fn export(commands: &CommandLine) -> anyhow::Result<()> {
    let cfg: Config = commands.to_config();
    let request = commands.to_request()?;

    print::banner(cfg.quiet);
    print::header("exporting wmts layer", cfg.quiet);

    let bar = ExportBar::new(cfg.quiet);
    let summary: ExportSummary = tilestitch_core::export(&request, &cfg, &bar)
        .instrument(bar.span())
        .await?;
    drop(bar);

    print_summary(&summary, &cfg);
    Ok(())
}

fn print_summary(summary: &ExportSummary, cfg: &Config) {
    if cfg.quiet > 0 {
        return;
    }

    print::header("export summary", cfg.quiet);
    print::aligned_line("Layer", summary.layer_title.as_str());
    print::aligned_line(
        "Tile matrix",
        format!("{} / {}", summary.tile_matrix_set, summary.tile_matrix),
    );
    print::aligned_line("Tiles", tile_counts(summary));
    print::aligned_line(
        "Size",
        format!("{} x {} px", summary.width, summary.height).color(colors::ACCENT),
    );
    print::aligned_line("SRS", summary.crs.srs_code());
    print::aligned_line("Bounds", summary.bounds.to_string());
    print::aligned_line("MapProxy config", summary.mapproxy_config.display().to_string());
    print::aligned_line(
        "Output",
        summary.output.display().to_string().color(colors::PRIMARY).bold(),
    );

    let elapsed: ColoredString = format!("{:.2}s", summary.elapsed_secs).bold().yellow();
    print::fat_separator();
    print::centerln(&format!("Export complete in {elapsed}"));
}

fn tile_counts(summary: &ExportSummary) -> ColoredString {
    let mut parts = vec![
        format!("{} total", summary.tiles),
        format!("{} downloaded", summary.downloaded),
        format!("{} cached", summary.cached),
    ];
    if summary.missing > 0 {
        parts.push(format!("{} missing", summary.missing));
    }
    if summary.undecodable > 0 {
        parts.push(format!("{} unreadable", summary.undecodable));
    }

    let text = parts.join(", ");
    if summary.missing + summary.undecodable > 0 {
        text.color(colors::HIGHLIGHT)
    } else {
        text.color(colors::TEXT_DEFAULT)
    }
}
