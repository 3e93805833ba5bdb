//! Three-panel comparison chart: speeds, speed difference, position difference.

use std::fs;
use std::ops::Range;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use kf_compare::ComparisonSeries;
use ndarray::Array1;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

use crate::font::FontSafeBackend;

/// A4 portrait at 150 dpi.
const CHART_SIZE: (u32, u32) = (1240, 1754);

const FIGURE_TITLE: &str = "Kalman Filter vs Raw GPS (Combined Data)";

const TAB_BLUE: RGBColor = RGBColor(31, 119, 180);
const TAB_ORANGE: RGBColor = RGBColor(255, 127, 14);
const TAB_GREEN: RGBColor = RGBColor(44, 160, 44);
const TAB_RED: RGBColor = RGBColor(214, 39, 40);
const REFERENCE_GREY: RGBColor = RGBColor(128, 128, 128);

#[derive(Clone, Copy, Debug)]
pub enum ChartKind {
    Png,
    Svg,
}

struct Line<'a> {
    label: &'static str,
    values: &'a Array1<f64>,
    color: RGBColor,
    opacity: f64,
    width: u32,
}

struct Panel<'a> {
    title: &'static str,
    y_desc: &'static str,
    lines: Vec<Line<'a>>,
    zero_line: bool,
    from_zero: bool,
    time_labels: bool,
}

/// Maps chart x values (seconds since the first row) back to wall-clock labels.
struct TimeAxis {
    start: NaiveDateTime,
    end: NaiveDateTime,
    span_s: f64,
}

impl TimeAxis {
    fn for_series(series: &ComparisonSeries) -> Option<Self> {
        let start = series.start()?;
        let end = series.timestamps.last().copied()?;
        Some(Self {
            start,
            end,
            span_s: series.span_seconds().max(1.0),
        })
    }

    fn label(&self, offset_s: f64) -> String {
        let delta = TimeDelta::microseconds((offset_s * 1_000_000.0).round() as i64);
        let Some(at) = self.start.checked_add_signed(delta) else {
            return String::new();
        };
        if self.start.date() != self.end.date() {
            at.format("%m-%d %H:%M").to_string()
        } else {
            at.format("%H:%M:%S").to_string()
        }
    }
}

/// Render `series` to `path`, never leaving a half-written file behind.
///
/// The image is drawn into a hidden sibling file and renamed into place once
/// the backend has flushed it. Backend panics are reported as errors.
pub fn render_chart_guard(
    series: &ComparisonSeries,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let staging = staging_path(path);

    let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        render_chart(series, &staging, kind)
    }));

    let rendered = match outcome {
        Ok(result) => result.map_err(|e| format!("plotting error: {:#}", e)),
        Err(_) => Err("plotting backend panicked".to_string()),
    };
    match rendered {
        Ok(()) => fs::rename(&staging, path).map_err(|e| {
            let _ = fs::remove_file(&staging);
            format!("failed to move chart into {}: {}", path.display(), e)
        }),
        Err(err) => {
            let _ = fs::remove_file(&staging);
            Err(err)
        }
    }
}

fn render_chart(series: &ComparisonSeries, path: &Path, kind: ChartKind) -> Result<()> {
    let axis = TimeAxis::for_series(series).ok_or_else(|| anyhow!("no rows to plot"))?;
    match kind {
        ChartKind::Png => {
            let backend = BitMapBackend::new(path, CHART_SIZE);
            draw_comparison(FontSafeBackend::new(backend).into_drawing_area(), series, &axis)
        }
        ChartKind::Svg => {
            let backend = SVGBackend::new(path, CHART_SIZE);
            draw_comparison(FontSafeBackend::new(backend).into_drawing_area(), series, &axis)
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chart");
    // keep the extension last, BitMapBackend picks the encoder from it
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => path.with_file_name(format!(".{}.partial.{}", stem, ext)),
        None => path.with_file_name(format!(".{}.partial", stem)),
    }
}

fn draw_comparison<DB>(
    root: DrawingArea<DB, Shift>,
    series: &ComparisonSeries,
    axis: &TimeAxis,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let body = root.titled(
        FIGURE_TITLE,
        FontDesc::new(FontFamily::SansSerif, 30.0, FontStyle::Bold),
    )?;
    let areas = body.split_evenly((3, 1));
    let x = series.offsets_seconds();

    let panels = [
        Panel {
            title: "Filtered vs Raw GPS Velocity Over Time",
            y_desc: "Velocity (m/s)",
            lines: vec![
                Line {
                    label: "Filtered Velocity (Kalman)",
                    values: &series.filtered_speed,
                    color: TAB_BLUE,
                    opacity: 1.0,
                    width: 2,
                },
                Line {
                    label: "Raw GPS Speed",
                    values: &series.raw_speed,
                    color: TAB_ORANGE,
                    opacity: 0.7,
                    width: 1,
                },
            ],
            zero_line: false,
            from_zero: false,
            time_labels: false,
        },
        Panel {
            title: "Speed Difference Between Filtered and Raw GPS Data",
            y_desc: "Speed Difference (m/s)",
            lines: vec![Line {
                label: "Filtered - Raw",
                values: &series.speed_divergence,
                color: TAB_GREEN,
                opacity: 1.0,
                width: 2,
            }],
            zero_line: true,
            from_zero: true,
            time_labels: false,
        },
        Panel {
            title: "Positional Difference Between Raw GPS and Kalman Filter Estimate",
            y_desc: "Position Difference (m)",
            lines: vec![Line {
                label: "Raw GPS vs Filtered Position",
                values: &series.positional_divergence,
                color: TAB_RED,
                opacity: 1.0,
                width: 2,
            }],
            zero_line: false,
            from_zero: true,
            time_labels: true,
        },
    ];

    for (area, panel) in areas.iter().zip(panels.iter()) {
        draw_panel(area, panel, &x, axis)?;
    }

    root.present()?;
    Ok(())
}

fn draw_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    panel: &Panel<'_>,
    x: &Array1<f64>,
    axis: &TimeAxis,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let columns: Vec<&Array1<f64>> = panel.lines.iter().map(|l| l.values).collect();
    let y_range = value_range(&columns, panel.from_zero);

    let mut chart = ChartBuilder::on(area)
        .caption(
            panel.title,
            FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal),
        )
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 80)
        .set_label_area_size(
            LabelAreaPosition::Bottom,
            if panel.time_labels { 60 } else { 30 },
        )
        .build_cartesian_2d(0.0..axis.span_s, y_range)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    let time_label = |v: &f64| axis.label(*v);
    let no_label = |_: &f64| String::new();
    let value_label = |v: &f64| format!("{:.1}", v);

    {
        let mut mesh = chart.configure_mesh();
        mesh.light_line_style(&BLACK.mix(0.04))
            .bold_line_style(&BLACK.mix(0.12))
            .x_labels(8)
            .y_labels(8)
            .y_desc(panel.y_desc)
            .y_label_formatter(&value_label)
            .label_style(axis_font.clone().color(&BLACK.mix(0.85)))
            .axis_desc_style(axis_font.color(&BLACK));
        // upper panels share the bottom time axis
        if panel.time_labels {
            mesh.x_desc("Time").x_label_formatter(&time_label);
        } else {
            mesh.x_label_formatter(&no_label);
        }
        mesh.draw()?;
    }

    if panel.zero_line {
        let style = ShapeStyle {
            color: REFERENCE_GREY.mix(0.8),
            filled: false,
            stroke_width: 1,
        };
        chart.draw_series(LineSeries::new(vec![(0.0, 0.0), (axis.span_s, 0.0)], style))?;
    }

    for line in &panel.lines {
        let color = line.color;
        let style = ShapeStyle {
            color: color.mix(line.opacity),
            filled: false,
            stroke_width: line.width,
        };
        chart
            .draw_series(LineSeries::new(
                x.iter().copied().zip(line.values.iter().copied()),
                style,
            ))?
            .label(line.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal))
        .draw()?;

    Ok(())
}

/// Y extent over every column of a panel, padded by 5%.
fn value_range(columns: &[&Array1<f64>], from_zero: bool) -> Range<f64> {
    let (mut lo, mut hi) = columns
        .iter()
        .flat_map(|c| c.iter())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return -1.0..1.0;
    }
    if from_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if hi - lo < f64::EPSILON {
        return (lo - 1.0)..(hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad)..(hi + pad)
}

/// Open a saved image with the desktop's default viewer.
pub fn show_image(path: &Path) -> Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", ""]);
        cmd
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(path)
        .spawn()
        .with_context(|| format!("failed to launch an image viewer for {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn series(timestamps: Vec<NaiveDateTime>) -> ComparisonSeries {
        let n = timestamps.len();
        let ramp: Array1<f64> = (0..n).map(|i| i as f64).collect();
        ComparisonSeries {
            timestamps,
            filtered_speed: ramp.mapv(|v| v + 1.0),
            raw_speed: ramp.clone(),
            speed_divergence: Array1::from_elem(n, 1.0),
            positional_divergence: ramp.mapv(|v| v * 0.5),
        }
    }

    #[test]
    fn value_range_pads_and_anchors_zero() {
        let a = Array1::from(vec![2.0, 4.0]);
        let r = value_range(&[&a], false);
        assert!((r.start - 1.9).abs() < 1e-9);
        assert!((r.end - 4.1).abs() < 1e-9);

        let r = value_range(&[&a], true);
        assert!(r.start < 0.0);

        let flat = Array1::from(vec![3.0, 3.0]);
        assert_eq!(value_range(&[&flat], false), 2.0..4.0);
        assert_eq!(value_range(&[], false), -1.0..1.0);
    }

    #[test]
    fn time_labels_follow_span() {
        let same_day = TimeAxis::for_series(&series(vec![at(30, 10, 0, 0), at(30, 11, 0, 0)]))
            .unwrap();
        assert_eq!(same_day.label(90.0), "10:01:30");

        let overnight = TimeAxis::for_series(&series(vec![at(29, 23, 0, 0), at(30, 1, 0, 0)]))
            .unwrap();
        assert_eq!(overnight.label(3600.0), "09-30 00:00");
    }

    #[test]
    fn staging_file_is_hidden_sibling() {
        assert_eq!(
            staging_path(Path::new("out/kalman_filter_comparison.png")),
            PathBuf::from("out/.kalman_filter_comparison.partial.png")
        );
        assert_eq!(staging_path(Path::new("chart")), PathBuf::from(".chart.partial"));
    }

    #[test]
    fn renders_svg_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cmp.svg");
        let data = series(vec![at(30, 10, 0, 0), at(30, 10, 0, 1), at(30, 10, 0, 3)]);

        render_chart_guard(&data, &out, ChartKind::Svg).unwrap();

        let body = fs::read_to_string(&out).unwrap();
        assert!(body.contains("<svg"));
        assert!(!staging_path(&out).exists());
    }

    #[test]
    fn renders_png_with_bitmap_font() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cmp.png");
        let data = series(vec![at(30, 10, 0, 0), at(30, 10, 5, 0)]);

        render_chart_guard(&data, &out, ChartKind::Png).unwrap();

        let bytes = fs::read(&out).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn empty_series_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cmp.png");

        let err = render_chart_guard(&series(Vec::new()), &out, ChartKind::Png).unwrap_err();

        assert!(err.contains("no rows to plot"));
        assert!(!out.exists());
        assert!(!staging_path(&out).exists());
    }
}
