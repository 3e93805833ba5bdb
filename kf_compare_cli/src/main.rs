use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use kf_compare::{
    inspect_file, run_pipeline, ComparisonSeries, Diagnostics, FileInspection, Params, Severity,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod font;
mod plot;

use plot::{render_chart_guard, show_image, ChartKind};

const DEFAULT_CHART: &str = "kalman_filter_comparison.png";

#[derive(Parser, Debug)]
#[command(author, version, about = "Raw GPS vs. Kalman filter comparison CLI", long_about = None)]
struct Cli {
    /// Defaults to `compare` over the built-in input list
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge the logs and render the comparison chart
    Compare(CompareArgs),
    /// Inspect each log and write a per-file report
    Diagnose(DiagnoseArgs),
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// Vehicle logs to merge (replaces the 2024-09-30 default set)
    #[arg(value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output PNG path
    #[arg(short, long, default_value = DEFAULT_CHART, value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write the chart as SVG
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Open the saved chart in the system image viewer
    #[arg(long, action = ArgAction::SetTrue)]
    show: bool,

    /// Read input files one at a time
    #[arg(long, action = ArgAction::SetTrue)]
    sequential: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

impl Default for CompareArgs {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: PathBuf::from(DEFAULT_CHART),
            svg: None,
            show: false,
            sequential: false,
            verbose: false,
        }
    }
}

#[derive(Parser, Debug)]
struct DiagnoseArgs {
    /// Vehicle logs to inspect (replaces the 2024-09-30 default set)
    #[arg(value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path [default: kalman_diagnostics.txt, or .json with --json]
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Write the report as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Compare(CompareArgs::default()));
    let verbose = match &command {
        Command::Compare(args) => args.verbose,
        Command::Diagnose(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match command {
        Command::Compare(args) => handle_compare(args),
        Command::Diagnose(args) => handle_diagnose(args),
    }
}

fn params_for(inputs: &[PathBuf]) -> Params {
    let mut params = Params::default();
    if !inputs.is_empty() {
        params.inputs = inputs.to_vec();
    }
    params
}

fn log_diagnostics(diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        match diagnostic.severity() {
            Severity::Info => info!("{}", diagnostic),
            Severity::Warning => warn!("{}", diagnostic),
        }
    }
}

fn handle_compare(args: CompareArgs) -> Result<()> {
    let mut params = params_for(&args.inputs);
    params.parallel_load = !args.sequential;

    info!("Loading {} input files", params.inputs.len());
    let t_pipeline = Instant::now();
    let mut diagnostics = Diagnostics::new();
    let outcome = run_pipeline(&params, &mut diagnostics);
    log_diagnostics(&diagnostics);
    let comparison = outcome.context("comparison aborted")?;
    if args.verbose {
        info!(
            "Pipeline: {:.1} ms",
            t_pipeline.elapsed().as_secs_f64() * 1000.0
        );
    }

    let series = comparison.series();
    let summary = series.summary();
    if let (Some(first), Some(last)) = (series.timestamps.first(), series.timestamps.last()) {
        info!(
            "{} rows from {} to {} ({:.1} s)",
            summary.rows, first, last, summary.span_s
        );
    }
    info!(
        "Position difference: mean {:.2} m, max {:.2} m",
        summary.mean_positional_divergence_m, summary.max_positional_divergence_m
    );
    info!(
        "Speed difference: mean {:+.3}, rms {:.3}, max |{:.3}|",
        summary.mean_speed_divergence,
        summary.rms_speed_divergence,
        summary.max_abs_speed_divergence
    );

    let t_plot = Instant::now();
    write_charts(&series, &args.output, args.svg.as_deref())?;
    if args.verbose {
        info!("Plot: {:.1} ms", t_plot.elapsed().as_secs_f64() * 1000.0);
    }

    if args.show {
        match show_image(&args.output) {
            Ok(()) => debug!("Viewer launched for {}", args.output.display()),
            Err(err) => warn!("{:#}", err),
        }
    }

    Ok(())
}

/// Write the PNG and the optional SVG; a failed run leaves neither behind.
fn write_charts(series: &ComparisonSeries, png: &Path, svg: Option<&Path>) -> Result<()> {
    render_chart_guard(series, png, ChartKind::Png)
        .map_err(|err| anyhow!("failed to render {}: {}", png.display(), err))?;

    if let Some(svg) = svg {
        if let Err(err) = render_chart_guard(series, svg, ChartKind::Svg) {
            let _ = fs::remove_file(png);
            return Err(anyhow!("failed to render {}: {}", svg.display(), err));
        }
        info!("SVG saved as '{}'", svg.display());
    }
    info!("Plot saved as '{}'", png.display());
    Ok(())
}

fn handle_diagnose(args: DiagnoseArgs) -> Result<()> {
    let params = params_for(&args.inputs);
    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(if args.json {
            "kalman_diagnostics.json"
        } else {
            "kalman_diagnostics.txt"
        })
    });

    let reports: Vec<FileInspection> = params
        .inputs
        .iter()
        .map(|path| inspect_file(path, &params))
        .collect();
    for report in &reports {
        if report.is_usable() {
            info!(
                "{}: {} of {} rows complete",
                report.path.display(),
                report.complete_rows,
                report.rows
            );
        } else {
            warn!("{}: contributes no rows", report.path.display());
        }
    }

    let body = if args.json {
        serde_json::to_string_pretty(&reports)?
    } else {
        reports
            .iter()
            .map(FileInspection::render_text)
            .collect::<Vec<_>>()
            .join("\n")
    };
    fs::write(&output, body).with_context(|| format!("failed to write {}", output.display()))?;
    info!("Diagnostic report written: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bare_invocation_has_no_subcommand() {
        let cli = Cli::try_parse_from(["kf-compare"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(CompareArgs::default().output, PathBuf::from(DEFAULT_CHART));
    }

    #[test]
    fn explicit_inputs_replace_default_list() {
        let cli =
            Cli::try_parse_from(["kf-compare", "compare", "a.csv", "b.csv", "--svg", "c.svg"])
                .unwrap();
        let Some(Command::Compare(args)) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.output, PathBuf::from(DEFAULT_CHART));
        assert_eq!(args.svg, Some(PathBuf::from("c.svg")));
        let params = params_for(&args.inputs);
        assert_eq!(params.inputs, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);

        assert_eq!(params_for(&[]).inputs.len(), 4);
    }

    const HEADER: &str = "#DateLog;LatGps;LonGps;SpeedGps;Latitude;Longitude;Speed";

    fn compare_into(dir: &tempfile::TempDir, inputs: Vec<PathBuf>) -> (Result<()>, PathBuf) {
        let output = dir.path().join("cmp.png");
        let result = handle_compare(CompareArgs {
            inputs,
            output: output.clone(),
            ..CompareArgs::default()
        });
        (result, output)
    }

    fn assert_no_chart(output: &Path) {
        assert!(!output.exists());
        let leftovers: Vec<_> = fs::read_dir(output.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains("partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn no_loadable_input_writes_no_chart() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![dir.path().join("one.csv"), dir.path().join("two.csv")];

        let (result, output) = compare_into(&dir, inputs);

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("no data loaded"));
        assert_no_chart(&output);
    }

    #[test]
    fn missing_column_writes_no_chart() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.csv");
        fs::write(
            &log,
            "#DateLog;LatGps;LonGps;SpeedGps;Latitude;Longitude\n\
             2024-09-30 10:00:00.0;1;1;1;1;1\n",
        )
        .unwrap();

        let (result, output) = compare_into(&dir, vec![log]);

        assert!(format!("{:#}", result.unwrap_err()).contains("Speed"));
        assert_no_chart(&output);
    }

    #[test]
    fn valid_input_writes_chart() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("a.csv");
        fs::write(
            &log,
            format!(
                "{HEADER}\n\
                 2024-09-30 10:00:00.0;48,2;16,3;10;48,2;16,3;10,5\n\
                 2024-09-30 10:00:01.0;48,2;16,3;11;48,2;16,3;10,5\n"
            ),
        )
        .unwrap();

        let (result, output) = compare_into(&dir, vec![log]);

        result.unwrap();
        assert!(output.exists());
    }

    #[test]
    fn failed_svg_removes_png() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("cmp.png");
        let svg = dir.path().join("no_such_dir").join("cmp.svg");
        let mut diagnostics = Diagnostics::new();
        let log = dir.path().join("a.csv");
        fs::write(
            &log,
            format!("{HEADER}\n2024-09-30 10:00:00.0;48,2;16,3;10;48,2;16,3;10,5\n"),
        )
        .unwrap();
        let series = run_pipeline(&params_for(&[log]), &mut diagnostics)
            .unwrap()
            .series();

        let err = write_charts(&series, &png, Some(&svg)).unwrap_err();

        assert!(err.to_string().contains("cmp.svg"));
        assert_no_chart(&png);
    }

    #[test]
    fn diagnose_writes_report_for_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("report.json");
        handle_diagnose(DiagnoseArgs {
            inputs: vec![dir.path().join("absent.csv")],
            output: Some(output.clone()),
            json: true,
            verbose: false,
        })
        .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(value[0]["status"]["state"], "missing");
    }
}
