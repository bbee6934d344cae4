//! swingfit CLI: period and swing tracking from optical-gate frame streams.

mod plot;

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand, ValueEnum};
use swingfit::{
    build_template, detect_edges, fit_physical, fit_template, FitMode, Frame, LiveReader,
    PeriodTracker, PhysicalModel, PipelineConfig, ReplayReader, StreamError, TabulatedSeriesFile,
    Template, TemplateCurve, TemplateSource,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "swingfit")]
#[command(about = "Estimate pendulum period and swing from optical-gate ADC frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track period and swing over a frame stream.
    Track(TrackArgs),

    /// Build a template from a replay file.
    BuildTemplate(BuildTemplateArgs),

    /// Print the quick fit (and refinement) of a single frame.
    Inspect(InspectArgs),

    /// Print the effective configuration as JSON.
    PrintConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Quick,
    Physical,
    Template,
}

impl From<ModeArg> for FitMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Quick => FitMode::Quick,
            ModeArg::Physical => FitMode::Physical,
            ModeArg::Template => FitMode::Template,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// JSON configuration file; omitted fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the fit mode.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Use a two-column template table.
    #[arg(long, conflicts_with = "template_dir")]
    template_file: Option<PathBuf>,

    /// Use a directory-backed template store.
    #[arg(long)]
    template_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> CliResult<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| -> CliError {
                    format!("Failed to read config {}: {}", path.display(), e).into()
                })?;
                PipelineConfig::from_json_str(&text)?
            }
            None => PipelineConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.fit.mode = mode.into();
        }
        if let Some(path) = &self.template_file {
            config.template_source = TemplateSource::File { path: path.clone() };
        }
        if let Some(path) = &self.template_dir {
            config.template_source = TemplateSource::Directory { path: path.clone() };
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
struct TrackArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Frame input; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Input is a live stream (one frame per line) rather than a replay.
    #[arg(long)]
    live: bool,

    /// Path to write the accepted `period swing` series.
    #[arg(long, default_value = "swings.dat")]
    series: PathBuf,

    /// Path to write a diagnostic PNG of going and swing.
    #[arg(long)]
    plot: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct BuildTemplateArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Replay file of calibration frames; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Use at most this many frames (0 = all).
    #[arg(long, default_value = "0")]
    max_frames: usize,

    /// Path to write the template table.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also save into the configured template store.
    #[arg(long)]
    save: bool,
}

#[derive(Debug, Clone, Args)]
struct InspectArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Replay file; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: PathBuf,

    /// Zero-based frame index.
    #[arg(long, default_value = "0")]
    frame: usize,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::BuildTemplate(args) => run_build_template(&args),
        Commands::Inspect(args) => run_inspect(&args),
        Commands::PrintConfig { config } => run_print_config(&config),
    }
}

fn open_input(path: &Path) -> CliResult<Box<dyn BufRead>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(std::io::stdin())));
    }
    let file = std::fs::File::open(path).map_err(|e| -> CliError {
        format!("Failed to open input {}: {}", path.display(), e).into()
    })?;
    Ok(Box::new(BufReader::new(file)))
}

/// Frames from a replay file, skipping malformed batches.
fn replay_frames(path: &Path, config: &PipelineConfig) -> CliResult<Vec<Frame>> {
    let reader = ReplayReader::new(
        open_input(path)?,
        config.sampling.n_samples,
        config.reference_mode,
    );
    let mut frames = Vec::new();
    for item in reader {
        match item {
            Ok(frame) => frames.push(frame),
            Err(StreamError::Io(e)) => return Err(e.into()),
            Err(e) => tracing::warn!("{}; batch skipped", e),
        }
    }
    Ok(frames)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn run_track(args: &TrackArgs) -> CliResult<()> {
    let config = args.config.load()?;
    tracing::info!(
        "Tracking: mode={:?} n_samples={} tick={:.4e}s",
        config.fit.mode,
        config.sampling.n_samples,
        config.sampling.adc_tick_s
    );

    let input = open_input(&args.input)?;
    let frames: Box<dyn Iterator<Item = Result<Frame, StreamError>>> = if args.live {
        Box::new(LiveReader::new(input, config.reference_mode))
    } else {
        Box::new(ReplayReader::new(
            input,
            config.sampling.n_samples,
            config.reference_mode,
        ))
    };
    let store = config.open_store();
    let mut tracker = PeriodTracker::new(config, store)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut n_frames = 0usize;
    for item in frames {
        let frame = match item {
            Ok(frame) => frame,
            Err(StreamError::Io(e)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!("{}; frame skipped", e);
                continue;
            }
        };
        n_frames += 1;
        match tracker.process(&frame) {
            Ok(m) => writeln!(out, "{:.9} {:.6} {:.3}", m.period_s, m.swing_deg, m.height)?,
            Err(reject) => {
                if let Some((p, s, h)) = reject.sentinel() {
                    writeln!(out, "{} {} {}", p, s, h)?;
                }
            }
        }
        out.flush()?;
    }

    tracing::info!(
        "Processed {} frames, {} accepted swings",
        n_frames,
        tracker.series().len()
    );
    let mut sink = TabulatedSeriesFile::new(&args.series);
    tracker.finish(&mut sink).map_err(|e| -> CliError {
        format!("Failed to write series {}: {}", args.series.display(), e).into()
    })?;
    tracing::info!("Series written to {}", args.series.display());

    if let Some(path) = &args.plot {
        plot::write_png(path, tracker.series())?;
        tracing::info!("Plot written to {}", path.display());
    }
    Ok(())
}

fn run_build_template(args: &BuildTemplateArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let mut frames = replay_frames(&args.input, &config)?;
    if args.max_frames > 0 {
        frames.truncate(args.max_frames);
    }
    tracing::info!("Building template from {} frames", frames.len());

    let curve = build_template(
        frames.iter().map(|f| f.samples.as_slice()),
        &config.edges,
        &config.template_build,
    )?;

    if let Some(path) = &args.out {
        std::fs::write(path, curve.to_table()).map_err(|e| -> CliError {
            format!("Failed to write template {}: {}", path.display(), e).into()
        })?;
        tracing::info!("Template written to {}", path.display());
    }
    if args.save {
        if config.template_source.is_none() {
            return Err("--save needs --template-file or --template-dir".into());
        }
        let mut store = config.open_store();
        store.save_template(&curve, now_ms())?;
        tracing::info!("Template saved to store");
    }
    if args.out.is_none() && !args.save {
        print!("{}", curve.to_table());
    }
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> CliResult<()> {
    let config = args.config.load()?;
    let frames = replay_frames(&args.input, &config)?;
    let frame = frames.get(args.frame).ok_or_else(|| -> CliError {
        format!("frame {} not found ({} frames read)", args.frame, frames.len()).into()
    })?;

    let fix = detect_edges(&frame.samples, &config.edges)?;
    println!("{}", serde_json::to_string_pretty(&fix)?);
    println!("duration: {:.4} samples", fix.duration());

    match config.fit.mode {
        FitMode::Quick => {}
        FitMode::Physical => {
            let model = PhysicalModel::new(&config.fiducial, &config.pendulum, &config.sampling);
            let fit = fit_physical(&frame.samples, &fix, &model, &config.pendulum, &config.fit)?;
            println!(
                "physical: t0={:.4} lo={:.2} hi={:.2} beam={:.4}mm swing={:.4}deg \
                 length={:.2}mm rms={:.3}",
                fit.params.t0,
                fit.params.lo,
                fit.params.hi,
                fit.params.beam_mm,
                fit.params.swing_deg,
                fit.params.length_mm,
                fit.rms
            );
        }
        FitMode::Template => {
            let mut store = config.open_store();
            let (curve, timestamp): (TemplateCurve, i64) = store
                .load_most_recent_template()?
                .ok_or("template store holds no template")?;
            let template = Template::new(curve, timestamp)?;
            let fit = fit_template(&frame.samples, &fix, &template, &config.fit)?;
            println!(
                "template@{}: t0={:.4} duration={:.4} lo={:.2} range={:.2} rms={:.3}",
                timestamp, fit.t0, fit.duration, fit.lo, fit.range, fit.rms
            );
        }
    }
    Ok(())
}

fn run_print_config(args: &ConfigArgs) -> CliResult<()> {
    let config = args.load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
