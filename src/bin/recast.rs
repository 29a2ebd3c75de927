use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use serde_json::json;
use tokio_stream::StreamExt;

use recast::{
    BitrateMapping, ConversionEvent, ConvertOptions, FfmpegEngine, FfmpegLogLevel,
    PartialOutput, Quality, SessionOutcome, StreamMetadata, TargetFormat,
};

const CLI_AFTER_HELP: &str = "Examples:\n  recast convert clip.mov --format mp4\n  recast convert talk.mkv --format mp3 --quality 0.4 --out-dir audio\n  recast probe clip.mov --json\n  recast formats\n  recast completions zsh > _recast";

/// Exit status after Ctrl-C, as shells report for SIGINT.
const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "recast",
    version,
    about = "Convert audio and video files between container formats",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<FfmpegLogLevel>,
}

#[derive(Debug, Parser)]
struct ConvertArgs {
    /// File to convert.
    input: PathBuf,

    /// Target format (mp4, avi, mkv, mov, mp3, wav).
    #[arg(long, short)]
    format: TargetFormat,

    /// Directory for the converted file. Defaults to the input's directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Quality between 0.0 and 1.0.
    #[arg(long, short, default_value_t = 0.8)]
    quality: f32,

    /// Use the reference bitrates regardless of quality.
    #[arg(long)]
    fixed_bitrate: bool,

    /// Keep the partially written file when the conversion does not finish.
    #[arg(long)]
    keep_partial: bool,

    /// Allow overwriting an existing output file.
    #[arg(long)]
    overwrite: bool,

    /// Frames between progress updates.
    #[arg(long, default_value_t = recast::DEFAULT_BATCH_SIZE)]
    batch_size: u64,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a file into another format.
    #[command(about = "Convert a file into another format")]
    Convert(ConvertArgs),

    /// Print stream metadata.
    #[command(about = "Show stream metadata")]
    Probe {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// List target formats.
    #[command(about = "List supported target formats")]
    Formats,

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging(global: &GlobalOptions) {
    let level = if global.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .try_init();

    if let Some(level) = global.log_level {
        recast::set_ffmpeg_log_level(level);
    } else if !global.verbose {
        recast::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn output_directory(input: &Path, out_dir: Option<PathBuf>) -> PathBuf {
    out_dir.unwrap_or_else(|| match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    })
}

fn convert_options(args: &ConvertArgs) -> ConvertOptions {
    let mut options = ConvertOptions::new().with_batch_size(args.batch_size);
    if args.fixed_bitrate {
        options = options.with_bitrate_mapping(BitrateMapping::Fixed);
    }
    if args.keep_partial {
        options = options.with_partial_output(PartialOutput::Keep);
    }
    options
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn format_remaining(remaining: Option<Duration>) -> String {
    match remaining {
        Some(remaining) => {
            let seconds = remaining.as_secs();
            format!("{}:{:02} left", seconds / 60, seconds % 60)
        }
        None => String::new(),
    }
}

async fn convert(args: ConvertArgs) -> Result<(), Box<dyn std::error::Error>> {
    let quality = Quality::new(args.quality)?;
    let out_dir = output_directory(&args.input, args.out_dir.clone());
    let output = out_dir.join(recast::output_file_name(&args.input, args.format)?);
    ensure_writable_path(&output, args.overwrite)?;
    std::fs::create_dir_all(&out_dir)?;

    let mut stream = recast::start_conversion_stream(
        FfmpegEngine::new(),
        &args.input,
        &out_dir,
        args.format,
        quality.value(),
        convert_options(&args),
    )?;

    let bar = progress_bar();
    bar.set_message(format!("{} → {}", args.input.display(), args.format));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(ConversionEvent::Progress(sample)) => {
                    bar.set_position(u64::from(sample.percentage()));
                    bar.set_message(format_remaining(sample.estimated_remaining));
                }
                Some(ConversionEvent::Finished(_)) | None => break,
            },
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                bar.set_message("cancelling...");
                stream.cancel();
            }
        }
    }
    bar.finish_and_clear();

    match stream.outcome().await? {
        SessionOutcome::Completed { frames } => {
            println!(
                "{} {} ({frames} frames)",
                "converted".green().bold(),
                output.display()
            );
            Ok(())
        }
        SessionOutcome::Cancelled { frames, ratio } => {
            eprintln!(
                "{} at {:.0}% after {frames} frames",
                "cancelled".yellow().bold(),
                ratio * 100.0
            );
            std::process::exit(EXIT_CANCELLED);
        }
    }
}

fn print_metadata(metadata: &StreamMetadata, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if as_json {
        let payload = json!({
            "format": metadata.format,
            "duration_seconds": metadata.duration.as_secs_f64(),
            "video": metadata.video.as_ref().map(|video| json!({
                "width": video.width,
                "height": video.height,
                "fps": video.frames_per_second,
                "codec": video.codec,
            })),
            "audio": metadata.audio.as_ref().map(|audio| json!({
                "sample_rate": audio.sample_rate,
                "channels": audio.channels,
                "codec": audio.codec,
            })),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("Format: {}", metadata.format);
        println!("Duration: {:?}", metadata.duration);
        if let Some(video) = &metadata.video {
            println!(
                "Video: {}x{} @ {:.2} fps [{}]",
                video.width, video.height, video.frames_per_second, video.codec,
            );
        }
        if let Some(audio) = &metadata.audio {
            println!(
                "Audio: {} Hz, {} ch [{}]",
                audio.sample_rate, audio.channels, audio.codec,
            );
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli.global);

    match cli.command {
        Commands::Convert(args) => convert(args).await?,
        Commands::Probe { input, json } => {
            let metadata = recast::probe(&mut FfmpegEngine::new(), &input)?;
            print_metadata(&metadata, json)?;
        }
        Commands::Formats => {
            for format in TargetFormat::ALL {
                let video = match format.video_codec() {
                    Some(codec) => format!("{codec:?}"),
                    None => "-".to_string(),
                };
                println!(
                    "{:<4} .{:<4} video: {:<5} audio: {:?}",
                    format.to_string().bold(),
                    format.extension(),
                    video,
                    format.audio_codec(),
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "recast", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
