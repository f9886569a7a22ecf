use std::{
    io::{self, BufRead},
    path::{Path, PathBuf},
    sync::{mpsc::RecvTimeoutError, Arc},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use showline_core::{format_hms, AppConfig, LogSink, Notification, PlaybackState, Timeline};
use tracing_subscriber::EnvFilter;

fn main() -> showline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            file,
            looping,
            ip,
            port,
            dry_run,
            config,
        } => run_play(PlayArgs {
            file,
            looping,
            ip,
            port,
            dry_run,
            config,
        }),
        Commands::Validate { file } => run_validate(&file),
        Commands::Inspect { file } => run_inspect(&file),
    }
}

struct PlayArgs {
    file: PathBuf,
    looping: bool,
    ip: Option<String>,
    port: Option<u16>,
    dry_run: bool,
    config: Option<PathBuf>,
}

fn run_play(args: PlayArgs) -> showline_core::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    tracing::info!(
        file = ?args.file,
        looping = args.looping,
        dry_run = args.dry_run,
        "starting playback"
    );

    let timeline = Arc::new(Timeline::load_with_config(&args.file, config.playback)?);
    if args.ip.is_some() || args.port.is_some() {
        let ip = args.ip.unwrap_or(timeline.ip()?);
        let port = args.port.unwrap_or(timeline.port()?);
        timeline.set_sink(ip, port)?;
    }
    if args.dry_run {
        timeline.replace_sink(Arc::new(LogSink))?;
    }
    timeline.set_loop(args.looping);

    let notifications = timeline.subscribe()?;
    spawn_controls(Arc::clone(&timeline));

    println!(
        "{} -> {}:{} ({} events, {}); type p/r/s + enter to pause, resume or stop",
        timeline.name()?,
        timeline.ip()?,
        timeline.port()?,
        timeline.len()?,
        format_hms(timeline.max_time()?),
    );

    timeline.run()?;
    loop {
        match notifications.recv_timeout(Duration::from_millis(100)) {
            Ok(notification) => print_notification(notification),
            Err(RecvTimeoutError::Timeout) => {
                if !timeline.is_active()? {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    timeline.join()?;
    notifications.try_iter().for_each(print_notification);

    println!("finished at {}", format_hms(timeline.elapsed()?.as_secs_f64()));
    Ok(())
}

fn run_validate(file: &Path) -> showline_core::Result<()> {
    match Timeline::load(file) {
        Ok(timeline) => {
            println!("{}: ok ({} events)", file.display(), timeline.len()?);
            Ok(())
        }
        Err(err) => {
            tracing::error!(%err, file = ?file, "invalid timeline");
            Err(err)
        }
    }
}

fn run_inspect(file: &Path) -> showline_core::Result<()> {
    let timeline = Timeline::load(file)?;
    println!("{}", timeline.name()?);
    println!("target: {}:{}", timeline.ip()?, timeline.port()?);

    let mut events = timeline.events()?;
    events.sort_by(|(_, a), (_, b)| a.time().total_cmp(&b.time()));
    for (id, event) in events {
        let control = event.control();
        let duration = control
            .duration()
            .map(|seconds| format!(" over {seconds}s"))
            .unwrap_or_default();
        println!(
            "#{:<3} {}  {}  {}{}",
            id.get(),
            format_hms(event.time()),
            event.address(),
            control.mode(),
            duration
        );
    }
    Ok(())
}

/// Reads single-letter commands from stdin and forwards them to the timeline.
fn spawn_controls(timeline: Arc<Timeline>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let outcome = match line.trim() {
                "p" | "pause" => timeline.pause(),
                "r" | "resume" => timeline.resume(),
                "s" | "stop" => timeline.stop(),
                "" => continue,
                other => {
                    tracing::warn!(command = other, "unknown command");
                    continue;
                }
            };
            if let Err(err) = outcome {
                tracing::warn!(%err, "command rejected");
            }
            if matches!(timeline.state(), Ok(PlaybackState::Stopped)) {
                break;
            }
        }
    });
}

fn print_notification(notification: Notification) {
    match notification {
        Notification::StateChanged(state) => tracing::debug!(%state, "state changed"),
        Notification::Progress(percent) => println!("[{percent:>3}%]"),
        Notification::Log(line) => println!("{line}"),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Plays timed OSC cue lists over UDP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a timeline and play it back.
    Play {
        /// Timeline JSON file.
        file: PathBuf,
        /// Restart from the beginning after the last event.
        #[arg(short, long = "loop")]
        looping: bool,
        /// Override the target address stored in the file.
        #[arg(long)]
        ip: Option<String>,
        /// Override the target port stored in the file.
        #[arg(long)]
        port: Option<u16>,
        /// Log messages instead of sending them.
        #[arg(long)]
        dry_run: bool,
        /// JSON file with playback timing settings.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Check a timeline file against the schema.
    Validate {
        /// Timeline JSON file.
        file: PathBuf,
    },
    /// Print the events of a timeline in playback order.
    Inspect {
        /// Timeline JSON file.
        file: PathBuf,
    },
}
