use std::path::Path;

use clap::{ArgAction, Parser};

use mp4rec::Recorder;

#[derive(Parser)]
#[command(
    name = "mp4rec-recover",
    about = "Detect and finalize interrupted MP4 recordings"
)]
struct Args {
    /// Only report which recordings are incomplete; do not modify anything
    #[arg(long)]
    check: bool,

    /// Stop on the first error instead of continuing and reporting failures at the end
    #[arg(long = "fail-fast", default_value_t = false, action = ArgAction::Set)]
    fail_fast: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,

    /// Recording paths (the media files, not the sidecars)
    files: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        mp4rec::version::print_cli_version_banner(
            "MP4 Recording Recovery Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    if args.files.is_empty() {
        return Err("no recording paths given".into());
    }

    let mut failures: Vec<String> = Vec::new();
    for file in &args.files {
        let path = Path::new(file);
        if !Recorder::has_incomplete_recording(path) {
            log::info!("{}: no incomplete recording detected", file);
            continue;
        }
        if args.check {
            log::info!("{}: incomplete recording (index and lock present)", file);
            continue;
        }

        let mut recorder = Recorder::new();
        match recorder.recover(path) {
            Ok(()) => log::info!("{}: recovered", file),
            Err(e) => {
                log::error!("{}: recovery failed: {}", file, e);
                if args.fail_fast {
                    return Err(format!("recovery failed for {file}: {e}").into());
                }
                failures.push(file.clone());
            }
        }
    }

    if !failures.is_empty() {
        return Err(format!(
            "{} recording(s) failed to recover: {}",
            failures.len(),
            failures.join(", ")
        )
        .into());
    }
    Ok(())
}
