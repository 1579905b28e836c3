use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use mp4rec::file_ops::StdFileOps;
use mp4rec::index::IndexFile;
use mp4rec::sample::{RecorderConfig, SampleRecord, TrackKind};

#[derive(Parser)]
#[command(
    name = "mp4rec-info",
    about = "Parse and display an mp4rec sample index sidecar"
)]
struct Args {
    /// Recording path or .idx sidecar
    #[arg(short = 'f', long = "file")]
    file: Option<String>,

    /// Recording path or .idx sidecar (positional)
    #[arg(conflicts_with = "file", required_unless_present_any = ["file", "schema", "version"])]
    input: Option<String>,

    /// Only show records for one track ("video" or "audio")
    #[arg(short = 't', long = "track")]
    track_filter: Option<String>,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Print JSON schema for the output format and exit
    #[arg(long)]
    schema: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,
}

/// Everything the sidecar holds, in read-back order per track.
#[derive(serde::Serialize, schemars::JsonSchema)]
struct IndexDump {
    config: RecorderConfig,
    video: Vec<SampleRecord>,
    audio: Vec<SampleRecord>,
}

fn index_path_for(arg: &str) -> PathBuf {
    if arg.ends_with(".idx") {
        PathBuf::from(arg)
    } else {
        PathBuf::from(format!("{arg}.idx"))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let args = Args::parse();

    if args.version {
        mp4rec::version::print_cli_version_banner(
            "MP4 Recording Index Tool",
            env!("CARGO_PKG_VERSION"),
            env!("RELEASE_VERSION"),
            env!("GIT_COMMIT"),
        );
        return Ok(());
    }

    if args.schema {
        let schema = schemars::schema_for!(IndexDump);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let track_filter = match args.track_filter.as_deref() {
        None => None,
        Some("video") => Some(TrackKind::Video),
        Some("audio") => Some(TrackKind::Audio),
        Some(other) => return Err(format!("unknown track filter: {other}").into()),
    };

    let file = args.file.or(args.input).expect("file argument required");
    let index_path = index_path_for(&file);

    let mut index = IndexFile::open(Arc::new(StdFileOps), &index_path)?;
    let config = index.read_config()?;
    let (video, audio) = index.read_all()?;

    if args.json {
        let dump = IndexDump {
            config,
            video,
            audio,
        };
        println!("{}", serde_json::to_string(&dump)?);
        return Ok(());
    }

    print_config(&index_path, &config);

    // Merge the per-track vectors back into write order: payload offsets
    // are assigned globally, so sorting by offset reconstructs it.
    let mut records: Vec<SampleRecord> = Vec::with_capacity(video.len() + audio.len());
    records.extend_from_slice(&video);
    records.extend_from_slice(&audio);
    records.sort_by_key(|record| record.offset);

    println!(
        "{:>4} {:>3} {:>16} {:>10} {:>15} {:>15}",
        "Type", "KF", "OFFSET", "SIZE", "PTS", "DTS"
    );
    for record in &records {
        if let Some(filter) = track_filter {
            if record.track != filter {
                continue;
            }
        }
        let type_char = match record.track {
            TrackKind::Video => "V",
            TrackKind::Audio => "A",
        };
        println!(
            "{:>4} {:>3} {:>16} {:>10} {:>15} {:>15}",
            type_char,
            if record.keyframe { 1 } else { 0 },
            record.offset,
            record.size,
            record.pts,
            record.dts,
        );
    }

    Ok(())
}

fn print_config(index_path: &Path, config: &RecorderConfig) {
    println!("Index: {}", index_path.display());
    println!(
        "Video: {}x{} @ timescale {}",
        config.video_width, config.video_height, config.video_timescale
    );
    println!(
        "Audio: {} Hz, {} channel(s) @ timescale {}",
        config.audio_sample_rate, config.audio_channels, config.audio_timescale
    );
    println!(
        "Flush: every {} ms or {} samples",
        config.flush_interval_ms, config.flush_frame_count
    );
    println!();
}
