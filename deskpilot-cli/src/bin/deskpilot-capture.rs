//! One-shot capture to an image file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use deskpilot_cli::{build_agent, init_logging, CommonArgs};
use deskpilot_core::capture::{CaptureFormat, CaptureMode, CaptureRequest};
use deskpilot_core::geometry::RectPx;
use deskpilot_core::window::WindowMatch;

#[derive(Parser)]
#[command(name = "deskpilot-capture", about = "Capture the screen, a window, or a region to a file")]
struct Args {
    #[command(subcommand)]
    target: Target,

    /// Output file; the extension follows the format when omitted
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "png", global = true)]
    format: Format,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value_t = 90, global = true)]
    quality: u8,

    /// Record the capture under this run id
    #[arg(long, global = true)]
    run_id: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand)]
enum Target {
    /// A whole display (primary by default)
    Screen {
        /// Display index as reported by `deskpilot-worker` displays.list
        #[arg(short, long)]
        display: Option<usize>,
    },
    /// The best-matching top-level window
    Window {
        /// Case-insensitive title substring
        #[arg(short, long)]
        title: Option<String>,
        /// Case-insensitive title regex
        #[arg(short = 'r', long)]
        title_regex: Option<String>,
        /// Process name without `.exe`
        #[arg(short, long)]
        process: Option<String>,
    },
    /// A rectangle in physical virtual-screen pixels
    Region {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        w: i32,
        h: i32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Png,
    #[value(alias = "jpg")]
    Jpeg,
}

impl From<Format> for CaptureFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => CaptureFormat::Png,
            Format::Jpeg => CaptureFormat::Jpeg,
        }
    }
}

fn request_for(args: &Args) -> CaptureRequest {
    let mut request = match &args.target {
        Target::Screen { display } => CaptureRequest {
            mode: CaptureMode::Screen,
            display_index: *display,
            ..CaptureRequest::default()
        },
        Target::Window {
            title,
            title_regex,
            process,
        } => CaptureRequest::window(WindowMatch {
            title_contains: title.clone(),
            title_regex: title_regex.clone(),
            process_name: process.clone(),
        }),
        Target::Region { x, y, w, h } => CaptureRequest::region(RectPx::new(*x, *y, *w, *h)),
    };
    request.format = args.format.into();
    request.quality = args.quality;
    request
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.common.verbose);

    let agent = match build_agent(&args.common) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    let request = request_for(&args);
    let image = match agent.capture(&request, args.run_id.as_deref()) {
        Ok(image) => image,
        Err(failure) => {
            eprintln!("error: {failure}");
            if let Some(candidates) = &failure.candidates {
                for c in candidates {
                    eprintln!(
                        "  candidate 0x{:X} {:?} ({}) score={} {}x{}",
                        c.hwnd, c.title, c.process_name, c.score, c.width, c.height
                    );
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let format = image.result.format;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("capture.{}", format.extension())));
    if let Err(e) = std::fs::write(&output, &image.result.image_bytes) {
        eprintln!("error: writing {}: {e}", output.display());
        return ExitCode::FAILURE;
    }

    match serde_json::to_string_pretty(&image) {
        Ok(json) => println!("{json}"),
        Err(e) => log::warn!("metadata serialization failed: {e}"),
    }
    eprintln!("Wrote {} bytes to {}", image.result.image_bytes.len(), output.display());
    ExitCode::SUCCESS
}
