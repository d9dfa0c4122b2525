//! Standalone CLI tool for sending input events.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use deskpilot_cli::{build_agent, init_logging, CommonArgs};
use deskpilot_core::input::{Humanize, KeyInputRequest, MouseButton, MouseCommand, MouseInputRequest};

#[derive(Parser)]
#[command(name = "deskpilot-input", about = "Send mouse and keyboard input via SendInput")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Random offset in pixels added to each coordinate
    #[arg(long, default_value_t = 0, global = true)]
    jitter: i32,

    /// Inter-event delay range in ms, e.g. `20,80`
    #[arg(long, value_parser = parse_delay, global = true)]
    delay: Option<[i64; 2]>,

    /// Record the action under this run id
    #[arg(long, global = true)]
    run_id: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Move cursor to coordinates
    Move {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
    },
    /// Click at screen coordinates
    Click {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(short, long, value_enum, default_value = "left")]
        button: Button,
    },
    /// Double-click at screen coordinates
    Double {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(short, long, value_enum, default_value = "left")]
        button: Button,
    },
    /// Right-click at screen coordinates
    Right {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
    },
    /// Press at one point, release at another
    Drag {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(allow_negative_numbers = true)]
        x2: i32,
        #[arg(allow_negative_numbers = true)]
        y2: i32,
    },
    /// Scroll, optionally after moving to a point
    Wheel {
        /// Vertical delta (120 per notch, negative scrolls down)
        #[arg(long, default_value_t = -120, allow_negative_numbers = true)]
        dy: i32,
        /// Horizontal delta
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        dx: i32,
        #[arg(long, requires = "y", allow_negative_numbers = true)]
        x: Option<i32>,
        #[arg(long, requires = "x", allow_negative_numbers = true)]
        y: Option<i32>,
    },
    /// Press a key chord, e.g. `CTRL SHIFT S`
    Keys {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Button {
    Left,
    Right,
    Middle,
}

impl From<Button> for MouseButton {
    fn from(button: Button) -> Self {
        match button {
            Button::Left => MouseButton::Left,
            Button::Right => MouseButton::Right,
            Button::Middle => MouseButton::Middle,
        }
    }
}

fn parse_delay(s: &str) -> Result<[i64; 2], String> {
    let (min, max) = s.split_once(',').ok_or("expected MIN,MAX")?;
    let min = min.trim().parse::<i64>().map_err(|e| e.to_string())?;
    let max = max.trim().parse::<i64>().map_err(|e| e.to_string())?;
    Ok([min, max])
}

fn mouse_request(command: &Command) -> Option<MouseInputRequest> {
    let request = match *command {
        Command::Move { x, y } => MouseInputRequest::at(MouseCommand::Move, x, y),
        Command::Click { x, y, button } => MouseInputRequest {
            button: Some(button.into()),
            ..MouseInputRequest::at(MouseCommand::Click, x, y)
        },
        Command::Double { x, y, button } => MouseInputRequest {
            button: Some(button.into()),
            ..MouseInputRequest::at(MouseCommand::Double, x, y)
        },
        Command::Right { x, y } => MouseInputRequest::at(MouseCommand::Right, x, y),
        Command::Drag { x, y, x2, y2 } => MouseInputRequest {
            x2: Some(x2),
            y2: Some(y2),
            ..MouseInputRequest::at(MouseCommand::Drag, x, y)
        },
        Command::Wheel { dx, dy, x, y } => MouseInputRequest {
            x,
            y,
            dx: Some(dx),
            dy: Some(dy),
            ..MouseInputRequest::new(MouseCommand::Wheel)
        },
        Command::Keys { .. } => return None,
    };
    Some(request)
}

fn report<T: Serialize>(result: &T, ok: bool) -> ExitCode {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{json}"),
        Err(e) => log::warn!("result serialization failed: {e}"),
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
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

    let humanize = (args.jitter != 0 || args.delay.is_some()).then_some(Humanize {
        jitter_px: args.jitter,
        delay_ms: args.delay,
    });
    let run_id = args.run_id.as_deref();

    match (&args.command, mouse_request(&args.command)) {
        (Command::Keys { keys }, _) => {
            let request = KeyInputRequest {
                humanize,
                ..KeyInputRequest::press(keys.iter().cloned())
            };
            let result = agent.keys(&request, run_id);
            report(&result, result.ok)
        }
        (_, Some(mut request)) => {
            request.humanize = humanize;
            let result = agent.mouse(&request, run_id);
            report(&result, result.ok)
        }
        (_, None) => ExitCode::FAILURE,
    }
}
