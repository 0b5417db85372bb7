//! Subcommand execution.

use std::net::{TcpStream, ToSocketAddrs};

use anyhow::{bail, Context, Result};
use colored::Colorize;

use bunny_rail::codec::PointRecord;
use bunny_rail::server::{self, STATUS_OK};
use bunny_rail::ternary;
use bunny_rail::trajectory::{self, Linkage, ParseOptions};
use bunny_rail::{
    Command, ControlPlane, EpisodeProvider, FunctionWeights, Playback, PlaybackConfig, RingState,
    TcpControlPlane, UploadMode, UploadRequest,
};

use crate::{Cli, Commands, PlayArgs, TrajectoryArgs, UploadArgs, WeightsArgs};

/// Run one parsed command line.
pub fn execute(cli: Cli) -> Result<()> {
    let robot_id = cli.robot_id;
    match cli.command {
        Commands::Add(args) => execute_add(&cli.control_plane, robot_id, &args),
        Commands::AddPoint(args) => {
            let point = args.to_point()?;
            let (id, next) = (point.id, point.next_id);
            send(&cli.control_plane, &[Command::AddPoint(PointRecord { robot_id, point })])?;
            status(format!("added point {id} -> {next}"));
            Ok(())
        }
        Commands::Delete { first, last } => {
            send(&cli.control_plane, &[Command::DeleteRange { robot_id, first, last }])
        }
        Commands::Clear => send(&cli.control_plane, &[Command::ClearAll]),
        Commands::Load(args) => execute_load(&cli.control_plane, robot_id, &args),
        Commands::Dump => send(&cli.control_plane, &[Command::Dump]),
        Commands::Play(args) => execute_play(&cli.control_plane, robot_id, &args),
        Commands::ClearFunctions => send(&cli.control_plane, &[Command::ClearFunctions]),
        Commands::Weights(args) => execute_weights(&cli.control_plane, &args),
        Commands::ActualId => {
            let mut plane = connect(&cli.control_plane)?;
            let id = plane.actual_position(robot_id)?;
            plane.close()?;
            println!("{}", id);
            Ok(())
        }
        Commands::SetRedirect { from, to } => send(
            &cli.control_plane,
            &[Command::SetRedirect { robot_id, from_id: from, to_id: to }],
        ),
        Commands::UnsetRedirect { from } => send(
            &cli.control_plane,
            &[Command::UnsetRedirect { robot_id, from_id: from }],
        ),
        Commands::SetActualId { id } => send(
            &cli.control_plane,
            &[Command::SetActualPosition { robot_id, point_id: id }],
        ),
        Commands::Upload(args) => execute_upload(&args),
        Commands::Close => send(&cli.control_plane, &[]),
        Commands::Shutdown => {
            let mut plane = connect(&cli.control_plane)?;
            plane.send(&Command::Shutdown)?;
            status(format!("shutdown sent to {}", cli.control_plane));
            Ok(())
        }
    }
}

fn status(message: String) {
    println!("{} {}", "[bunny]".bright_cyan().bold(), message);
}

fn connect(addr: &str) -> Result<TcpControlPlane> {
    let addr = addr
        .to_socket_addrs()
        .with_context(|| format!("bad control plane address {addr}"))?
        .next()
        .with_context(|| format!("{addr} resolves to nothing"))?;
    TcpControlPlane::connect(addr, None).with_context(|| format!("cannot reach switch agent at {addr}"))
}

/// Send `commands` on one connection and close it.
fn send(addr: &str, commands: &[Command]) -> Result<()> {
    let mut plane = connect(addr)?;
    plane.send_all(commands)?;
    plane.close()?;
    tracing::debug!(sent = commands.len(), "done");
    Ok(())
}

fn load_points(args: &TrajectoryArgs) -> Result<Vec<bunny_rail::TrajectoryPoint>> {
    let options = ParseOptions {
        linkage: if args.looping { Linkage::Looping } else { Linkage::Forward },
        last_duration_ms: args.last_duration_ms,
    };
    trajectory::load_file(&args.file, options)
        .with_context(|| format!("cannot read {}", args.file.display()))
}

fn execute_add(addr: &str, robot_id: i32, args: &TrajectoryArgs) -> Result<()> {
    if args.capacity == 0 {
        bail!("capacity must be > 0");
    }
    let points = load_points(args)?;
    let commands: Vec<Command> = points
        .iter()
        .map(|p| {
            Command::AddPoint(PointRecord {
                robot_id,
                point: p.shifted(args.offset, args.capacity),
            })
        })
        .collect();
    send(addr, &commands)?;
    status(format!("added {} points", points.len()));
    Ok(())
}

fn execute_load(addr: &str, robot_id: i32, args: &TrajectoryArgs) -> Result<()> {
    let points = load_points(args)?;
    let mut ring = RingState::new(args.capacity)?;
    let commands = ring.reset(robot_id, &points)?;
    send(addr, &commands)?;
    status(format!(
        "loaded {} points, stop at {}",
        points.len(),
        ring.stop().map_or_else(|| "-".to_string(), |s| s.to_string())
    ));
    Ok(())
}

fn execute_play(addr: &str, robot_id: i32, args: &PlayArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PlaybackConfig::from_json_file(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => PlaybackConfig::default(),
    };
    config.robot_id = robot_id.into();
    if let Some(offset) = args.offset {
        config.offset = offset;
    }

    let mut provider = EpisodeProvider::from_file(&args.file, config.last_duration_ms)
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let mut playback = Playback::new(config, std::thread::sleep)?;

    let mut plane = connect(addr)?;
    let report = playback.run(&mut plane, &mut provider, args.episodes)?;
    plane.close()?;

    status(format!(
        "played {} episodes: {} points uploaded, {} ranges deleted",
        report.episodes, report.points_uploaded, report.ranges_deleted
    ));
    Ok(())
}

fn execute_weights(addr: &str, args: &WeightsArgs) -> Result<()> {
    let weights = FunctionWeights {
        actual: args.actual,
        target: args.target,
        difference: args.difference,
    };
    let commands = ternary::weighting_commands(&weights, args.precision)?;
    send(addr, &commands)?;
    status(format!(
        "installed {} rules per table (precision {})",
        ternary::rule_count(args.precision)?,
        args.precision
    ));
    Ok(())
}

fn execute_upload(args: &UploadArgs) -> Result<()> {
    let payload = std::fs::read_to_string(&args.file)
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let mode = if args.append { UploadMode::Append } else { UploadMode::Reset };
    let request = UploadRequest::new(mode, payload);

    let mut stream = TcpStream::connect(&args.proxy)
        .with_context(|| format!("cannot reach upload proxy at {}", args.proxy))?;
    let code = server::send_upload(&mut stream, &request)?;
    if code != STATUS_OK {
        bail!("proxy rejected the {:?} upload (status {})", mode, code);
    }
    status(format!("{:?} upload of {} accepted", mode, args.file.display()));
    Ok(())
}
