use std::fs;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use spool::doc::{self, DocumentDef};
use spool::{NodeKind, Timeline};

#[derive(Parser, Debug)]
#[command(name = "spool", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the annotated timeline of a document.
    Inspect(InspectArgs),
    /// Print the per-frame draw schedule over a frame range.
    Schedule(ScheduleArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Input document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct ScheduleArgs {
    /// Input document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// First frame (0-based).
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Last frame, exclusive; defaults to the end of the timeline.
    #[arg(long)]
    to: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Inspect(args) => inspect(&args),
        Command::Schedule(args) => schedule(&args),
    }
}

fn load(path: &PathBuf) -> anyhow::Result<Timeline> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let def = DocumentDef::from_json(&json)?;
    Ok(doc::load(&def)?)
}

fn inspect(args: &InspectArgs) -> anyhow::Result<()> {
    let tl = load(&args.in_path)?;
    println!(
        "canvas {}x{} @ {}/{} fps, duration {:.3}s",
        tl.size().width,
        tl.size().height,
        tl.fps().num,
        tl.fps().den,
        tl.duration()
    );
    print_node(&tl, tl.root(), 0);
    Ok(())
}

fn print_node(tl: &Timeline, id: spool::NodeId, depth: usize) {
    let Some(node) = tl.get(id) else { return };
    let t = node.timing;
    let flex = if t.flexible { " flexible" } else { "" };
    println!(
        "{:indent$}{} '{}' z={} [{:.3}, {:.3}) draw [{:.3}, {:.3}){}",
        "",
        node.kind.tag(),
        node.id,
        node.z_index,
        t.start,
        t.end,
        t.draw_start,
        t.draw_end,
        flex,
        indent = depth * 2
    );
    for &c in &node.children {
        print_node(tl, c, depth + 1);
    }
}

fn schedule(args: &ScheduleArgs) -> anyhow::Result<()> {
    let tl = load(&args.in_path)?;
    let fps = tl.fps();
    let end_frame = args
        .to
        .unwrap_or_else(|| fps.secs_to_frame_floor(tl.duration()));
    if args.from >= end_frame {
        anyhow::bail!("empty frame range {}..{}", args.from, end_frame);
    }

    for frame in args.from..end_frame {
        let t = fps.frame_to_secs(frame);
        let mut drawn: Vec<(i32, String)> = tl
            .descendants(tl.root())
            .into_iter()
            .filter_map(|id| tl.get(id))
            .filter(|n| n.on_draw(t))
            .map(|n| {
                let marker = if n.kind == NodeKind::Transition {
                    "~"
                } else {
                    ""
                };
                (n.z_index, format!("{}{}", marker, n.id))
            })
            .collect();
        drawn.sort();
        let ids: Vec<String> = drawn.into_iter().map(|(_, id)| id).collect();
        println!("frame {frame:>6} t={t:>8.3}  {}", ids.join(" "));
    }
    Ok(())
}
