use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, LevelFilter};

use dns_ids::capture::{self, CaptureConfig};
use dns_ids::flow::FlowTracker;
use dns_ids::id3::{self, DecisionTree};
use dns_ids::pipeline::{LogSink, Pipeline, TrainingWriter};
use dns_ids::record::Dataset;
use dns_ids::{bench, render, IdsError, Result};

#[derive(Debug, Parser)]
#[command(name = "dns_ids", version, about = "Detect malicious DNS traffic with an ID3 decision tree")]
struct Args {
    /// Interface to monitor
    #[arg(short, long, default_value = "eth0")]
    interface: String,

    /// Record training rows instead of classifying
    #[arg(short, long)]
    train: bool,

    /// Label recorded traffic as clean (default: malicious)
    #[arg(short, long)]
    clean: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Exit once the tree has been trained and written
    #[arg(short, long)]
    exit_after_id3: bool,

    /// Only graph branches whose path contains this text
    #[arg(short = 'f', long, default_value = "dns_sd__udp_local")]
    filter: String,

    /// Only graph branches with at least this many edges
    #[arg(short = 'l', long, default_value_t = 0)]
    min_branch_length: usize,

    /// Report holdout accuracy and gains for the training file, then exit
    #[arg(long)]
    bench: bool,

    /// Shuffle seed for --bench
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value = "training.csv")]
    training_file: PathBuf,

    #[arg(long, default_value = "graphviz.txt")]
    graphviz_file: PathBuf,

    #[arg(long, default_value = "tree.txt")]
    tree_file: PathBuf,

    /// Only capture datagrams to or from this UDP port
    #[arg(long)]
    udp_port: Option<u16>,

    /// Forget the least recently seen flow beyond this many
    #[arg(long)]
    max_flows: Option<usize>,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if args.bench {
        if args.train {
            return Err(IdsError::Config("--bench cannot be combined with --train".into()));
        }
        let report = bench::run(&args.training_file, args.seed)?;
        for line in report.to_string().lines() {
            info!("{line}");
        }
        return Ok(());
    }

    let flows = match args.max_flows {
        Some(limit) => FlowTracker::with_capacity_limit(limit),
        None => FlowTracker::new(),
    };

    let mut pipeline = if args.train {
        info!("Running in training mode with clean={}", args.clean);
        let writer = TrainingWriter::open(&args.training_file)?;
        Pipeline::training(writer, !args.clean, flows)?
    } else {
        info!("Running in IDS mode");
        let tree = train_tree(&args)?;
        Pipeline::classifying(tree, Box::new(LogSink), flows)?
    };

    if args.exit_after_id3 {
        info!("-e flag set, exiting");
        return Ok(());
    }

    // Handle Ctrl+C gracefully
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received, stopping capture...");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let config = CaptureConfig {
        interface: args.interface.clone(),
        udp_port: args.udp_port,
        ..CaptureConfig::default()
    };
    let (events, capture_thread) = capture::spawn_capture(config, running.clone())?;
    info!("Listening on {}", args.interface);

    let result = pipeline.run(events);
    running.store(false, Ordering::SeqCst);
    if capture_thread.join().is_err() {
        error!("Capture thread panicked");
    }

    let stats = result?;
    info!("Capture stopped: {stats}");
    Ok(())
}

fn train_tree(args: &Args) -> Result<DecisionTree> {
    let dataset = Dataset::load(&args.training_file)?;
    info!("Training ID3 model on {} packets", dataset.len());
    debug!("Header: {:?}", dataset.attributes());

    let tree = DecisionTree::train(&dataset)?;
    for (attribute, gain) in id3::gains(dataset.records(), dataset.attributes())? {
        info!("{attribute} gain: {gain:.6}");
    }
    debug!(
        "Tree depth {}, {} leaves",
        tree.root().depth(),
        tree.root().leaf_count()
    );

    fs::write(&args.tree_file, render::to_text(tree.root()))?;
    fs::write(
        &args.graphviz_file,
        render::to_graph(tree.root(), &args.filter, args.min_branch_length),
    )?;
    info!(
        "Wrote {} and {}",
        args.tree_file.display(),
        args.graphviz_file.display()
    );

    Ok(tree)
}
