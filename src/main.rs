use clap::{Args, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use rust_python_tree_topology::consensus::{ConsensusConfig, decorate_support, majority_consensus};
use rust_python_tree_topology::distances::{Metric, pairwise_matrix, snapshots_for};
use rust_python_tree_topology::error::{Error, Result};
use rust_python_tree_topology::io::{read_matrix_tsv, read_newick_trees, write_matrix_tsv};
use rust_python_tree_topology::newick;
use rust_python_tree_topology::nj::{NjConfig, add_lengths_to_topology, neighbor_joining};
use rust_python_tree_topology::topology::Topology;
use rust_python_tree_topology::tree::{Ladder, Tree};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Build, compare and edit phylogenetic trees in Newick format.
#[derive(Parser, Debug)]
#[command(name = "tree-topology", version, about = "Phylogenetic tree building, comparison and editing")]
struct Cli {
    /// Quiet mode: only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pairwise distance matrix (TSV) between all trees of the input files
    Distances(DistancesArgs),
    /// Neighbor-joining tree from a labeled TSV matrix
    Nj(NjArgs),
    /// Majority-rule consensus of a set of trees
    Consensus(ConsensusArgs),
    /// Write replicate support percentages onto a target tree
    Support(SupportArgs),
    /// Reroot a tree on an outgroup or at its midpoint
    Reroot(RerootArgs),
    /// Dump a tree as JSON for plotting
    Json(JsonArgs),
}

#[derive(Args, Debug)]
struct DistancesArgs {
    /// Newick tree files (plain or .gz), one or more trees each
    #[arg(short = 'i', long = "input", required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output path for TSV distance matrix (.gz for compressed)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Distance metric to compute
    #[arg(long = "metric", value_enum, default_value_t = MetricArg::Rf)]
    metric: MetricArg,

    /// Divide each tree's lengths by its longest branch (branch-score only)
    #[arg(long = "normalize", default_value_t = false)]
    normalize: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricArg {
    Rf,
    Weighted,
    Kf,
    BranchScore,
}

#[derive(Args, Debug)]
struct NjArgs {
    /// Labeled square matrix as written by the distances command
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Values are similarities, converted with max_diagonal - value
    #[arg(long = "similarity", default_value_t = false, conflicts_with = "raw_similarity")]
    similarity: bool,

    /// Values are similarities joined as they are (largest Q first)
    #[arg(long = "raw-similarity", default_value_t = false)]
    raw_similarity: bool,

    /// Only fit branch lengths onto the first tree of this file
    #[arg(long = "topology")]
    topology: Option<PathBuf>,

    /// Output Newick path; stdout when omitted
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConsensusArgs {
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Keep splits found in more than this fraction of the trees
    #[arg(short = 't', long = "threshold", default_value_t = 0.5)]
    threshold: f64,

    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SupportArgs {
    /// Tree to decorate (first tree of the file)
    #[arg(long = "target")]
    target: PathBuf,

    /// Replicate trees, e.g. bootstrap trees
    #[arg(long = "replicates")]
    replicates: PathBuf,

    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RerootArgs {
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Comma-separated outgroup taxa
    #[arg(long = "outgroup", value_delimiter = ',', required_unless_present = "midpoint")]
    outgroup: Vec<String>,

    /// Root at the midpoint of the longest leaf-to-leaf path
    #[arg(long = "midpoint", default_value_t = false, conflicts_with = "outgroup")]
    midpoint: bool,

    /// Ladderize the rerooted tree, larger clades first
    #[arg(long = "ladderize", default_value_t = false)]
    ladderize: bool,

    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct JsonArgs {
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command) {
        error!("{e}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &Error) -> i32 {
    match e {
        Error::Io(_) => 4,
        Error::Parse(_) | Error::Format { .. } => 2,
        Error::Matrix(_) | Error::Structural(_) | Error::Json(_) => 3,
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Distances(args) => distances(args),
        Command::Nj(args) => nj(args),
        Command::Consensus(args) => consensus(args),
        Command::Support(args) => support(args),
        Command::Reroot(args) => reroot(args),
        Command::Json(args) => json(args),
    }
}

/// Writes `text` plus a newline to `output`, or to stdout.
fn emit(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, format!("{text}\n"))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn first_tree(path: &Path) -> Result<Topology> {
    read_newick_trees(path)?.into_iter().next().ok_or_else(|| Error::Format {
        path: path.display().to_string(),
        message: "no tree found".into(),
    })
}

fn distances(args: DistancesArgs) -> Result<()> {
    let t0 = Instant::now();
    let mut names = Vec::new();
    let mut trees = Vec::new();
    for path in &args.input {
        let base_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.trim_end_matches(".gz"))
            .unwrap_or("unknown");
        for (idx, tree) in read_newick_trees(path)?.into_iter().enumerate() {
            names.push(format!("{base_name}_tree{idx}"));
            trees.push(tree);
        }
    }
    if trees.is_empty() {
        return Err(Error::Format {
            path: args.input.iter().map(|p| p.display()).join(","),
            message: "no trees parsed".into(),
        });
    }
    info!("Read {} trees in {:.3}s", trees.len(), t0.elapsed().as_secs_f64());

    let metric = match args.metric {
        MetricArg::Rf => Metric::RobinsonFoulds,
        MetricArg::Weighted => Metric::WeightedRobinsonFoulds,
        MetricArg::Kf => Metric::KuhnerFelsenstein,
        MetricArg::BranchScore => Metric::BranchScore {
            normalize: args.normalize,
        },
    };

    let t1 = Instant::now();
    let snaps = snapshots_for(&trees, metric.snapshot_options());
    info!("Creating tree bit snapshots {:.3}s", t1.elapsed().as_secs_f64());

    let t2 = Instant::now();
    info!(
        "Determining distances using {metric:?} for {} combinations",
        names.len() * (names.len() - 1) / 2
    );
    let matrix = pairwise_matrix(&snaps, metric);
    info!("Determining distances using {metric:?} {:.3}s", t2.elapsed().as_secs_f64());

    let t3 = Instant::now();
    write_matrix_tsv(&args.output, &names, &matrix)?;
    info!("Writing to output {:.3}s", t3.elapsed().as_secs_f64());
    Ok(())
}

fn nj(args: NjArgs) -> Result<()> {
    let matrix = read_matrix_tsv(&args.input)?;
    let config = if args.similarity {
        NjConfig::similarity()
    } else if args.raw_similarity {
        NjConfig::raw_similarity()
    } else {
        NjConfig::default()
    };
    info!("Read {}x{} matrix", matrix.len(), matrix.len());

    let t0 = Instant::now();
    let tree = match &args.topology {
        Some(path) => add_lengths_to_topology(&first_tree(path)?, &matrix, &config)?,
        None => neighbor_joining(&matrix, &config),
    };
    info!("Neighbor joining {:.3}s", t0.elapsed().as_secs_f64());
    emit(args.output.as_deref(), &newick::format(&tree, true, true))
}

fn consensus(args: ConsensusArgs) -> Result<()> {
    let trees = read_newick_trees(&args.input)?;
    info!("Read {} trees", trees.len());
    let config = ConsensusConfig {
        threshold: args.threshold,
    };
    let tree = majority_consensus(&trees, &config)?;
    emit(args.output.as_deref(), &newick::format(&tree, false, true))
}

fn support(args: SupportArgs) -> Result<()> {
    let target = first_tree(&args.target)?;
    let replicates = read_newick_trees(&args.replicates)?;
    info!("Decorating with {} replicates", replicates.len());
    let decorated = decorate_support(&target, &replicates);
    emit(args.output.as_deref(), &newick::format(&decorated, true, true))
}

fn reroot(args: RerootArgs) -> Result<()> {
    let mut tree = Tree::new(first_tree(&args.input)?);
    if args.midpoint {
        tree.midpoint_root()?;
    } else {
        tree.set_outgroup(args.outgroup.as_slice())?;
    }
    if args.ladderize {
        tree.ladderize(Ladder::Descending)?;
    }
    emit(args.output.as_deref(), &tree.to_newick(true, true))
}

fn json(args: JsonArgs) -> Result<()> {
    let tree = Tree::new(first_tree(&args.input)?);
    emit(args.output.as_deref(), &tree.to_json()?)
}
