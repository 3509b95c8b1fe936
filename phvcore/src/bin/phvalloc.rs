use phvcore::*;
use phvcore::{
    algo::{allocate_all, AllocEnv},
    problem::{read_from_path, PhvTextParser},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Packs program fields into hardware containers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to input
    #[arg(short, long, value_parser = clap::value_parser!(PathBuf))]
    input:          PathBuf,

    /// Run the trivial allocator only (endless device, max packing)
    #[arg(long)]
    trivial:        bool,

    /// DFS step budget per super cluster and container group
    #[arg(long, default_value_t = 4096)]
    #[arg(value_parser = clap::value_parser!(usize))]
    max_steps:      usize,

    /// Slicing variants tried per super cluster
    #[arg(long, default_value_t = 8)]
    #[arg(value_parser = clap::value_parser!(usize))]
    max_slicings:   usize,

    /// Stop scanning a group at the first fitting empty normal container
    #[arg(long)]
    early_stop:     bool,

    /// How strictly actions are checked
    #[arg(short, long, value_enum, default_value_t = ActionCheckMode::Strict)]
    mode:           ActionCheckMode,

    /// Log filter, overridden by RUST_LOG
    #[arg(short, long, default_value = "warn")]
    log_level:      String,
}

fn main() -> anyhow::Result<()> {
    let cli = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let input_path = cli.input;
    anyhow::ensure!(input_path.is_file(), "Invalid input path: {}", input_path.display());
    let mut problem = read_from_path::<PhvTextParser>(input_path)?;

    let mut env = AllocEnv::new(&problem.device, &problem.actions);
    env.config = if cli.trivial {
        AllocConfig::trivial()
    } else {
        AllocConfig::default()
    };
    env.config.max_dfs_steps = cli.max_steps;
    env.config.max_slicings = cli.max_slicings;
    env.config.early_stop_on_empty_normal |= cli.early_stop;
    env.config.action_mode = cli.mode;

    let total_start = Instant::now();
    let report = allocate_all(&mut problem.phv, &env, problem.clusters);
    let elapsed = total_start.elapsed().as_micros();

    let phv = &problem.phv;
    for (c, st) in report.allocation.containers() {
        let used = st.used_bits();
        let contents = st.slices
            .iter()
            .sorted_by_key(|a| a.container_range.lo)
            .map(|a| format!("{}{}", phv.fmt_slice(&a.slice), a.container_range))
            .join(" ");
        println!("{:>6} {used:>2}/{:<2} {contents}", c.to_string(), c.width());
    }
    for (id, e) in &report.errors {
        println!("Super cluster {id} failed:\n{e}");
    }
    println!("{}", report.metrics);
    println!("Total allocation time: {} μs", elapsed);

    anyhow::ensure!(report.is_complete(), "{} super clusters were not allocated", report.errors.len());

    Ok(())
}
