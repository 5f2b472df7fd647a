//! ParFlow CLI — run, export and execute map-reduce jobs over execution trees.
//!
//! Commands:
//! - `demo-data` — write a small synthetic classification dataset directory
//! - `run` — build the demo workflow and run it with the local engine
//! - `export` — persist the demo workflow and write keys files, `bash_jobs.sh`
//!   and `workflow.json` for an external scheduler
//! - `mapper` — execute one exported partition
//! - `reducer` — reload the full tree, reduce it and write `results.json`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parflow_core::data::{Matrix, FEATURES, TARGET};
use parflow_core::estimators::{NearestCentroid, SignClassifier};
use parflow_core::reduce::{ClassificationReport, PvalPermutations};
use parflow_core::splitter::{CvConfig, CvKind, PermConfig};
use parflow_core::{DataFlow, OutputValue, Registry, ResultSet, Tree, Workflow};
use parflow_runner::export::ExportPaths;
use parflow_runner::reducer::single_root;
use parflow_runner::{
    export, load_dataset, reduce_phase, run_mapper, save_dataset, write_results, EngineConfig,
    LocalEngine,
};

#[derive(Parser)]
#[command(name = "parflow", about = "ParFlow CLI — parallel execution trees with map-reduce")]
struct Cli {
    /// Engine configuration TOML. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic two-class dataset (X.csv, y.csv).
    DemoData {
        /// Output dataset directory.
        #[arg(long, default_value = "dataset")]
        datasets: PathBuf,

        /// Rows per class.
        #[arg(long, default_value_t = 20)]
        rows_per_class: usize,
    },
    /// Run the demo workflow with the local worker pool.
    Run {
        #[arg(long, default_value = "dataset")]
        datasets: PathBuf,

        #[command(flatten)]
        demo: DemoArgs,

        /// Overrides `num_workers` from the config.
        #[arg(long)]
        workers: Option<usize>,

        /// Overrides the store root from the config.
        #[arg(long)]
        treedir: Option<PathBuf>,

        /// Where results.json is written.
        #[arg(long, default_value = "results")]
        outdir: PathBuf,
    },
    /// Export the demo workflow as independent map jobs plus one reduce job.
    Export {
        #[arg(long, default_value = "dataset")]
        datasets: PathBuf,

        #[command(flatten)]
        demo: DemoArgs,

        /// Directory for keys files, bash_jobs.sh and workflow.json.
        #[arg(long, default_value = "jobs")]
        jobs_dir: PathBuf,

        #[arg(long, default_value = "parflow_tree")]
        treedir: PathBuf,

        #[arg(long, default_value = "results")]
        outdir: PathBuf,

        /// Program name written into the job commands.
        #[arg(long, default_value = "parflow")]
        program: String,
    },
    /// Execute one partition of an exported tree.
    Mapper {
        #[arg(long)]
        datasets: PathBuf,

        #[arg(long)]
        keysfile: PathBuf,

        #[arg(long)]
        treedir: PathBuf,
    },
    /// Reduce an exported tree once every mapper has finished.
    Reducer {
        #[arg(long)]
        treedir: PathBuf,

        #[arg(long)]
        outdir: PathBuf,

        /// Stored root to reduce. Required only when the store holds several.
        #[arg(long)]
        root_key: Option<String>,
    },
}

/// Shape of the demo workflow: [Perm >] CV > Methods(sign, centroid).
#[derive(clap::Args)]
struct DemoArgs {
    /// Cross-validation folds.
    #[arg(long, default_value_t = 5)]
    folds: usize,

    /// Permutations wrapped around the cross-validation (0 = none).
    #[arg(long, default_value_t = 0)]
    perms: usize,

    /// Seed for fold shuffles and permutations.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Overrides `num_partitions` from the config.
    #[arg(long)]
    partitions: Option<usize>,
}

impl DemoArgs {
    fn workflow(&self) -> Workflow {
        let mut cv = CvConfig::new(self.folds, CvKind::Stratified);
        cv.seed = self.seed;
        let cv = Workflow::cv(
            Workflow::methods([
                Workflow::estimator(SignClassifier::default()),
                Workflow::estimator(NearestCentroid::default()),
            ]),
            cv,
        )
        .with_reducer(ClassificationReport);
        if self.perms == 0 {
            return cv;
        }
        let mut perm = PermConfig::new(self.perms);
        perm.seed = self.seed;
        Workflow::perms(cv, perm).with_reducer(PvalPermutations)
    }

    fn tree(&self) -> Result<Tree> {
        Tree::build(&self.workflow()).context("building demo workflow")
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::DemoData {
            datasets,
            rows_per_class,
        } => run_demo_data(&datasets, rows_per_class),
        Commands::Run {
            datasets,
            demo,
            workers,
            treedir,
            outdir,
        } => run_local(config, &datasets, &demo, workers, treedir, &outdir),
        Commands::Export {
            datasets,
            demo,
            jobs_dir,
            treedir,
            outdir,
            program,
        } => {
            let paths = ExportPaths {
                program,
                datasets,
                jobs_dir,
                treedir,
                outdir,
            };
            run_export(config, &demo, &paths)
        }
        Commands::Mapper {
            datasets,
            keysfile,
            treedir,
        } => run_mapper_cmd(config, &datasets, &keysfile, &treedir),
        Commands::Reducer {
            treedir,
            outdir,
            root_key,
        } => run_reducer_cmd(config, &treedir, &outdir, root_key.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Two noisy clusters around (+1, +1) and (-1, -1).
fn demo_data(rows_per_class: usize) -> Result<DataFlow> {
    let mut rows = Vec::with_capacity(rows_per_class * 2);
    let mut target = Vec::with_capacity(rows_per_class * 2);
    for (label, centre) in [(1.0, 1.0), (-1.0, -1.0)] {
        for i in 0..rows_per_class {
            let jitter = ((i * 7 % 11) as f64 - 5.0) / 10.0;
            rows.push(vec![centre + jitter, centre - jitter / 2.0]);
            target.push(label);
        }
    }
    Ok(DataFlow::new()
        .with(FEATURES, Matrix::from_rows(rows)?)
        .with(TARGET, target))
}

fn run_demo_data(dir: &Path, rows_per_class: usize) -> Result<()> {
    let data = demo_data(rows_per_class)?;
    save_dataset(dir, &data).with_context(|| format!("writing dataset {}", dir.display()))?;
    println!("Dataset written to: {}", dir.display());
    Ok(())
}

fn run_local(
    mut config: EngineConfig,
    datasets: &Path,
    demo: &DemoArgs,
    workers: Option<usize>,
    treedir: Option<PathBuf>,
    outdir: &Path,
) -> Result<()> {
    if let Some(partitions) = demo.partitions {
        config.num_partitions = partitions;
    }
    if let Some(workers) = workers {
        config.num_workers = workers;
    }
    if let Some(root) = treedir {
        config.store = config.store.at(root);
    }

    let data = load_dataset(datasets)
        .with_context(|| format!("loading dataset {}", datasets.display()))?;
    let tree = demo.tree()?;
    let store = config.store.open().context("opening store")?;
    let engine = LocalEngine::new(config)?;
    let run = engine.run(&tree, &data, &store).context("local run failed")?;

    print_results(&run.artifact.results);
    let path = write_results(outdir, &run.artifact)?;
    println!("Results saved to: {}", path.display());
    Ok(())
}

fn run_export(config: EngineConfig, demo: &DemoArgs, paths: &ExportPaths) -> Result<()> {
    let partitions = demo.partitions.unwrap_or(config.num_partitions);
    let tree = demo.tree()?;
    let report = export(&tree, partitions, paths, &config.store).context("export failed")?;
    println!(
        "Exported {} map jobs and 1 reduce job:",
        report.keys_files.len()
    );
    println!("  script:     {}", report.script.display());
    println!("  task graph: {}", report.graph_file.display());
    Ok(())
}

fn run_mapper_cmd(config: EngineConfig, datasets: &Path, keysfile: &Path, treedir: &Path) -> Result<()> {
    let store = config
        .store
        .at(treedir)
        .open()
        .with_context(|| format!("opening store {}", treedir.display()))?;
    let report = run_mapper(datasets, keysfile, &store, &Registry::with_builtins(), &config.ops)
        .with_context(|| format!("mapper for {} failed", keysfile.display()))?;
    info!(index = report.index, leaves = report.leaves, outputs = report.outputs, "mapper finished");
    Ok(())
}

fn run_reducer_cmd(config: EngineConfig, treedir: &Path, outdir: &Path, root_key: Option<&str>) -> Result<()> {
    let store = config
        .store
        .at(treedir)
        .open()
        .with_context(|| format!("opening store {}", treedir.display()))?;
    let root_key = match root_key {
        Some(key) => key.to_string(),
        None => single_root(&store).context("resolving stored root")?,
    };
    let (_, artifact) = reduce_phase(&store, &Registry::with_builtins(), Some(&root_key))
        .context("reduce phase failed")?;
    print_results(&artifact.results);
    let path = write_results(outdir, &artifact)?;
    println!("Results saved to: {}", path.display());
    Ok(())
}

fn print_results(results: &ResultSet) {
    for entry in results.iter() {
        println!("{}  ({} leaves)", entry.key, entry.contributors.len());
        for (name, value) in &entry.outputs {
            if let OutputValue::Scalar(v) = value {
                println!("  {name:<16} {v:.4}");
            }
        }
    }
}
