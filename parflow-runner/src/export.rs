//! Distributed export: persist the tree, write one keys file per unit of
//! work, and describe the map tasks plus the final reduce task both as a
//! shell script and as a JSON task graph for an external scheduler.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use parflow_core::store::{save_tree, Store};
use parflow_core::Tree;

use crate::config::StoreConfig;
use crate::error::EngineError;
use crate::partition::{split, write_keys_file};

pub const SCRIPT_FILE: &str = "bash_jobs.sh";
pub const GRAPH_FILE: &str = "workflow.json";
pub const REDUCE_TASK: &str = "reduce";

/// One schedulable command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Program and arguments, unquoted.
    pub argv: Vec<String>,
    pub depends_on: Vec<String>,
}

/// Map tasks depend on nothing; the reduce task depends on every map task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn map_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.tasks.iter().filter(|t| t.name != REDUCE_TASK)
    }
}

/// Locations baked into the exported commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Binary invoked by every task.
    pub program: String,
    /// Dataset directory read by mappers.
    pub datasets: PathBuf,
    /// Where keys files, the script and the task graph are written.
    pub jobs_dir: PathBuf,
    /// Store root shared by all tasks.
    pub treedir: PathBuf,
    /// Where the reducer writes its results.
    pub outdir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub keys_files: Vec<PathBuf>,
    pub script: PathBuf,
    pub graph_file: PathBuf,
    pub graph: TaskGraph,
}

pub fn task_name(index: usize) -> String {
    format!("map_{index}")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mapper_argv(paths: &ExportPaths, keys_file: &Path) -> Vec<String> {
    vec![
        paths.program.clone(),
        "mapper".into(),
        "--datasets".into(),
        path_arg(&paths.datasets),
        "--keysfile".into(),
        path_arg(keys_file),
        "--treedir".into(),
        path_arg(&paths.treedir),
    ]
}

fn reducer_argv(paths: &ExportPaths) -> Vec<String> {
    vec![
        paths.program.clone(),
        "reducer".into(),
        "--treedir".into(),
        path_arg(&paths.treedir),
        "--outdir".into(),
        path_arg(&paths.outdir),
    ]
}

/// POSIX single-quote a word.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn command_line(argv: &[String]) -> String {
    argv.iter().map(|w| shell_quote(w)).collect::<Vec<_>>().join(" ")
}

/// Render the graph as a bash script: every map task in the background,
/// wait on each (failing fast on the first error), then the reduce task.
pub fn render_script(graph: &TaskGraph) -> String {
    let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n\npids=()\n");
    for task in graph.map_tasks() {
        script.push_str(&format!("{} &\npids+=($!)\n", command_line(&task.argv)));
    }
    script.push_str("for pid in \"${pids[@]}\"; do\n    wait \"$pid\"\ndone\n\n");
    if let Some(reduce) = graph.task(REDUCE_TASK) {
        script.push_str(&command_line(&reduce.argv));
        script.push('\n');
    }
    script
}

/// Export `tree` for distributed execution.
///
/// The store at `paths.treedir` is wiped and receives the full tree without
/// outputs; each mapper then only adds its own partition's outputs.
#[instrument(skip(tree, store_config), fields(treedir = %paths.treedir.display()))]
pub fn export(
    tree: &Tree,
    num_partitions: usize,
    paths: &ExportPaths,
    store_config: &StoreConfig,
) -> Result<ExportReport, EngineError> {
    let units = split(tree, num_partitions)?;

    let store = store_config.at(&paths.treedir).open()?;
    store.clear()?;
    let mut clean = tree.clone();
    clean.clear_map_outputs();
    save_tree(&clean, &store)?;

    let mut keys_files = Vec::with_capacity(units.len());
    let mut tasks = Vec::with_capacity(units.len() + 1);
    for unit in &units {
        let keys_file = write_keys_file(&paths.jobs_dir, unit)?;
        tasks.push(Task {
            name: task_name(unit.index),
            argv: mapper_argv(paths, &keys_file),
            depends_on: Vec::new(),
        });
        keys_files.push(keys_file);
    }
    let depends_on = tasks.iter().map(|t| t.name.clone()).collect();
    tasks.push(Task {
        name: REDUCE_TASK.into(),
        argv: reducer_argv(paths),
        depends_on,
    });
    let graph = TaskGraph { tasks };

    let script = paths.jobs_dir.join(SCRIPT_FILE);
    fs::write(&script, render_script(&graph)).map_err(EngineError::io(&script))?;
    let graph_file = paths.jobs_dir.join(GRAPH_FILE);
    let json = serde_json::to_vec_pretty(&graph).map_err(EngineError::json(&graph_file))?;
    fs::write(&graph_file, json).map_err(EngineError::io(&graph_file))?;

    info!(partitions = units.len(), "exported task graph");
    Ok(ExportReport {
        keys_files,
        script,
        graph_file,
        graph,
    })
}

pub fn read_graph(path: &Path) -> Result<TaskGraph, EngineError> {
    let bytes = fs::read(path).map_err(EngineError::io(path))?;
    serde_json::from_slice(&bytes).map_err(EngineError::json(path))
}
