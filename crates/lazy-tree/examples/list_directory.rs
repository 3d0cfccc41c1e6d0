//! CLI example that lazily loads a directory and displays its hierarchy
//!
//! Usage:
//!   cargo run --example list_directory [path] [timeout-secs]
//!
//! If no path is provided, uses the current directory. The runner is chosen
//! with `LAZY_TREE_RUNNER` (thread, rayon, inline); set `RUST_LOG=debug` to
//! watch the load tasks.

use lazy_tree::prelude::*;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Prints the root load's progress as a percentage
struct RootProgress;

impl ProgressObserver for RootProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(percent) = event.percent() {
            print!("\r  root: {:>3}%", percent);
        }
    }

    fn on_complete(&self, status: &TaskStatus) {
        println!("  ({})", status);
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let path = if args.len() > 1 { &args[1] } else { "." };
    let timeout = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30));

    let runner = match RunnerOptions::from_env().build() {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error building runner: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("Loading directory: {}", path);
    println!();

    let tree = match FilesystemLoader::open(path, runner) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Error opening directory: {:#}", e);
            std::process::exit(1);
        }
    };

    // Watch the root load, giving up after the timeout
    let task = tree.load();
    task.fanout().attach(Arc::new(RootProgress));
    match task.wait_timeout(timeout) {
        Some(TaskStatus::Succeeded) => {}
        Some(status) => {
            eprintln!("Error loading root: {}", status);
            std::process::exit(1);
        }
        None => {
            task.cancel();
            eprintln!("Timed out after {:?}", timeout);
            std::process::exit(1);
        }
    }

    // Then the rest of the tree
    if let Err(e) = tree.load_recursive() {
        eprintln!("Error loading tree: {:#}", e);
        std::process::exit(1);
    }

    println!();
    println!("Directory Structure:");
    println!("═══════════════════════════════");
    println!();

    for node in tree.walk(TraversalOrder::PreOrder) {
        let indent = "  ".repeat(node.depth());
        let entry = node.value();
        match entry.kind {
            EntryKind::Directory => {
                println!("{}📁 {} ({} items)", indent, entry.name, node.child_count())
            }
            EntryKind::File => {
                println!("{}📄 {} ({})", indent, entry.name, format_size(entry.size))
            }
        }
    }

    let files = tree.find(|entry| !entry.is_dir());
    let total_size: u64 = files.iter().map(|n| n.value().size).sum();

    println!();
    println!("═══════════════════════════════");
    println!("Summary:");
    println!("  Total items: {}", tree.node_count());
    println!("  Directories: {}", tree.find(|entry| entry.is_dir()).len());
    println!("  Files: {}", files.len());
    println!("  Total size: {}", format_size(total_size));
}

/// Format file size in human-readable format
fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
