//! rangescan CLI — inspect and manage scanner state.
//!
//! Usage:
//! ```bash
//! rangescan status --db ./scan.db --stream pool-1
//! rangescan gaps   --db ./scan.db --stream pool-1
//! rangescan reset  --db ./scan.db --stream pool-1
//! rangescan info
//! ```

use std::env;
use std::process;

use rangescan_core::checkpoint::CheckpointStore;
use rangescan_storage::sqlite::SqliteStorage;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "status" => cmd_status(&args).await,
        "gaps" => cmd_gaps(&args).await,
        "reset" => cmd_reset(&args).await,
        "version" | "--version" | "-V" => {
            println!("rangescan {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("rangescan {}", env!("CARGO_PKG_VERSION"));
    println!("Checkpointed, partitioned block-range scanner\n");
    println!("USAGE:");
    println!("    rangescan <COMMAND> [--db <path>] [--stream <name>]\n");
    println!("COMMANDS:");
    println!("    status   Show per-worker checkpoint state for a stream");
    println!("    gaps     List recorded coverage gaps for a stream");
    println!("    reset    Delete all checkpoints, records, and gaps of a stream");
    println!("    info     Show Rangescan configuration info");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("Rangescan v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chunk size: 2000 blocks/fetch");
    println!("  Default batch size: 10000 blocks/tick");
    println!("  Default worker count: 4");
    println!("  Default scan interval: 5000 ms");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Sources: EVM JSON-RPC (eth_getLogs)");
}

/// Pull the value following a `--flag` argument.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn required_flags<'a>(args: &'a [String]) -> Result<(&'a str, &'a str), String> {
    let db = flag_value(args, "--db").ok_or("missing --db <path>")?;
    let stream = flag_value(args, "--stream").ok_or("missing --stream <name>")?;
    Ok((db, stream))
}

async fn cmd_status(args: &[String]) -> Result<(), String> {
    let (db, stream) = required_flags(args)?;
    let store = SqliteStorage::open(db).await.map_err(|e| e.to_string())?;

    let checkpoints = store.list(stream).await.map_err(|e| e.to_string())?;
    if checkpoints.is_empty() {
        println!("No checkpoints for stream '{stream}'");
        return Ok(());
    }

    println!("Stream '{stream}' — {} worker(s)", checkpoints.len());
    for cp in &checkpoints {
        let end = cp
            .range_end
            .map(|b| b.to_string())
            .unwrap_or_else(|| "head".into());
        println!(
            "  worker {:>2}  [{} .. {})  at {}  {}  events={} entities={}",
            cp.worker_id,
            cp.range_start,
            end,
            cp.last_indexed_block,
            cp.status,
            cp.total_events_indexed,
            cp.total_entities_found,
        );
        if let Some(err) = &cp.last_error {
            println!("             last error: {err}");
        }
    }

    let gaps = store.gaps(stream).await.map_err(|e| e.to_string())?;
    if !gaps.is_empty() {
        println!("  {} coverage gap(s) recorded (see `rangescan gaps`)", gaps.len());
    }
    Ok(())
}

async fn cmd_gaps(args: &[String]) -> Result<(), String> {
    let (db, stream) = required_flags(args)?;
    let store = SqliteStorage::open(db).await.map_err(|e| e.to_string())?;

    let gaps = store.gaps(stream).await.map_err(|e| e.to_string())?;
    if gaps.is_empty() {
        println!("No coverage gaps for stream '{stream}'");
        return Ok(());
    }

    println!("Stream '{stream}' — {} gap(s)", gaps.len());
    for gap in &gaps {
        println!(
            "  worker {:>2}  blocks {}..={}  {}  ({})",
            gap.worker_id, gap.from_block, gap.to_block, gap.reason, gap.recorded_at
        );
    }
    Ok(())
}

async fn cmd_reset(args: &[String]) -> Result<(), String> {
    let (db, stream) = required_flags(args)?;
    let store = SqliteStorage::open(db).await.map_err(|e| e.to_string())?;

    store.reset_stream(stream).await.map_err(|e| e.to_string())?;
    println!("Stream '{stream}' reset");
    Ok(())
}
