//! 离线生成残局库 JSON，供前端通过 `fetch` 加载。

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use number_battle_core::Tablebase;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "build_tablebase", about = "Build the number-battle endgame tablebase")]
struct Args {
    /// Where to write the JSON artifact.
    #[arg(short, long, default_value = "tablebase.json")]
    output: PathBuf,

    /// Pretty-print the JSON.
    #[arg(long)]
    pretty: bool,

    /// Skip the backward-induction consistency check.
    #[arg(long)]
    skip_verify: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let table = Tablebase::build();

    if !args.skip_verify {
        let violations = table.verify();
        if !violations.is_empty() {
            for violation in &violations {
                error!(%violation, "tablebase invariant violated");
            }
            return ExitCode::FAILURE;
        }
        info!("tablebase verified");
    }

    let json = if args.pretty {
        table.to_json_pretty()
    } else {
        table.to_json()
    };
    let json = match json {
        Ok(json) => json,
        Err(err) => {
            error!(%err, "failed to serialize tablebase");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = fs::write(&args.output, json) {
        error!(%err, path = %args.output.display(), "failed to write tablebase");
        return ExitCode::FAILURE;
    }

    let summary = table.summary();
    info!(
        path = %args.output.display(),
        entries = table.len(),
        wins = summary.wins,
        losses = summary.losses,
        draws = summary.draws,
        max_distance = summary.max_distance,
        "tablebase written"
    );
    ExitCode::SUCCESS
}
