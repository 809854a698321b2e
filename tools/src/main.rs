//! bandit-runner: headless driver for the retention offer bandit.
//!
//! Usage:
//!   bandit-runner --seed 12345 --tenants 3 --events 2000 --db run.db
//!   bandit-runner --db run.db --ipc-mode

mod synthetic;

use anyhow::Result;
use retention_core::{
    config::RetentionConfig,
    engine::RetentionEngine,
    reward::{Feedback, UserResponse},
    store::SqliteStore,
};
use std::env;
use std::io::{self, BufRead, Write};
use synthetic::SyntheticPopulation;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Select {
        tenant: String,
    },
    Outcome {
        tenant:          String,
        #[serde(default)]
        presentation_id: Option<uuid::Uuid>,
        arm_id:          String,
        response:        UserResponse,
        mrr_value:       f64,
    },
    Metrics {
        tenant: String,
    },
    Decay {
        tenant: String,
        #[serde(default)]
        rate:   Option<f64>,
    },
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let tenants = parse_arg(&args, "--tenants", 3usize);
    let events = parse_arg(&args, "--events", 2_000u64);
    let decay_every = parse_arg(&args, "--decay-every", 0u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    let mut config = RetentionConfig::load(data_dir)?;
    config.master_seed = parse_arg(&args, "--seed", config.master_seed);
    if decay_every > 0 {
        config.params.decay_every = Some(decay_every);
    }

    if !ipc_mode {
        println!("Retention bandit runner");
        println!("  seed:      {}", config.master_seed);
        println!("  tenants:   {tenants}");
        println!("  events:    {events}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let store = SqliteStore::open(db)?;
    store.migrate()?;
    let engine = RetentionEngine::new(config, store)?;

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        let tenant_ids: Vec<String> = (1..=tenants).map(|i| format!("tenant-{i}")).collect();
        for tenant in &tenant_ids {
            run_tenant(&engine, tenant, events)?;
        }
        print_summary(&engine, &tenant_ids)?;
    }

    Ok(())
}

fn run_tenant(engine: &RetentionEngine<SqliteStore>, tenant: &str, events: u64) -> Result<()> {
    let mut population = SyntheticPopulation::new(engine.arms(), engine.config().master_seed, tenant);
    for _ in 0..events {
        let offer = engine.select_offer(tenant)?;
        let response = population.respond(&offer.arm);
        let feedback = Feedback::new(offer.arm.id.clone(), response, population.mrr())
            .for_presentation(offer.presentation_id);
        engine.record_outcome(tenant, &feedback)?;
    }
    log::info!("runner: tenant={tenant} completed {events} events");
    Ok(())
}

fn run_ipc_loop(engine: &RetentionEngine<SqliteStore>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Select { tenant } => engine
                .select_offer(&tenant)
                .map(|offer| serde_json::to_value(offer)),
            IpcCommand::Outcome { tenant, presentation_id, arm_id, response, mrr_value } => {
                let feedback = Feedback {
                    presentation_id,
                    arm_id,
                    response,
                    mrr_value,
                };
                engine
                    .record_outcome(&tenant, &feedback)
                    .map(|receipt| serde_json::to_value(receipt))
            }
            IpcCommand::Metrics { tenant } => engine
                .metrics(&tenant)
                .map(|m| serde_json::to_value(m)),
            IpcCommand::Decay { tenant, rate } => {
                let rate = rate.unwrap_or(engine.config().params.decay_rate);
                engine
                    .decay_epsilon(&tenant, rate)
                    .map(|eps| Ok(serde_json::json!({ "epsilon": eps })))
            }
        };

        let json = match reply {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("runner: command failed: {e}");
                serde_json::json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{json}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn print_summary(engine: &RetentionEngine<SqliteStore>, tenants: &[String]) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    for tenant in tenants {
        let metrics = engine.metrics(tenant)?;
        println!();
        println!("  {tenant}");
        println!("    selections:     {}", metrics.total_selections);
        println!("    avg reward:     {:.4}", metrics.average_reward);
        println!("    epsilon:        {:.4}", metrics.epsilon);
        if let Some(best) = metrics.best_arm() {
            println!("    best arm:       {} (Q={:.4})", best.arm_id, best.value_estimate);
        }

        let outcomes = engine.store().arm_outcome_summary(tenant)?;
        for arm in &metrics.arms {
            let summary = outcomes.iter().find(|o| o.arm_id == arm.arm_id);
            let (rate, retained) = summary
                .map(|s| (s.acceptance_rate(), s.mrr_retained))
                .unwrap_or((0.0, 0.0));
            println!(
                "    {:<16} {:<16} n={:<6} Q={:>8.4} accept={:>5.1}% retained=${:.0}",
                arm.arm_id,
                arm.category.as_str(),
                arm.count,
                arm.value_estimate,
                rate * 100.0,
                retained
            );
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
