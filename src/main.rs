use anyhow::{anyhow, Context};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use questkit::api::RpcClient;
use questkit::config::Config;
use questkit::events::Event;
use questkit::feeds::blocks;
use questkit::quest::{ActionStatus, Breakdown, CountdownHandle, Quest, QuestContext, Submission, SystemClock};
use questkit::state::{format_amount, QueryCache};

const USAGE: &str = "usage: questkit [config.toml] [claim <quest-id>]";

struct Args {
    config_path: String,
    claim: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let claim = match args.iter().position(|a| a == "claim") {
        Some(i) => {
            let id = args.get(i + 1).cloned().ok_or_else(|| anyhow!(USAGE))?;
            args.drain(i..=i + 1);
            Some(id)
        }
        None => None,
    };
    if args.len() > 1 {
        return Err(anyhow!(USAGE));
    }
    Ok(Args {
        config_path: args.pop().unwrap_or_else(|| "config.toml".to_string()),
        claim,
    })
}

async fn print_quest(quest: &Quest) {
    let eligibility = quest.eligibility().await;
    println!("\n{} ({})", quest.config().title, quest.id());
    for criterion in &eligibility.criteria {
        println!("  {:<16} {:?}", criterion.name, criterion.state);
    }
    println!(
        "  progress {:.0}%  gate {:?}",
        eligibility.progress_percentage,
        eligibility.gate()
    );
    if let Some(reward) = quest.reward().await {
        println!("  reward {}", format_amount(reward, 2));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let cfg = Config::load(&args.config_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(quests = cfg.quests.len(), rpc = %cfg.network.rpc_url, "loaded config");

    let rpc = Arc::new(
        RpcClient::connect(&cfg.network, cfg.credentials.private_key.as_deref())
            .context("failed to connect")?,
    );
    rpc.verify_chain().await.context("wrong network")?;

    // Create the event channel
    let (tx, mut rx) = mpsc::channel::<Event>(256);

    let cache = Arc::new(QueryCache::new(cfg.cache.stale_time()).with_events(tx.clone()));
    let ctx = QuestContext::new(rpc.clone(), rpc, cache.clone(), Arc::new(SystemClock)).with_events(tx.clone());
    match ctx.account() {
        Some(account) => info!(%account, "wallet connected"),
        None => warn!("no private key, running read-only"),
    }

    let settings = cfg.quest_settings();
    let quests: Vec<Quest> = cfg
        .quests
        .iter()
        .cloned()
        .map(|q| Quest::new(q, ctx.clone(), settings))
        .collect();

    // Start feeds
    if let Some(url) = cfg.network.ws_url.clone() {
        blocks::spawn(url, tx.clone());
    }
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(Event::Shutdown).await;
        }
    });

    let mut countdowns: Vec<CountdownHandle> = Vec::with_capacity(quests.len());
    for quest in &quests {
        print_quest(quest).await;
        let handle = quest.countdown().await;
        if handle.is_running() {
            println!("  next in {}", handle.breakdown());
        }
        countdowns.push(handle);
    }

    let claiming = match &args.claim {
        Some(id) => {
            let quest = quests
                .iter()
                .find(|q| q.id() == id)
                .ok_or_else(|| anyhow!("unknown quest {}", id))?;
            match quest.claim().await {
                Submission::Started(_) => println!("\nSubmitting {}...", id),
                Submission::Skipped(reason) => {
                    println!("\nNot submitted: {:?}", reason);
                    return Ok(());
                }
            }
            Some(id.clone())
        }
        None => None,
    };

    // Main event loop
    println!("\nWatching... (Ctrl+C to quit)\n");
    while let Some(event) = rx.recv().await {
        match event {
            Event::NewBlock { number } => {
                let marked = match ctx.account() {
                    Some(account) => cache.invalidate_where(|key| key.is_for(account)),
                    None => 0,
                };
                debug!(number, marked, "new block");
            }
            Event::CountdownTick { quest, remaining } => {
                if remaining % 60 == 0 || remaining <= 10 {
                    println!("{} unlocks in {}", quest, Breakdown::from_secs(remaining));
                }
            }
            Event::CountdownExpired { quest: id } => {
                println!("{} is available", id);
                if let Some(i) = quests.iter().position(|q| q.id() == id) {
                    print_quest(&quests[i]).await;
                    let deadline = quests[i].deadline().await;
                    countdowns[i].set_deadline(deadline);
                }
            }
            Event::ActionStatus { quest, status } => {
                match &status {
                    ActionStatus::Pending => println!("{}: pending", quest),
                    ActionStatus::Success { tx_hash } => println!("{}: confirmed {}", quest, tx_hash),
                    ActionStatus::Error { message } => println!("{}: failed: {}", quest, message),
                    ActionStatus::Idle => debug!(%quest, "idle"),
                }
                let settled = matches!(status, ActionStatus::Success { .. } | ActionStatus::Error { .. });
                if settled && claiming.as_deref() == Some(quest.as_str()) {
                    break;
                }
            }
            Event::Invalidated { keys } => {
                debug!(count = keys.len(), "snapshots invalidated");
            }
            Event::Shutdown => {
                println!("Shutting down...");
                break;
            }
        }
    }
    Ok(())
}
