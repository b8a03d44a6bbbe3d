//! Operator CLI for the copy-trading job queue.
//!
//! ```text
//! queue-ops stats
//! queue-ops peek --limit N
//! queue-ops replay --limit N [--reason R] [--source nack|reclaim] [--token T] [--dry-run] [--keep-attempt]
//! queue-ops purge --limit N | --all [--dry-run]
//! ```
//!
//! Connects to `REDIS_URL` with `QUEUE_PREFIX` and `QUEUE_MAX_SIZE` from the environment.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde::Serialize;

use polycopy::models::DlqSource;
use polycopy::queue::ops::{self, PurgeScope, ReplayOptions};
use polycopy::queue::redis_queue::DEFAULT_PREFIX;
use polycopy::queue::{JobQueue, QueueSettings, RedisQueue};

const USAGE: &str = "usage: queue-ops <stats | peek --limit N | replay --limit N [--reason R] [--source S] \
[--token T] [--dry-run] [--keep-attempt] | purge (--limit N | --all) [--dry-run]>";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Stats,
    Peek { limit: usize },
    Replay(ReplayArgs),
    Purge { scope: PurgeScope, dry_run: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ReplayArgs {
    limit: usize,
    reason: Option<String>,
    source: Option<DlqSource>,
    token: Option<String>,
    dry_run: bool,
    keep_attempt: bool,
}

impl From<ReplayArgs> for ReplayOptions {
    fn from(args: ReplayArgs) -> Self {
        ReplayOptions {
            limit: args.limit,
            reason: args.reason,
            source: args.source,
            token: args.token,
            dry_run: args.dry_run,
            keep_attempt: args.keep_attempt,
        }
    }
}

fn value<'a>(flag: &str, it: &mut impl Iterator<Item = &'a String>) -> anyhow::Result<&'a String> {
    it.next().ok_or_else(|| anyhow!("{flag} needs a value"))
}

fn limit<'a>(flag: &str, it: &mut impl Iterator<Item = &'a String>) -> anyhow::Result<usize> {
    let raw = value(flag, it)?;
    let n: usize = raw.parse().with_context(|| format!("{flag} expects a number, got {raw:?}"))?;
    if n == 0 {
        bail!("{flag} must be positive");
    }
    Ok(n)
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let (cmd, rest) = args.split_first().ok_or_else(|| anyhow!(USAGE))?;
    let mut it = rest.iter();

    match cmd.as_str() {
        "stats" => Ok(Command::Stats),
        "peek" => {
            let mut n = None;
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--limit" => n = Some(limit(flag, &mut it)?),
                    other => bail!("unknown peek flag {other}"),
                }
            }
            Ok(Command::Peek {
                limit: n.ok_or_else(|| anyhow!("peek requires --limit N"))?,
            })
        }
        "replay" => {
            let mut args = ReplayArgs::default();
            let mut n = None;
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--limit" => n = Some(limit(flag, &mut it)?),
                    "--reason" => args.reason = Some(value(flag, &mut it)?.clone()),
                    "--source" => {
                        let raw = value(flag, &mut it)?;
                        args.source = Some(raw.parse().map_err(|e| anyhow!("{e}"))?);
                    }
                    "--token" => args.token = Some(value(flag, &mut it)?.clone()),
                    "--dry-run" => args.dry_run = true,
                    "--keep-attempt" => args.keep_attempt = true,
                    other => bail!("unknown replay flag {other}"),
                }
            }
            args.limit = n.ok_or_else(|| anyhow!("replay requires --limit N"))?;
            Ok(Command::Replay(args))
        }
        "purge" => {
            let mut scope = None;
            let mut dry_run = false;
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--limit" => scope = Some(PurgeScope::Oldest(limit(flag, &mut it)?)),
                    "--all" => scope = Some(PurgeScope::All),
                    "--dry-run" => dry_run = true,
                    other => bail!("unknown purge flag {other}"),
                }
            }
            Ok(Command::Purge {
                scope: scope.ok_or_else(|| anyhow!("purge requires --limit N or --all"))?,
                dry_run,
            })
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let url = std::env::var("REDIS_URL").context("REDIS_URL must be set")?;
    let prefix = std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.into());
    let max_size = match std::env::var("QUEUE_MAX_SIZE") {
        Ok(raw) => raw.parse().context("QUEUE_MAX_SIZE")?,
        Err(_) => QueueSettings::default().max_size,
    };

    let backend = RedisQueue::connect(&url, &prefix).await?;
    let queue = JobQueue::new(
        Arc::new(backend),
        QueueSettings {
            max_size,
            ..QueueSettings::default()
        },
    );

    match command {
        Command::Stats => print_json(&queue.stats().await?),
        Command::Peek { limit } => print_json(&ops::peek(&queue, limit).await?),
        Command::Replay(args) => print_json(&ops::replay(&queue, &args.into()).await?),
        Command::Purge { scope, dry_run } => print_json(&ops::purge(&queue, scope, dry_run).await?),
    }
}
