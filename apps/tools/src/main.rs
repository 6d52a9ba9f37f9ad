use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use client_core::{
    AccessKeyLinks, HttpDataSource, InProcessDataSource, ListController, MutationSink, ViewModel,
};
use shared::{
    domain::{dynamic_access_key_url, AccessKeyId, DynamicAccessKeyId, LoadBalancerAlgorithm},
    pagination::DEFAULT_PAGE_SIZE,
    protocol::{AccessKeySummary, DynamicAccessKeyDraft, DynamicAccessKeySummary, NewAccessKey},
};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Manage dynamic access keys from the command line")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/dashboard.db")]
    database_url: String,
    /// Talk to a running server instead of opening the database directly.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert `count` keys named `<prefix>-NN`.
    Seed {
        #[arg(long, default_value_t = 25)]
        count: u32,
        #[arg(long, default_value = "key")]
        prefix: String,
    },
    Create(DraftArgs),
    Update {
        id: i64,
        #[command(flatten)]
        draft: DraftArgs,
    },
    Remove {
        id: i64,
    },
    /// Print one page of keys whose name contains `term`.
    List {
        #[arg(long, default_value = "")]
        term: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Page through keys interactively, reading commands from stdin.
    Browse {
        #[arg(long, default_value = "")]
        term: String,
    },
    /// Print the ssconf:// URL clients use to subscribe to a key.
    Url {
        id: i64,
        #[arg(long, default_value = "https://localhost")]
        origin: String,
    },
    AccessKeys {
        #[command(subcommand)]
        command: AccessKeyCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AccessKeyCommand {
    /// Access keys attached to a dynamic access key.
    List { dynamic_access_key_id: i64 },
    /// Access keys not attached to any dynamic access key.
    Unattached,
    Create {
        name: String,
        #[arg(long)]
        attach_to: Option<i64>,
    },
    Attach {
        dynamic_access_key_id: i64,
        access_key_id: i64,
    },
    Detach {
        dynamic_access_key_id: i64,
        access_key_id: i64,
    },
}

#[derive(Args, Debug)]
struct DraftArgs {
    name: String,
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long, value_parser = parse_algorithm, default_value = "user_ip_address")]
    algorithm: LoadBalancerAlgorithm,
    /// RFC 3339 timestamp after which the key stops working.
    #[arg(long)]
    expires_at: Option<DateTime<Utc>>,
}

impl From<DraftArgs> for DynamicAccessKeyDraft {
    fn from(args: DraftArgs) -> Self {
        Self {
            name: args.name,
            path: args.path,
            prefix: args.prefix,
            load_balancer_algorithm: args.algorithm,
            expires_at: args.expires_at,
        }
    }
}

fn parse_algorithm(raw: &str) -> Result<LoadBalancerAlgorithm, String> {
    LoadBalancerAlgorithm::parse(raw).ok_or_else(|| format!("unknown load balancer algorithm '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();

    match cli.server_url.as_deref() {
        Some(server_url) => {
            let source = HttpDataSource::new(server_url)?;
            if let Command::Url { id, origin } = &cli.command {
                let key = source.get(DynamicAccessKeyId(*id)).await?;
                return print_share_url(&key, origin);
            }
            run(ListController::new(source, cli.page_size), cli.command).await
        }
        None => {
            let storage = Storage::new(&cli.database_url).await?;
            let source = InProcessDataSource::new(storage, cli.page_size);
            if let Command::Url { id, origin } = &cli.command {
                let key = source.get(DynamicAccessKeyId(*id)).await?;
                return print_share_url(&key, origin);
            }
            run(ListController::new(source, cli.page_size), cli.command).await
        }
    }
}

async fn run<S>(controller: ListController<S>, command: Command) -> Result<()>
where
    S: MutationSink<Record = DynamicAccessKeySummary, Draft = DynamicAccessKeyDraft>
        + AccessKeyLinks,
{
    match command {
        Command::Seed { count, prefix } => {
            for i in 1..=count {
                let draft = DynamicAccessKeyDraft::named(format!("{prefix}-{i:02}"));
                controller.source().create(&draft).await?;
            }
            info!(count, %prefix, "seeded dynamic access keys");
            println!("created {count} keys");
        }
        Command::Create(args) => {
            let created = controller.source().create(&args.into()).await?;
            println!("created id={} path={}", created.id, created.path);
        }
        Command::Update { id, draft } => {
            let updated = controller
                .source()
                .update(&DynamicAccessKeyId(id), &draft.into())
                .await?;
            println!("updated id={} name={}", updated.id, updated.name);
        }
        Command::Remove { id } => {
            controller.source().remove(&DynamicAccessKeyId(id)).await?;
            println!("removed id={id}");
        }
        Command::List { term, page } => {
            show_page(&controller, &term, page).await?;
        }
        Command::Browse { term } => {
            browse(&controller, &term, io::stdin().lock(), io::stdout()).await?;
        }
        Command::AccessKeys { command } => {
            manage_access_keys(controller.source(), command).await?;
        }
        Command::Url { .. } => bail!("url is resolved before the list controller starts"),
    }
    Ok(())
}

async fn show_page<S>(controller: &ListController<S>, term: &str, page: u32) -> Result<()>
where
    S: MutationSink<Record = DynamicAccessKeySummary, Draft = DynamicAccessKeyDraft>,
{
    controller.search(term).await?;
    if page != 1 {
        controller.go_to_page(page).await?;
    }

    render_page(&controller.view_model(), &mut io::stdout().lock())
}

const BROWSE_HELP: &str =
    "commands: n(ext), p(rev), g <page>, s <term>, d <id>, r(efresh), q(uit)";

/// Drives the list controller from line commands until `q` or end of input.
async fn browse<S, R, W>(controller: &ListController<S>, term: &str, input: R, mut out: W) -> Result<()>
where
    S: MutationSink<Record = DynamicAccessKeySummary, Draft = DynamicAccessKeyDraft>,
    R: BufRead,
    W: Write,
{
    controller.search(term).await?;
    render_page(&controller.view_model(), &mut out)?;
    writeln!(out, "{BROWSE_HELP}")?;

    for line in input.lines() {
        let line = line?;
        let (action, arg) = match line.trim().split_once(' ') {
            Some((action, arg)) => (action, arg.trim()),
            None => (line.trim(), ""),
        };
        let page = controller.view_model().page;
        let result = match action {
            "" => continue,
            "q" | "quit" => break,
            "n" | "next" => controller.go_to_page(page.saturating_add(1)).await,
            "p" | "prev" => controller.go_to_page(page.saturating_sub(1)).await,
            "r" | "refresh" => controller.refresh().await,
            "s" | "search" => controller.search(arg).await,
            "g" | "page" => match arg.parse::<u32>() {
                Ok(page) => controller.go_to_page(page).await,
                Err(_) => {
                    writeln!(out, "usage: g <page>")?;
                    continue;
                }
            },
            "d" | "delete" => match arg.parse::<i64>() {
                Ok(id) => controller.remove(&DynamicAccessKeyId(id)).await,
                Err(_) => {
                    writeln!(out, "usage: d <id>")?;
                    continue;
                }
            },
            _ => {
                writeln!(out, "{BROWSE_HELP}")?;
                continue;
            }
        };
        match result {
            Ok(_) => render_page(&controller.view_model(), &mut out)?,
            Err(err) => writeln!(out, "error: {err}")?,
        }
    }
    Ok(())
}

fn render_page<W: Write>(view: &ViewModel<DynamicAccessKeySummary>, out: &mut W) -> Result<()> {
    let now = Utc::now();
    for key in &view.rows {
        let state = if key.validity(now).is_usable() {
            "active"
        } else {
            "expired"
        };
        writeln!(
            out,
            "{:>6}  {:<32}  {:<34}  {:>4} keys  {state}",
            key.id.to_string(),
            key.name,
            key.path,
            key.access_keys_count
        )?;
    }
    writeln!(
        out,
        "page {}/{} ({} matching '{}')",
        view.page, view.total_pages, view.total_count, view.term
    )?;
    if view.rows.is_empty() && view.page > view.total_pages {
        writeln!(out, "this page is now empty; use p to step back")?;
    }
    Ok(())
}

async fn manage_access_keys<S: AccessKeyLinks>(links: &S, command: AccessKeyCommand) -> Result<()> {
    match command {
        AccessKeyCommand::List {
            dynamic_access_key_id,
        } => {
            let keys = links
                .attached_access_keys(DynamicAccessKeyId(dynamic_access_key_id))
                .await?;
            print_access_keys(&keys);
        }
        AccessKeyCommand::Unattached => {
            print_access_keys(&links.unattached_access_keys().await?);
        }
        AccessKeyCommand::Create { name, attach_to } => {
            let created = links
                .create_access_key(&NewAccessKey {
                    name,
                    dynamic_access_key_id: attach_to.map(DynamicAccessKeyId),
                })
                .await?;
            println!("created access key id={}", created.id);
        }
        AccessKeyCommand::Attach {
            dynamic_access_key_id,
            access_key_id,
        } => {
            links
                .attach_access_key(
                    DynamicAccessKeyId(dynamic_access_key_id),
                    AccessKeyId(access_key_id),
                )
                .await?;
            println!("attached access key {access_key_id} to {dynamic_access_key_id}");
        }
        AccessKeyCommand::Detach {
            dynamic_access_key_id,
            access_key_id,
        } => {
            links
                .detach_access_key(
                    DynamicAccessKeyId(dynamic_access_key_id),
                    AccessKeyId(access_key_id),
                )
                .await?;
            println!("detached access key {access_key_id} from {dynamic_access_key_id}");
        }
    }
    Ok(())
}

fn print_access_keys(keys: &[AccessKeySummary]) {
    for key in keys {
        println!("{:>6}  {}", key.id.to_string(), key.name);
    }
    println!("{} access keys", keys.len());
}

fn print_share_url(key: &DynamicAccessKeySummary, origin: &str) -> Result<()> {
    println!("{}", dynamic_access_key_url(origin, &key.path, &key.name)?);
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
