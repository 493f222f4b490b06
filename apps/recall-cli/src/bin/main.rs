use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use recall_cache::CacheManager;
use recall_core::config::{expand_path, resolve_with_base, Config};
use recall_core::memory_store::InMemoryDocumentStore;
use recall_core::settings::EngineSettings;
use recall_core::{Document, MetadataFilter, MetadataValue};
use recall_hybrid::{HybridRetriever, SearchRequest};
use recall_text::IndexPersistence;

const USAGE: &str = "Usage:
  recall index <collection> <documents.jsonl> [--force]
  recall query <collection> <documents.jsonl> \"<query>\" [--limit N] [--dense-only] [--filter key=value]... [--json]
  recall stats
  recall cleanup [--days N]";

fn usage_exit() -> ! { eprintln!("{USAGE}"); std::process::exit(1) }

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { usage_exit(); }
    let cmd = args.remove(0);
    (cmd, args)
}

/// Positional arguments plus the value following each `--flag` that takes one.
struct Args {
    positional: Vec<String>,
    force: bool,
    dense_only: bool,
    json: bool,
    limit: Option<usize>,
    days: Option<u32>,
    filters: Vec<(String, String)>,
}

fn split_args(args: &[String]) -> anyhow::Result<Args> {
    let mut out = Args { positional: Vec::new(), force: false, dense_only: false, json: false, limit: None, days: None, filters: Vec::new() };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--force" | "-f" => out.force = true,
            "--dense-only" => out.dense_only = true,
            "--json" => out.json = true,
            "--limit" | "-n" => { i += 1; out.limit = Some(args.get(i).context("--limit requires a number")?.parse().context("--limit requires a number")?); }
            "--days" => { i += 1; out.days = Some(args.get(i).context("--days requires a number")?.parse().context("--days requires a number")?); }
            "--filter" => {
                i += 1;
                let clause = args.get(i).context("--filter requires key=value")?;
                let (k, v) = clause.split_once('=').context("--filter requires key=value")?;
                out.filters.push((k.to_string(), v.to_string()));
            }
            flag if flag.starts_with('-') => anyhow::bail!("unknown flag {flag}"),
            _ => out.positional.push(args[i].clone()),
        }
        i += 1;
    }
    Ok(out)
}

/// One JSON document per line; blank lines are skipped.
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Document>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("{}:{}: invalid document", path.display(), n + 1)))
        .collect()
}

/// Filter values given on the command line are parsed as JSON scalars when
/// possible (`page=3`, `draft=false`) and fall back to text.
fn parse_filter(clauses: &[(String, String)]) -> MetadataFilter {
    clauses.iter().fold(MetadataFilter::new(), |filter, (k, v)| match serde_json::from_str::<MetadataValue>(v) {
        Ok(value) => filter.eq(k.clone(), value),
        Err(_) => filter.eq(k.clone(), v.as_str()),
    })
}

struct Engine {
    store: Arc<InMemoryDocumentStore>,
    persistence: Arc<IndexPersistence>,
    retriever: HybridRetriever,
}

fn build_engine(settings: &EngineSettings) -> anyhow::Result<Engine> {
    let cwd = env::current_dir()?;
    let persistence = Arc::new(IndexPersistence::open(resolve_with_base(&cwd, &settings.persistence.dir))?);
    let cache = Arc::new(CacheManager::new(&settings.cache)?);
    let store = Arc::new(InMemoryDocumentStore::new());
    let retriever = HybridRetriever::new(store.clone(), Arc::clone(&persistence), cache, settings.clone())?;
    Ok(Engine { store, persistence, retriever })
}

fn open_persistence(settings: &EngineSettings) -> anyhow::Result<IndexPersistence> {
    Ok(IndexPersistence::open(resolve_with_base(&env::current_dir()?, &settings.persistence.dir))?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let settings = config.settings()?;
    let (cmd, args) = parse_args();
    let args = split_args(&args)?;
    let rt = tokio::runtime::Runtime::new()?;

    match cmd.as_str() {
        "index" => {
            let [collection, path] = args.positional.as_slice() else { usage_exit() };
            let engine = build_engine(&settings)?;
            let documents = load_jsonl(&expand_path(path))?;
            let count = engine.store.upsert(collection, documents)?;
            println!("Loaded {} documents into '{}'", count, collection);

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb.set_message(format!("Indexing '{collection}'"));
            rt.block_on(engine.retriever.update_index(collection, args.force))?;
            pb.finish_with_message("✅ Sparse index ready");

            if let Some(record) = engine.persistence.record(collection) {
                println!("📊 {} documents, checksum {}, file {}", record.document_count, &record.checksum[..12.min(record.checksum.len())], record.index_file);
            }
        }
        "query" => {
            let [collection, path, query] = args.positional.as_slice() else { usage_exit() };
            let engine = build_engine(&settings)?;
            engine.store.upsert(collection, load_jsonl(&expand_path(path))?)?;
            let mut request = SearchRequest::new(query.as_str(), collection.as_str()).filter(parse_filter(&args.filters));
            if let Some(limit) = args.limit { request = request.max_results(limit); }
            if args.dense_only { request = request.dense_only(); }

            let results = rt.block_on(async {
                engine.retriever.initialize(&[collection.as_str()]).await;
                engine.retriever.search(request).await
            })?;
            if args.json {
                for r in &results { println!("{}", serde_json::to_string(r)?); }
            } else if results.is_empty() {
                println!("No results for \"{}\"", query);
            } else {
                for (rank, r) in results.iter().enumerate() {
                    let preview: String = r.content.chars().take(80).collect();
                    println!("{:>2}. {:<24} combined={:.3} dense={:.3} sparse={:.3}  {}", rank + 1, r.document_id, r.combined_score, r.dense_score, r.sparse_score, preview);
                }
            }
        }
        "stats" => {
            let persistence = open_persistence(&settings)?;
            let records = persistence.records();
            println!("Persisted indexes under {}", persistence.root().display());
            if records.is_empty() { println!("  (none)"); }
            for (name, record) in records {
                let age = Utc::now() - record.created_at;
                println!("  {:<24} {:>6} docs  {:>4} days old  schema v{}", name, record.document_count, age.num_days(), record.schema_version);
            }
        }
        "cleanup" => {
            let persistence = open_persistence(&settings)?;
            let days = args.days.unwrap_or(settings.persistence.max_age_days);
            let expired = persistence.cleanup_older_than(days)?;
            let orphans = persistence.remove_orphans()?;
            info!(expired, orphans, days, "cleanup finished");
            println!("Removed {} expired indexes and {} orphaned files", expired, orphans);
        }
        "help" | "--help" | "-h" => println!("{USAGE}"),
        _ => { eprintln!("Unknown command: {}", cmd); usage_exit(); }
    }
    Ok(())
}
