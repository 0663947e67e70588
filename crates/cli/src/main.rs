mod config;
mod export;
mod metrics;
mod pipeline;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use annotate::AnnotationTask;
use batch::OpenAiBatchClient;
use clap::{Args, Parser, Subcommand};
use graph::{
    CorpusLinker, GraphStore, MemoryStore, Neo4jStore, RootIngestor, WordIngestor,
    apply_itype_wazn,
};
use ingest::{Alphabet, ChunkerConfig, CsvChunker, read_sem_roots, read_sem_words};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Needs};
use crate::metrics::{Metrics, Stage, TimedOperation};

#[derive(Parser, Debug)]
#[command(name = "lexigraph", version, about = "Batch LLM annotation of a lexical graph")]
struct Cli {
    /// Directory holding batch input, output and manifest files
    #[arg(long, global = true, default_value = "batches")]
    work_dir: PathBuf,

    /// Pause after this many graph writes (0 disables)
    #[arg(long, global = true, default_value_t = 100)]
    throttle_every: usize,

    #[arg(long, global = true, default_value_t = 2000)]
    throttle_ms: u64,

    /// Retries for transient graph errors
    #[arg(long, global = true, default_value_t = 3)]
    retries: usize,

    #[arg(long, global = true, default_value_t = 2000)]
    retry_delay_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Write graph changes to an in-memory store instead of Neo4j
    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = batch::openai::DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, global = true, env = "NEO4J_URI")]
    neo4j_uri: Option<String>,

    #[arg(long, global = true, env = "NEO4J_USER")]
    neo4j_user: Option<String>,

    #[arg(long, global = true, env = "NEO4J_PASS", hide_env_values = true)]
    neo4j_pass: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct BatchArgs {
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// Requests per batch file
    #[arg(long, default_value_t = 1000, conflicts_with = "max_tokens")]
    batch_size: usize,

    /// Split batches by estimated token count instead of request count
    #[arg(long)]
    max_tokens: Option<usize>,

    #[arg(long, default_value_t = 60)]
    poll_secs: u64,

    /// Give up on a job after this many status checks
    #[arg(long)]
    max_polls: Option<usize>,

    /// Truncate dictionary context to this many characters
    #[arg(long, default_value_t = 300)]
    max_context_chars: usize,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a large CSV into fixed-size chunk files
    Chunk {
        input: PathBuf,
        /// Output prefix; defaults to the input path without extension
        #[arg(long)]
        prefix: Option<PathBuf>,
        #[arg(long, default_value_t = 10_000)]
        size: usize,
    },
    /// Write batch request files without submitting them
    Build {
        task: AnnotationTask,
        #[arg(required = true)]
        csv: Vec<PathBuf>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Build, submit, poll and reconcile every pending batch
    Run {
        task: AnnotationTask,
        #[arg(required = true)]
        csv: Vec<PathBuf>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Apply downloaded batch outputs to the graph
    Reconcile {
        task: AnnotationTask,
        /// Output files; defaults to every output in the work dir
        outputs: Vec<PathBuf>,
    },
    /// Join downloaded outputs to their source rows as CSV
    Export {
        task: AnnotationTask,
        #[arg(long = "csv", required = true)]
        csv: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        outputs: Vec<PathBuf>,
    },
    /// Fill Root nodes from the Semitic roots table
    Roots {
        #[arg(long)]
        alphabet: PathBuf,
        #[arg(long, default_value = "Arabic")]
        lang: String,
        #[arg(long)]
        roots: PathBuf,
        #[arg(long)]
        create_missing: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create cognate Word nodes from the Semitic words table
    Words {
        #[arg(long)]
        words: PathBuf,
        #[arg(long)]
        create_missing: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Link corpus items to Word nodes by lemma and root
    LinkCorpus {
        #[arg(long)]
        corpus_id: i64,
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        /// Only link to existing words
        #[arg(long)]
        no_create: bool,
    },
    /// Set wazn on words from their morphological itype
    WaznFromItype,
}

impl Command {
    fn needs(&self, dry_run: bool) -> Needs {
        let graph = !dry_run;
        match self {
            Command::Chunk { .. } | Command::Build { .. } | Command::Export { .. } => Needs::default(),
            Command::Run { .. } => Needs { llm: true, graph },
            _ => Needs { llm: false, graph },
        }
    }

    fn batch_args(&self) -> Option<&BatchArgs> {
        match self {
            Command::Build { batch, .. } | Command::Run { batch, .. } => Some(batch),
            _ => None,
        }
    }
}

impl Cli {
    fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::default();
        config.llm.api_key = self.api_key.clone();
        config.llm.base_url = self.base_url.clone();
        config.graph.uri = self.neo4j_uri.clone();
        config.graph.user = self.neo4j_user.clone();
        config.graph.password = self.neo4j_pass.clone();
        config.batching.work_dir = self.work_dir.clone();
        config.throttle.every = self.throttle_every;
        config.throttle.pause_ms = self.throttle_ms;
        config.retry.max_retries = self.retries;
        config.retry.delay_ms = self.retry_delay_ms;

        if let Some(args) = self.command.batch_args() {
            config.llm.model = args.model.clone();
            config.llm.poll_secs = args.poll_secs;
            config.llm.max_polls = args.max_polls;
            config.batching.batch_size = args.batch_size;
            config.batching.max_tokens = args.max_tokens;
            config.batching.max_context_chars = args.max_context_chars;
        }
        config
    }
}

/// The graph backend for one command. Closed exactly once on every path.
enum StoreHandle {
    Neo4j(Arc<Neo4jStore>),
    Memory(Arc<MemoryStore>),
}

impl StoreHandle {
    async fn open(config: &AppConfig, dry_run: bool) -> Result<Self> {
        if dry_run {
            warn!("Dry run: graph writes go to an in-memory store");
            return Ok(StoreHandle::Memory(Arc::new(MemoryStore::new())));
        }
        let (Some(uri), Some(user), Some(password)) =
            (&config.graph.uri, &config.graph.user, &config.graph.password)
        else {
            bail!("Neo4j credentials are not configured");
        };
        let store = Neo4jStore::connect(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        store.init_schema().await.context("Failed to create indexes")?;
        Ok(StoreHandle::Neo4j(Arc::new(store)))
    }

    fn shared(&self) -> Arc<dyn GraphStore> {
        match self {
            StoreHandle::Neo4j(store) => store.clone(),
            StoreHandle::Memory(store) => store.clone(),
        }
    }

    fn close(self) {
        match self {
            StoreHandle::Neo4j(store) => match Arc::try_unwrap(store) {
                Ok(store) => store.close(),
                Err(_) => warn!("Neo4j store still in use at shutdown"),
            },
            StoreHandle::Memory(store) => {
                info!(
                    nodes = store.nodes().len(),
                    edges = store.edge_count(),
                    "Dry run finished"
                );
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(label: &str, value: &T) -> Result<()> {
    println!("{}: {}", label, serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = cli.app_config();
    config.validate(cli.command.needs(cli.dry_run))?;
    let metrics = Metrics::new();
    let dry_run = cli.dry_run;

    let outcome = match &cli.command {
        Command::Chunk {
            input,
            prefix,
            size,
        } => chunk(input, prefix.as_deref(), *size),
        Command::Build { task, csv, .. } => {
            let plans = pipeline::build(&config, *task, csv, &metrics)?;
            let pending = plans.iter().filter(|p| !p.done).count();
            info!(batches = plans.len(), pending = pending, "Batch files ready");
            print_json("batches", &plans)
        }
        Command::Export {
            task,
            csv,
            out,
            outputs,
        } => {
            let records = pipeline::read_records(&config, csv, &metrics)?;
            let paths = pipeline::resolve_outputs(&config, *task, outputs)?;
            let parsed = pipeline::parse_outputs(*task, &paths, &metrics)?;
            export::write_csv(out, *task, &records, &parsed.results).map(|_| ())
        }
        Command::Run { task, csv, .. } => {
            with_store(&config, dry_run, async |store| {
                run_batches(&config, *task, csv, store, &metrics).await
            })
            .await
        }
        Command::Reconcile { task, outputs } => {
            with_store(&config, dry_run, async |store| {
                let report = pipeline::reconcile(&config, *task, outputs, store, &metrics).await?;
                print_json("reconcile", &report)
            })
            .await
        }
        Command::Roots {
            alphabet,
            lang,
            roots,
            create_missing,
            limit,
        } => {
            let alphabet = Alphabet::load(alphabet, lang)?;
            let (rows, dropped) = read_sem_roots(roots)?;
            metrics.record_read(rows.len(), dropped.len());
            let (config, metrics) = (&config, &metrics);
            with_store(config, dry_run, async move |store| {
                let timer = TimedOperation::start(Stage::Maintain);
                let mut ingestor =
                    RootIngestor::new(store, alphabet, config.retry_policy(), config.throttle())
                        .create_missing(*create_missing);
                let report = ingestor.ingest(&rows, *limit).await;
                timer.finish(metrics);
                print_json("roots", &report)
            })
            .await
        }
        Command::Words {
            words,
            create_missing,
            limit,
        } => {
            let (rows, dropped) = read_sem_words(words)?;
            metrics.record_read(rows.len(), dropped.len());
            with_store(&config, dry_run, async |store| {
                let timer = TimedOperation::start(Stage::Maintain);
                let mut ingestor = WordIngestor::new(store, config.retry_policy(), config.throttle())
                    .create_missing(*create_missing);
                let report = ingestor.ingest(&rows, *limit).await;
                timer.finish(&metrics);
                print_json("words", &report)
            })
            .await
        }
        Command::LinkCorpus {
            corpus_id,
            batch_size,
            no_create,
        } => {
            if *batch_size == 0 {
                bail!("--batch-size must be at least 1");
            }
            with_store(&config, dry_run, async |store| {
                let timer = TimedOperation::start(Stage::Maintain);
                let mut linker = CorpusLinker::new(store, config.retry_policy(), config.throttle())
                    .create_missing(!*no_create);
                let report = linker.run(*corpus_id, *batch_size).await?;
                timer.finish(&metrics);
                print_json("link_corpus", &report)
            })
            .await
        }
        Command::WaznFromItype => {
            with_store(&config, dry_run, async |store| {
                let timer = TimedOperation::start(Stage::Maintain);
                let mut throttle = config.throttle();
                let report =
                    apply_itype_wazn(store.as_ref(), &config.retry_policy(), &mut throttle).await;
                timer.finish(&metrics);
                print_json("wazn", &report)
            })
            .await
        }
    };

    print_json("metrics", &metrics.snapshot())?;
    outcome
}

fn chunk(input: &Path, prefix: Option<&Path>, size: usize) -> Result<()> {
    if size == 0 {
        bail!("--size must be at least 1");
    }
    let prefix = prefix
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension(""));
    let chunker = CsvChunker::new(ChunkerConfig {
        rows_per_chunk: size,
        ..ChunkerConfig::default()
    });
    let report = chunker.split(input, &prefix)?;
    info!(
        chunks = report.chunk_files.len(),
        rows = report.rows_written,
        invalid = report.invalid_rows,
        "Chunking finished"
    );
    Ok(())
}

/// Open the graph store, hand it to `work`, and close it afterwards.
async fn with_store<F>(config: &AppConfig, dry_run: bool, work: F) -> Result<()>
where
    F: AsyncFnOnce(Arc<dyn GraphStore>) -> Result<()>,
{
    let handle = StoreHandle::open(config, dry_run).await?;
    let result = work(handle.shared()).await;
    handle.close();
    result
}

async fn run_batches(
    config: &AppConfig,
    task: AnnotationTask,
    csv: &[PathBuf],
    store: Arc<dyn GraphStore>,
    metrics: &Metrics,
) -> Result<()> {
    let api_key = config.llm.api_key.clone().unwrap_or_default();
    let client = Arc::new(
        OpenAiBatchClient::new(&config.llm.base_url, api_key)
            .with_description(format!("{} annotation", task)),
    );
    let summary = pipeline::run(config, task, csv, client, store, metrics).await?;
    print_json("run", &summary)?;
    if !summary.failed.is_empty() {
        bail!(
            "{} of {} batches failed; rerun to resume them",
            summary.failed.len(),
            summary.batches
        );
    }
    Ok(())
}
