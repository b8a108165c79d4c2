//! Wellness Eval CLI
//!
//! Runs the mut/baseline comparison stage by stage: inference, shard
//! collection, judging, metrics, references and human evaluation.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use wellness_eval::{
    config::{DEFAULT_RUBRIC, ModelBlock, ModelsConfig, Rubric},
    dataset::Dataset,
    error::EvalError,
    human::{self, Annotation, PairTask, Preference},
    judge::LlmJudge,
    llm::{Backend, ChatModel, call_chat},
    metrics::{self, AutoMetrics},
    refs::{DEFAULT_REFERENCE_LIMIT, ReferenceBuilder},
    runner::{BatchRunner, ParallelConfig, ParallelRunner},
    store,
    template::{DEFAULT_TEMPLATE_DIR, PromptTemplate},
};

const DEFAULT_DATASET: &str = "evals/datasets/test.jsonl";
const DEFAULT_REFS: &str = "evals/datasets/refs.jsonl";
const DEFAULT_ANNOTATIONS: &str = "out/human/annotations.csv";

/// Wellness Eval - compare two LLM configurations on a wellness-coaching task
#[derive(Parser)]
#[command(name = "wellness-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model config file (default: configs/model.yaml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Mut,
    Baseline,
}

impl Side {
    fn block(self, config: &ModelsConfig) -> &ModelBlock {
        match self {
            Side::Mut => &config.mut_block,
            Side::Baseline => &config.baseline,
        }
    }

    fn default_tag(self) -> &'static str {
        match self {
            Side::Mut => "mut_v1",
            Side::Baseline => "baseline_v2",
        }
    }

    fn default_prompt(self) -> &'static str {
        match self {
            Side::Mut => "coach_v1.jinja",
            Side::Baseline => "coach_v2.jinja",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a model over a dataset, one example at a time
    Infer {
        /// Which model block to use
        #[arg(long, value_enum, default_value = "mut")]
        model: Side,

        #[arg(short, long, default_value = DEFAULT_DATASET)]
        dataset: PathBuf,

        /// Template file name inside --prompts-dir (mut: coach_v1.jinja, baseline: coach_v2.jinja)
        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(long, default_value = DEFAULT_TEMPLATE_DIR)]
        prompts_dir: PathBuf,

        /// Tag stored on every record (mut: mut_v1, baseline: baseline_v2)
        #[arg(short, long)]
        tag: Option<String>,

        /// Output JSONL (default: out/infer/<tag>.jsonl)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Examples to run (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },

    /// Run a model over a dataset on a worker pool, writing shards
    InferParallel {
        #[arg(long, value_enum, default_value = "mut")]
        model: Side,

        #[arg(short, long, default_value = DEFAULT_DATASET)]
        dataset: PathBuf,

        #[arg(short, long)]
        prompt: Option<String>,

        #[arg(long, default_value = DEFAULT_TEMPLATE_DIR)]
        prompts_dir: PathBuf,

        #[arg(short, long)]
        tag: Option<String>,

        /// Shard directory (default: out/parallel/<tag>)
        #[arg(short, long)]
        outdir: Option<PathBuf>,

        #[arg(short = 'w', long, default_value_t = 4)]
        num_workers: usize,

        /// Examples per work unit
        #[arg(short, long, default_value_t = 8)]
        batch_size: usize,

        #[arg(short, long, default_value_t = 0)]
        limit: usize,

        /// Pause before each model call, in seconds
        #[arg(long, default_value_t = 0.0)]
        throttle_sec: f64,
    },

    /// Merge shard files into one JSONL file
    Collect {
        indir: PathBuf,
        outfile: PathBuf,
    },

    /// Score an inference file with the LLM judge
    Judge {
        infile: PathBuf,

        /// Output JSONL (default: out/judged/<stem>.jsonl)
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(short, long, default_value = DEFAULT_RUBRIC)]
        rubric: PathBuf,
    },

    /// Length, disclaimer and safety keyword metrics
    AutoMetrics {
        #[arg(required = true)]
        infiles: Vec<PathBuf>,

        #[arg(short, long, default_value = "out/metrics")]
        outdir: PathBuf,
    },

    /// ROUGE-L, similarity and perplexity against reference texts
    RefMetrics {
        #[arg(required = true)]
        infiles: Vec<PathBuf>,

        #[arg(short, long, default_value = DEFAULT_REFS)]
        refs: PathBuf,

        #[arg(short, long, default_value = "out/metrics_ref")]
        outdir: PathBuf,

        /// Leave ppl_gpt2 empty
        #[arg(long)]
        skip_ppl: bool,

        /// Records to read per file (0 = all)
        #[arg(short, long, default_value_t = 0)]
        limit: usize,
    },

    /// Write reference answers with the judge model
    Refs {
        #[arg(short, long, default_value = DEFAULT_DATASET)]
        dataset: PathBuf,

        #[arg(short, long, default_value = "coach_v1.jinja")]
        prompt: String,

        #[arg(long, default_value = DEFAULT_TEMPLATE_DIR)]
        prompts_dir: PathBuf,

        #[arg(short, long, default_value = DEFAULT_REFS)]
        out: PathBuf,

        #[arg(short, long, default_value_t = DEFAULT_REFERENCE_LIMIT)]
        limit: usize,
    },

    /// Prepare blinded A/B pairs for human evaluation
    Pairs {
        #[arg(long, default_value = "out/infer/mut_v1.jsonl")]
        mut_file: PathBuf,

        #[arg(long, default_value = "out/infer/baseline_v2.jsonl")]
        baseline_file: PathBuf,

        #[arg(short, long, default_value = "out/human/pairs.jsonl")]
        out: PathBuf,

        /// Seed for reproducible A/B order
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Append one annotation to the log
    Annotate {
        #[arg(long)]
        annotator: String,

        /// Item id
        #[arg(long)]
        id: String,

        /// A, B or Tie
        #[arg(long)]
        pref: Preference,

        #[arg(long)]
        helpful: u8,

        #[arg(long)]
        factual: u8,

        #[arg(long)]
        safety: u8,

        #[arg(long)]
        clarity: u8,

        /// Comma-separated error tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        #[arg(long, default_value = "")]
        notes: String,

        #[arg(short, long, default_value = DEFAULT_ANNOTATIONS)]
        out: PathBuf,
    },

    /// Summarize the annotation log
    Analyze {
        #[arg(default_value = DEFAULT_ANNOTATIONS)]
        annotations: PathBuf,

        /// Pairs file to resolve blinded preferences into system wins
        #[arg(long)]
        pairs: Option<PathBuf>,
    },

    /// Test connections to the configured models
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Infer {
            model,
            dataset,
            prompt,
            prompts_dir,
            tag,
            out,
            limit,
        } => {
            let prompt = prompt.unwrap_or_else(|| model.default_prompt().to_string());
            let tag = tag.unwrap_or_else(|| model.default_tag().to_string());
            let out = out.unwrap_or_else(|| PathBuf::from(format!("out/infer/{}.jsonl", tag)));
            cmd_infer(config, model, &dataset, &prompts_dir, &prompt, &tag, &out, limit).await
        }
        Commands::InferParallel {
            model,
            dataset,
            prompt,
            prompts_dir,
            tag,
            outdir,
            num_workers,
            batch_size,
            limit,
            throttle_sec,
        } => {
            let prompt = prompt.unwrap_or_else(|| model.default_prompt().to_string());
            let tag = tag.unwrap_or_else(|| model.default_tag().to_string());
            let outdir = outdir.unwrap_or_else(|| PathBuf::from(format!("out/parallel/{}", tag)));
            let parallel = ParallelConfig {
                num_workers,
                batch_size,
                throttle: throttle(throttle_sec)?,
            };
            cmd_infer_parallel(
                config,
                model,
                &dataset,
                &prompts_dir,
                &prompt,
                &tag,
                &outdir,
                limit,
                parallel,
            )
            .await
        }
        Commands::Collect { indir, outfile } => cmd_collect(&indir, &outfile),
        Commands::Judge { infile, out, rubric } => {
            let out = out.unwrap_or_else(|| judged_path(&infile));
            cmd_judge(config, &infile, &out, &rubric).await
        }
        Commands::AutoMetrics { infiles, outdir } => cmd_auto_metrics(&infiles, &outdir),
        Commands::RefMetrics {
            infiles,
            refs,
            outdir,
            skip_ppl,
            limit,
        } => cmd_ref_metrics(config, &infiles, &refs, &outdir, skip_ppl, limit).await,
        Commands::Refs {
            dataset,
            prompt,
            prompts_dir,
            out,
            limit,
        } => cmd_refs(config, &dataset, &prompts_dir, &prompt, &out, limit).await,
        Commands::Pairs {
            mut_file,
            baseline_file,
            out,
            seed,
        } => cmd_pairs(&mut_file, &baseline_file, &out, seed),
        Commands::Annotate {
            annotator,
            id,
            pref,
            helpful,
            factual,
            safety,
            clarity,
            tags,
            notes,
            out,
        } => {
            let annotation = Annotation {
                annotator,
                id,
                pref,
                helpful,
                factual,
                safety,
                clarity,
                tags,
                notes,
            };
            human::append_annotation(&out, &annotation).context("Failed to record annotation")?;
            println!("Recorded annotation for '{}' → {}", annotation.id, out.display());
            Ok(())
        }
        Commands::Analyze { annotations, pairs } => cmd_analyze(&annotations, pairs.as_deref()),
        Commands::Test => cmd_test(config).await,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ModelsConfig> {
    ModelsConfig::load(path).context("Failed to load model configuration")
}

fn load_examples(dataset: &Path, limit: usize) -> Result<Dataset> {
    let dataset = Dataset::load_jsonl(dataset, Some(limit))
        .with_context(|| format!("Failed to load dataset '{}'", dataset.display()))?;
    if dataset.is_empty() {
        anyhow::bail!("Dataset '{}' has no examples", dataset.name);
    }
    Ok(dataset)
}

/// Seconds from the CLI as an optional pause; zero means none.
fn throttle(seconds: f64) -> Result<Option<Duration>> {
    if seconds == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(seconds)
        .map(Some)
        .map_err(|e| EvalError::Config(format!("invalid --throttle-sec {}: {}", seconds, e)).into())
}

fn judged_path(infile: &Path) -> PathBuf {
    let stem = infile
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "judged".to_string());
    PathBuf::from(format!("out/judged/{}.jsonl", stem))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_infer(
    config: Option<&Path>,
    side: Side,
    dataset: &Path,
    prompts_dir: &Path,
    prompt: &str,
    tag: &str,
    out: &Path,
    limit: usize,
) -> Result<()> {
    let config = load_config(config)?;
    let block = side.block(&config);
    let dataset = load_examples(dataset, limit)?;
    let template = PromptTemplate::load(prompts_dir, prompt).context("Failed to load prompt template")?;

    println!("Running {} examples through {} ({})", dataset.len(), block.model, block.provider);
    let start = Instant::now();

    let model = Backend::from_block(block).context("Failed to create backend")?;
    let runner = BatchRunner::new(model, template, tag);
    let n = runner
        .run_to_file(&dataset.examples, out)
        .await
        .context("Inference failed")?;

    println!("Wrote {} → {} ({:.2?})", n, out.display(), start.elapsed());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_infer_parallel(
    config: Option<&Path>,
    side: Side,
    dataset: &Path,
    prompts_dir: &Path,
    prompt: &str,
    tag: &str,
    outdir: &Path,
    limit: usize,
    parallel: ParallelConfig,
) -> Result<()> {
    let config = load_config(config)?;
    let block = side.block(&config);
    let dataset = load_examples(dataset, limit)?;
    let template = PromptTemplate::load(prompts_dir, prompt).context("Failed to load prompt template")?;

    println!(
        "Running {} examples through {} on {} workers",
        dataset.len(),
        block.model,
        parallel.num_workers
    );
    let start = Instant::now();

    let model: Arc<dyn ChatModel> =
        Arc::new(Backend::from_block(block).context("Failed to create backend")?);
    let runner = ParallelRunner::new(model, template, tag, parallel);
    let summary = runner
        .run(dataset.examples, outdir)
        .await
        .context("Parallel inference failed")?;

    let blocked = summary.records.iter().filter(|r| r.blocked).count();
    println!(
        "Wrote {} records ({} blocked) in {} shards → {} ({:.2?})",
        summary.records.len(),
        blocked,
        summary.shards.len(),
        outdir.display(),
        start.elapsed()
    );
    Ok(())
}

fn cmd_collect(indir: &Path, outfile: &Path) -> Result<()> {
    let n = store::collect_shards(indir, outfile).context("Failed to collect shards")?;
    println!("Merged {} lines → {}", n, outfile.display());
    Ok(())
}

async fn cmd_judge(config: Option<&Path>, infile: &Path, out: &Path, rubric: &Path) -> Result<()> {
    let config = load_config(config)?;
    let rubric = Rubric::load(rubric).context("Failed to load rubric")?;
    let model = Backend::from_block(&config.judge).context("Failed to create judge backend")?;

    println!("Judging {} with {}", infile.display(), config.judge.model);
    let judge = LlmJudge::new(model, rubric, config.judge.n_prompts());
    let n = judge.judge_file(infile, out).await.context("Judging failed")?;

    println!("Judged {} → {}", n, out.display());
    Ok(())
}

fn cmd_auto_metrics(infiles: &[PathBuf], outdir: &Path) -> Result<()> {
    let metrics = AutoMetrics::new()?;
    for infile in infiles {
        let out = metrics
            .run_file(infile, outdir)
            .with_context(|| format!("Failed to score '{}'", infile.display()))?;
        println!("Wrote {}", out.display());
    }
    Ok(())
}

async fn cmd_ref_metrics(
    config: Option<&Path>,
    infiles: &[PathBuf],
    refs: &Path,
    outdir: &Path,
    skip_ppl: bool,
    limit: usize,
) -> Result<()> {
    let references = store::load_references(refs).context("Failed to load references")?;

    // the ppl block is optional, so a missing config only disables perplexity
    let ppl_block = if skip_ppl {
        None
    } else {
        match ModelsConfig::load(config) {
            Ok(cfg) => cfg.ppl,
            Err(e) => {
                tracing::info!(error = %e, "no model config; perplexity disabled");
                None
            }
        }
    };
    let scorers = metrics::probe(ppl_block.as_ref(), skip_ppl).await;

    for infile in infiles {
        let stem = infile
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "metrics".to_string());
        let out = outdir.join(format!("{}.csv", stem));
        let n = scorers
            .run_file(infile, &references, &out, limit)
            .await
            .with_context(|| format!("Failed to score '{}'", infile.display()))?;
        println!("Wrote {}  (N={})", out.display(), n);
    }
    Ok(())
}

async fn cmd_refs(
    config: Option<&Path>,
    dataset: &Path,
    prompts_dir: &Path,
    prompt: &str,
    out: &Path,
    limit: usize,
) -> Result<()> {
    let config = load_config(config)?;
    let dataset = load_examples(dataset, limit)?;
    let template = PromptTemplate::load(prompts_dir, prompt).context("Failed to load prompt template")?;
    let model = Backend::from_block(&config.judge).context("Failed to create judge backend")?;

    let builder = ReferenceBuilder::new(model, template);
    let n = builder
        .build_file(&dataset.examples, out)
        .await
        .context("Failed to build references")?;

    println!("Wrote {} references → {}", n, out.display());
    Ok(())
}

fn cmd_pairs(mut_file: &Path, baseline_file: &Path, out: &Path, seed: Option<u64>) -> Result<()> {
    let mut_records = store::load_inference(mut_file)
        .with_context(|| format!("Failed to load '{}'", mut_file.display()))?;
    let baseline_records = store::load_inference(baseline_file)
        .with_context(|| format!("Failed to load '{}'", baseline_file.display()))?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let pairs = human::prepare_pairs(mut_records, baseline_records, &mut rng)
        .context("Failed to prepare pairs")?;
    store::write_jsonl(out, &pairs).context("Failed to write pairs")?;

    println!("Wrote {} tasks → {}", pairs.len(), out.display());
    Ok(())
}

fn cmd_analyze(annotations: &Path, pairs: Option<&Path>) -> Result<()> {
    let rows = human::load_annotations(annotations)
        .with_context(|| format!("Failed to read '{}'", annotations.display()))?;
    let pairs: Option<Vec<PairTask>> = pairs
        .map(|p| store::read_jsonl(p).context("Failed to read pairs"))
        .transpose()?;

    let report = human::analyze(&rows, pairs.as_deref());
    println!("{}", report);
    Ok(())
}

async fn cmd_test(config: Option<&Path>) -> Result<()> {
    println!("Testing model connections...\n");

    let config = load_config(config)?;
    let blocks = [
        ("mut", Some(&config.mut_block)),
        ("baseline", Some(&config.baseline)),
        ("judge", Some(&config.judge)),
        ("ppl", config.ppl.as_ref()),
    ];

    for (name, block) in blocks {
        let Some(block) = block else { continue };
        println!("{}:", name);
        println!("  Provider:  {}", block.provider);
        println!("  Model:     {}", block.model);
        if let Some(base_url) = &block.base_url {
            println!("  Base URL:  {}", base_url);
        }

        if name == "ppl" {
            let scorers = metrics::probe(Some(block), false).await;
            println!(
                "  Perplexity: {}\n",
                if scorers.has_perplexity() { "available" } else { "unavailable" }
            );
            continue;
        }

        let start = Instant::now();
        match call_chat(block, "You are a connection test.", "Reply with the single word OK.").await {
            Ok(reply) => {
                let preview: String = reply.trim().chars().take(40).collect();
                println!("  Connection successful ({:.2?}): {}\n", start.elapsed(), preview);
            }
            Err(e) => println!("  Connection failed: {}\n", e),
        }
    }

    Ok(())
}
