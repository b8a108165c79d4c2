//! Worker-pool runner.
//!
//! `num_workers` long-lived tasks pull work units of `batch_size` examples
//! from a shared bounded queue. Each worker owns a copy of the template and
//! guard, streams its records back over a channel and writes them to its own
//! `shard-NNNNN.jsonl` file. Shards from an earlier run in the same directory
//! are removed first. Output order across workers is unspecified.

use super::infer_one;
use crate::dataset::{Example, ensure_unique_ids};
use crate::error::{EvalError, Result};
use crate::guard::SchemaGuard;
use crate::llm::ChatModel;
use crate::store::{self, InferenceRecord};
use crate::template::PromptTemplate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Pool sizing and pacing.
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    pub num_workers: usize,
    /// Examples per work unit.
    pub batch_size: usize,
    /// Pause before every model call, per worker.
    pub throttle: Option<Duration>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            batch_size: 8,
            throttle: None,
        }
    }
}

/// Outcome of a parallel run.
#[derive(Debug)]
pub struct ParallelSummary {
    /// Every record, in completion order.
    pub records: Vec<InferenceRecord>,
    /// Shard files written, sorted.
    pub shards: Vec<PathBuf>,
}

/// Runs examples through one model on a fixed pool of tokio tasks.
pub struct ParallelRunner {
    model: Arc<dyn ChatModel>,
    template: PromptTemplate,
    guard: SchemaGuard,
    tag: String,
    config: ParallelConfig,
}

type WorkQueue = Arc<Mutex<mpsc::Receiver<Vec<Example>>>>;

impl ParallelRunner {
    pub fn new(
        model: Arc<dyn ChatModel>,
        template: PromptTemplate,
        tag: impl Into<String>,
        config: ParallelConfig,
    ) -> Self {
        Self {
            model,
            template,
            guard: SchemaGuard::new(),
            tag: tag.into(),
            config,
        }
    }

    pub fn with_guard(mut self, guard: SchemaGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Process `examples`, writing one shard per worker into `out_dir`.
    ///
    /// Duplicate ids are rejected before any call is made. The first worker
    /// error (render or dispatch) fails the run.
    pub async fn run(&self, examples: Vec<Example>, out_dir: &Path) -> Result<ParallelSummary> {
        ensure_unique_ids(&examples, "parallel input")?;
        std::fs::create_dir_all(out_dir).map_err(|e| EvalError::io(out_dir, e))?;
        let stale = store::clear_shards(out_dir)?;
        if stale > 0 {
            tracing::info!(stale, dir = %out_dir.display(), "removed shards from an earlier run");
        }

        let num_workers = self.config.num_workers.max(1);
        let batch_size = self.config.batch_size.max(1);

        let (work_tx, work_rx) = mpsc::channel::<Vec<Example>>(num_workers * 2);
        let work_rx: WorkQueue = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<InferenceRecord>();

        let handles: Vec<JoinHandle<Result<Option<PathBuf>>>> = (0..num_workers)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    model: Arc::clone(&self.model),
                    template: self.template.clone(),
                    guard: self.guard.clone(),
                    tag: self.tag.clone(),
                    throttle: self.config.throttle,
                    shard: store::shard_path(out_dir, worker_id),
                };
                let queue = Arc::clone(&work_rx);
                let results = result_tx.clone();
                tokio::spawn(async move { worker.run(queue, results).await })
            })
            .collect();
        drop(work_rx);
        drop(result_tx);

        tracing::info!(
            examples = examples.len(),
            workers = num_workers,
            batch_size,
            tag = %self.tag,
            "starting parallel run"
        );

        let mut units = examples.into_iter().peekable();
        while units.peek().is_some() {
            let unit: Vec<Example> = units.by_ref().take(batch_size).collect();
            if work_tx.send(unit).await.is_err() {
                // every worker has exited; the join below reports why
                break;
            }
        }
        drop(work_tx);

        let mut records = Vec::new();
        while let Some(record) = result_rx.recv().await {
            records.push(record);
        }

        let mut shards = Vec::new();
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(Some(shard))) => shards.push(shard),
                Ok(Ok(None)) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(EvalError::LlmApi(format!(
                        "worker task failed: {}",
                        join_err
                    )));
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        shards.sort();
        tracing::info!(records = records.len(), shards = shards.len(), "parallel run complete");
        Ok(ParallelSummary { records, shards })
    }
}

struct Worker {
    id: usize,
    model: Arc<dyn ChatModel>,
    template: PromptTemplate,
    guard: SchemaGuard,
    tag: String,
    throttle: Option<Duration>,
    shard: PathBuf,
}

impl Worker {
    async fn run(
        self,
        queue: WorkQueue,
        results: mpsc::UnboundedSender<InferenceRecord>,
    ) -> Result<Option<PathBuf>> {
        let mut records = Vec::new();

        loop {
            let unit = { queue.lock().await.recv().await };
            let Some(unit) = unit else { break };

            for example in unit {
                if let Some(pause) = self.throttle {
                    tokio::time::sleep(pause).await;
                }
                let record = infer_one(
                    self.model.as_ref(),
                    &self.template,
                    &self.guard,
                    &self.tag,
                    example,
                )
                .await?;
                let _ = results.send(record.clone());
                records.push(record);
            }
        }

        if records.is_empty() {
            return Ok(None);
        }
        store::write_jsonl(&self.shard, &records)?;
        tracing::debug!(worker = self.id, records = records.len(), "shard written");
        Ok(Some(self.shard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::collect_shards;
    use crate::testing::{FakeModel, valid_json};
    use tempfile::TempDir;

    fn template() -> PromptTemplate {
        PromptTemplate::from_source("coach", "id={{id}} rhr={{rhr}}").unwrap()
    }

    fn examples(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example::new(format!("ex{:02}", i)).with_field("rhr", 60))
            .collect()
    }

    fn config(num_workers: usize, batch_size: usize) -> ParallelConfig {
        ParallelConfig {
            num_workers,
            batch_size,
            throttle: None,
        }
    }

    #[tokio::test]
    async fn test_every_example_lands_in_exactly_one_shard() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::constant(valid_json()));
        let runner = ParallelRunner::new(model.clone(), template(), "mut_v1", config(3, 2));

        let summary = runner.run(examples(11), dir.path()).await.unwrap();

        assert_eq!(summary.records.len(), 11);
        assert_eq!(model.calls(), 11);
        assert!(!summary.shards.is_empty() && summary.shards.len() <= 3);

        let merged = dir.path().join("merged.jsonl");
        assert_eq!(collect_shards(dir.path(), &merged).unwrap(), 11);

        let mut ids: Vec<_> = store::load_inference(&merged)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        let expected: Vec<_> = examples(11).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_rerun_replaces_earlier_shards() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::constant(valid_json()));
        let cfg = ParallelConfig {
            num_workers: 4,
            batch_size: 1,
            throttle: Some(Duration::from_millis(2)),
        };

        let first = ParallelRunner::new(model.clone(), template(), "mut_v1", cfg.clone());
        first.run(examples(8), dir.path()).await.unwrap();

        let second = ParallelRunner::new(model, template(), "mut_v1", cfg);
        let summary = second
            .run(vec![Example::new("only").with_field("rhr", 58)], dir.path())
            .await
            .unwrap();
        assert_eq!(summary.shards.len(), 1);

        let merged = dir.path().join("merged.jsonl");
        assert_eq!(collect_shards(dir.path(), &merged).unwrap(), 1);
        let records = store::load_inference(&merged).unwrap();
        assert_eq!(records[0].id, "only");
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_before_dispatch() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::constant(valid_json()));
        let runner = ParallelRunner::new(model.clone(), template(), "mut_v1", config(2, 1));

        let mut input = examples(3);
        input.push(Example::new("ex01").with_field("rhr", 61));

        assert!(runner.run(input, dir.path()).await.is_err());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_render_failure_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::constant(valid_json()));
        let runner = ParallelRunner::new(model, template(), "mut_v1", config(2, 2));

        let mut input = examples(4);
        input.push(Example::new("broken"));

        let err = runner.run(input, dir.path()).await.unwrap_err();
        assert!(matches!(err, EvalError::Template(_)));
    }

    #[tokio::test]
    async fn test_throttle_and_blocked_records() {
        let dir = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::constant("no json at all"));
        let cfg = ParallelConfig {
            num_workers: 2,
            batch_size: 1,
            throttle: Some(Duration::from_millis(1)),
        };
        let runner = ParallelRunner::new(model, template(), "baseline_v1", cfg);

        let summary = runner.run(examples(3), dir.path()).await.unwrap();
        assert!(summary.records.iter().all(|r| r.blocked && r.parsed.is_empty()));
    }
}
