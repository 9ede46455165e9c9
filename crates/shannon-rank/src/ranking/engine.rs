//! The ranking engine.
//!
//! One orchestration thread runs each ranking operation: it scores the
//! uncomputed columns on a bounded rayon pool, waits for the pool (the
//! scope is the barrier), reorders, and publishes the result. Every
//! operation works on its own copy of the score table; the live table is
//! replaced only when an operation completes uncancelled, so readers never
//! see a half-sorted or half-scored state.
//!
//! Structural changes to the column list happen on the caller's thread and
//! require a [`Quiescent`] guard, which only [`RankingEngine::cancel`] and
//! [`RankingEngine::wait`] hand out after the orchestration thread joined.

use parking_lot::RwLock;
use polars::prelude::DataFrame;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use super::progress::{
    CancellationToken, ProgressReporter, ProgressUpdate, RankingStage, scoring_progress,
};
use super::sort::{SortAlgorithm, insertion_sort, quicksort, sort_descending};
use super::table::{RankedColumn, ScoreTable};
use crate::config::{RankingConfig, validate_missing_threshold, validate_p_value};
use crate::data::{DataSource, RowFilter, VariableId, export_table};
use crate::error::{RankingError, Result};
use crate::shannon::SimilarityScorer;

/// Sort progress above which a single-column fix-up uses insertion sort.
const INSERTION_PROGRESS: f32 = 0.9;

/// Observable state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingState {
    /// No reference variable.
    Unsorted,
    /// An operation is computing scores or reordering.
    Sorting,
    /// Reference variable set and nothing pending.
    Sorted,
}

/// One row of a score profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub name: String,
    pub alias: String,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    /// Score uncomputed columns on the pool, then reorder.
    Rank(SortAlgorithm),
    /// Insertion reorder computing missing scores inline.
    Inline,
    /// Reorder to natural variable order.
    Natural,
}

/// Snapshot of the parameters an operation runs with.
struct JobContext {
    key: Option<VariableId>,
    filter: RowFilter,
    config: RankingConfig,
}

struct Live {
    table: ScoreTable,
    /// Variables held alongside the columns; never scored.
    covariates: Vec<VariableId>,
    sort_key: Option<VariableId>,
    filter: RowFilter,
    config: RankingConfig,
}

#[derive(Default)]
struct Progress {
    running: AtomicBool,
    threaded: AtomicBool,
    reordering: AtomicBool,
    /// Set when the last operation published its result.
    published: AtomicBool,
    completed: AtomicUsize,
    total: AtomicUsize,
    inline: AtomicUsize,
}

struct Shared<S> {
    source: Arc<S>,
    scorer: SimilarityScorer,
    live: RwLock<Live>,
    progress: Progress,
}

static_assertions::assert_impl_all!(Shared<crate::data::DataTable>: Send, Sync);

impl<S: DataSource> Shared<S> {
    fn progress(&self) -> f32 {
        let live = self.live.read();
        if live.sort_key.is_none() {
            return 0.0;
        }
        let p = &self.progress;
        if p.threaded.load(Ordering::SeqCst) {
            if !p.running.load(Ordering::SeqCst) && p.published.load(Ordering::SeqCst) {
                1.0
            } else if p.reordering.load(Ordering::SeqCst) {
                0.99
            } else {
                scoring_progress(p.completed.load(Ordering::SeqCst), p.total.load(Ordering::SeqCst))
            }
        } else if live.table.is_empty() {
            1.0
        } else {
            (p.inline.load(Ordering::SeqCst) as f32 / live.table.len() as f32).clamp(0.0, 1.0)
        }
    }

    fn is_sorting(&self) -> bool {
        self.progress.running.load(Ordering::SeqCst)
    }

    fn state(&self) -> RankingState {
        if self.live.read().sort_key.is_none() {
            RankingState::Unsorted
        } else if self.is_sorting() {
            RankingState::Sorting
        } else {
            RankingState::Sorted
        }
    }

    fn name_of(&self, var: VariableId) -> String {
        self.source
            .variable(var)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| format!("#{}", var.index()))
    }

    fn score(&self, var: VariableId) -> Result<Option<f32>> {
        self.live
            .read()
            .table
            .get(var)
            .map(|c| c.score)
            .ok_or_else(|| RankingError::NotAColumn(self.name_of(var)))
    }

    fn profile(&self, vars: &[VariableId]) -> Vec<ProfileRow> {
        let live = self.live.read();
        vars.iter()
            .filter_map(|&var| {
                let column = live.table.get(var)?;
                let variable = self.source.variable(var)?;
                Some(ProfileRow {
                    name: variable.name.clone(),
                    alias: variable.alias.clone(),
                    score: column.score,
                })
            })
            .collect()
    }

    /// Score of column `var` against the reference `key`.
    fn compute_score(
        &self,
        var: VariableId,
        key: VariableId,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<f32> {
        let mut rng = match ctx.config.surrogate_seed {
            Some(seed) => {
                StdRng::seed_from_u64(seed ^ ((var.index() as u64) << 32) ^ key.index() as u64)
            }
            None => StdRng::from_entropy(),
        };
        self.scorer
            .score_variables(&*self.source, var, key, &ctx.filter, &ctx.config, &mut rng, cancel)
    }

    /// Score every uncomputed column of `table` on the pool. Each task owns
    /// the `&mut` of exactly one slot; the scope returns once all tasks did.
    fn score_on_pool(
        &self,
        pool: &rayon::ThreadPool,
        table: &mut ScoreTable,
        key: VariableId,
        ctx: &JobContext,
        cancel: &CancellationToken,
        reporter: Option<&dyn ProgressReporter>,
    ) -> Result<()> {
        let total = table.uncomputed();
        pool.scope(|scope| {
            for column in table.entries_mut().filter(|c| c.score.is_none()) {
                scope.spawn(move |_| {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match self.compute_score(column.variable, key, ctx, cancel) {
                        Ok(score) => column.score = Some(score),
                        Err(err) if err.is_cancelled() => return,
                        Err(err) => {
                            let name = self.name_of(column.variable);
                            warn!("Scoring {} failed, using 0: {}", name, err);
                            column.score = Some(0.0);
                        }
                    }
                    let done = self.progress.completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(reporter) = reporter {
                        reporter.report(ProgressUpdate::with_items(
                            done,
                            total,
                            format!("Scored {}", self.name_of(column.variable)),
                        ));
                    }
                });
            }
        });
        if cancel.is_cancelled() {
            return Err(RankingError::Cancelled);
        }
        Ok(())
    }

    fn run(
        &self,
        pool: &rayon::ThreadPool,
        job: Job,
        mut table: ScoreTable,
        ctx: &JobContext,
        cancel: &CancellationToken,
        reporter: Option<&dyn ProgressReporter>,
    ) -> Result<ScoreTable> {
        let reordering = || {
            self.progress.reordering.store(true, Ordering::SeqCst);
            if let Some(reporter) = reporter {
                reporter.report(ProgressUpdate::new(
                    RankingStage::Reordering,
                    0.99,
                    "Sorting columns",
                ));
            }
        };

        match job {
            Job::Rank(algorithm) => {
                let key = ctx.key.ok_or(RankingError::Unsorted)?;
                self.score_on_pool(pool, &mut table, key, ctx, cancel, reporter)?;
                reordering();
                let key_of = |c: &mut RankedColumn| Ok(c.score.unwrap_or(0.0));
                sort_descending(algorithm, table.as_mut_slice(), key_of, cancel)?;
            }
            Job::Inline => {
                let key = ctx.key.ok_or(RankingError::Unsorted)?;
                reordering();
                let mut score_of = |column: &mut RankedColumn| -> Result<f32> {
                    if let Some(score) = column.score {
                        return Ok(score);
                    }
                    let score = self.compute_score(column.variable, key, ctx, cancel)?;
                    column.score = Some(score);
                    self.progress.inline.fetch_add(1, Ordering::SeqCst);
                    Ok(score)
                };
                insertion_sort(table.as_mut_slice(), &mut score_of, cancel)?;
                // A single column is never compared.
                for column in table.entries_mut() {
                    score_of(column)?;
                }
            }
            Job::Natural => {
                reordering();
                let count = self.source.variable_count().max(1) as f32;
                let key_of = |c: &mut RankedColumn| Ok(1.0 - c.variable.index() as f32 / count);
                quicksort(table.as_mut_slice(), key_of, cancel)?;
            }
        }
        Ok(table)
    }
}

/// Proof that no ranking operation is running.
///
/// Obtained from [`RankingEngine::cancel`] or [`RankingEngine::wait`]; while
/// it is alive the engine is mutably borrowed, so no operation can start.
pub struct Quiescent<'a, S> {
    shared: &'a Shared<S>,
}

impl<S: DataSource> Quiescent<'_, S> {
    /// Snapshot of the column order.
    pub fn columns(&self) -> Vec<VariableId> {
        self.shared.live.read().table.variables()
    }

    pub fn table(&self) -> ScoreTable {
        self.shared.live.read().table.clone()
    }

    fn with_live<R>(&self, f: impl FnOnce(&mut Live) -> R) -> R {
        f(&mut self.shared.live.write())
    }
}

/// Cheap, cloneable read access to an engine from other threads.
pub struct RankingHandle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for RankingHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: DataSource> RankingHandle<S> {
    pub fn progress(&self) -> f32 {
        self.shared.progress()
    }

    pub fn is_sorting(&self) -> bool {
        self.shared.is_sorting()
    }

    pub fn state(&self) -> RankingState {
        self.shared.state()
    }

    pub fn sort_key(&self) -> Option<VariableId> {
        self.shared.live.read().sort_key
    }

    pub fn columns(&self) -> Vec<VariableId> {
        self.shared.live.read().table.variables()
    }

    pub fn table(&self) -> ScoreTable {
        self.shared.live.read().table.clone()
    }

    pub fn score(&self, var: VariableId) -> Result<Option<f32>> {
        self.shared.score(var)
    }
}

/// Ranks the columns of a dataset by dependency on a reference variable.
///
/// Mutating operations take `&mut self` and return once the previous
/// operation is fully stopped and the new one launched; they do not wait for
/// it to finish. Use [`wait`](Self::wait) to block until the ranking is
/// published.
///
/// # Example
///
/// ```rust,ignore
/// use shannon_rank::{DataTable, RankingConfig, RankingEngine, RowFilter};
///
/// let mut engine = RankingEngine::new(table, RankingConfig::default())?;
/// engine.set_sort_key(income, RowFilter::new(), 0.05, 0.8)?;
/// engine.wait();
/// for column in engine.table().iter() {
///     println!("{:?} {:?}", column.variable, column.score);
/// }
/// ```
pub struct RankingEngine<S: DataSource + 'static> {
    shared: Arc<Shared<S>>,
    pool: Arc<rayon::ThreadPool>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl<S: DataSource + 'static> RankingEngine<S> {
    /// Create an unsorted engine whose columns are all included variables.
    pub fn new(source: S, config: RankingConfig) -> Result<Self> {
        Self::from_shared(Arc::new(source), config)
    }

    pub fn from_shared(source: Arc<S>, config: RankingConfig) -> Result<Self> {
        config.validate()?;
        let threads = config.effective_worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shannon-score-{}", i))
            .build()
            .map_err(|e| RankingError::Internal(format!("Failed to build score pool: {}", e)))?;
        debug!("Score pool started with {} threads", threads);

        let included = source.variables().iter().filter(|v| v.include).map(|v| v.id);
        let table = ScoreTable::new(included);
        let shared = Shared {
            scorer: SimilarityScorer::new(config.binning),
            live: RwLock::new(Live {
                table,
                covariates: Vec::new(),
                sort_key: None,
                filter: RowFilter::new(),
                config,
            }),
            progress: Progress::default(),
            source,
        };
        Ok(Self {
            shared: Arc::new(shared),
            pool: Arc::new(pool),
            cancel: CancellationToken::new(),
            worker: None,
            reporter: None,
        })
    }

    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn handle(&self) -> RankingHandle<S> {
        RankingHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }

    pub fn config(&self) -> RankingConfig {
        self.shared.live.read().config.clone()
    }

    pub fn filter(&self) -> RowFilter {
        self.shared.live.read().filter.clone()
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn progress(&self) -> f32 {
        self.shared.progress()
    }

    pub fn is_sorting(&self) -> bool {
        self.shared.is_sorting()
    }

    pub fn is_sorted(&self) -> bool {
        self.shared.state() == RankingState::Sorted
    }

    pub fn is_unsorted(&self) -> bool {
        self.shared.state() == RankingState::Unsorted
    }

    pub fn state(&self) -> RankingState {
        self.shared.state()
    }

    pub fn sort_key(&self) -> Option<VariableId> {
        self.shared.live.read().sort_key
    }

    pub fn column_count(&self) -> usize {
        self.shared.live.read().table.len()
    }

    pub fn columns(&self) -> Vec<VariableId> {
        self.shared.live.read().table.variables()
    }

    pub fn table(&self) -> ScoreTable {
        self.shared.live.read().table.clone()
    }

    /// Score of a column; `None` while not computed.
    pub fn score(&self, var: VariableId) -> Result<Option<f32>> {
        self.shared.score(var)
    }

    /// `(name, alias, score)` for each of `vars` that is a column.
    pub fn profile(&self, vars: &[VariableId]) -> Vec<ProfileRow> {
        self.shared.profile(vars)
    }

    /// [`profile`](Self::profile) rendered as pretty-printed JSON.
    pub fn profile_json(&self, vars: &[VariableId]) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.profile(vars))?)
    }

    /// Rows inside the current filter for `vars`, plus their dictionary.
    ///
    /// See [`export_table`] for the layout of both frames.
    pub fn export_table(&self, vars: &[VariableId]) -> Result<(DataFrame, DataFrame)> {
        let filter = self.filter();
        export_table(&*self.shared.source, vars, &filter)
    }

    // ---------------------------------------------------------------------
    // Quiescence
    // ---------------------------------------------------------------------

    /// Stop the running operation and block until its threads are gone.
    ///
    /// Scores computed by the cancelled operation are discarded.
    pub fn cancel(&mut self) -> Quiescent<'_, S> {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                info!("Suspending scoring calculations...");
            }
            self.cancel.cancel();
            Self::join(worker);
            debug!("Done.");
        }
        self.cancel.reset();
        Quiescent { shared: &self.shared }
    }

    /// Block until the running operation finishes and publishes.
    pub fn wait(&mut self) -> Quiescent<'_, S> {
        if let Some(worker) = self.worker.take() {
            Self::join(worker);
        }
        Quiescent { shared: &self.shared }
    }

    fn join(worker: JoinHandle<()>) {
        if worker.join().is_err() {
            warn!("Ranking thread panicked");
        }
    }

    fn launch(&mut self, job: Job) -> Result<()> {
        let (table, ctx) = {
            let live = self.shared.live.read();
            let ctx = JobContext {
                key: live.sort_key,
                filter: live.filter.clone(),
                config: live.config.clone(),
            };
            (live.table.clone(), ctx)
        };

        let progress = &self.shared.progress;
        progress.threaded.store(matches!(job, Job::Rank(_)), Ordering::SeqCst);
        progress.reordering.store(false, Ordering::SeqCst);
        progress.published.store(false, Ordering::SeqCst);
        progress.completed.store(0, Ordering::SeqCst);
        progress.total.store(table.uncomputed(), Ordering::SeqCst);
        progress.inline.store(0, Ordering::SeqCst);
        progress.running.store(true, Ordering::SeqCst);

        match ctx.key {
            Some(key) => info!(
                "Sorting {} columns by {} ({:?})",
                table.len(),
                self.shared.name_of(key),
                job
            ),
            None => info!("Restoring natural order of {} columns", table.len()),
        }

        let shared = Arc::clone(&self.shared);
        let pool = Arc::clone(&self.pool);
        let cancel = self.cancel.clone();
        let reporter = self.reporter.clone();
        let spawned = std::thread::Builder::new()
            .name("shannon-rank-sort".to_string())
            .spawn(move || {
                let reporter = reporter.as_deref();
                let outcome = shared.run(&pool, job, table, &ctx, &cancel, reporter);
                let update = match outcome {
                    Ok(table) => {
                        let mut live = shared.live.write();
                        if cancel.is_cancelled() {
                            ProgressUpdate::cancelled()
                        } else {
                            let count = table.len();
                            live.table = table;
                            shared.progress.published.store(true, Ordering::SeqCst);
                            ProgressUpdate::complete(format!("Sorted {} columns", count))
                        }
                    }
                    Err(err) if err.is_cancelled() => ProgressUpdate::cancelled(),
                    Err(err) => {
                        warn!("Ranking failed: {}", err);
                        ProgressUpdate::new(RankingStage::Cancelled, 0.0, err.to_string())
                    }
                };
                shared.progress.running.store(false, Ordering::SeqCst);
                if let Some(reporter) = reporter {
                    reporter.report(update);
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.progress.running.store(false, Ordering::SeqCst);
                Err(RankingError::Io(err).with_context("Spawning ranking thread"))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sorting
    // ---------------------------------------------------------------------

    fn included(&self, var: VariableId) -> Result<()> {
        let variable = self
            .shared
            .source
            .variable(var)
            .ok_or_else(|| RankingError::VariableNotFound(format!("#{}", var.index())))?;
        if !variable.include {
            info!("Variable {} is not included in the calculations", variable.name);
            return Err(RankingError::VariableExcluded(variable.name.clone()));
        }
        Ok(())
    }

    fn require_key(&self) -> Result<VariableId> {
        self.sort_key().ok_or(RankingError::Unsorted)
    }

    /// Rank all columns against `var`.
    pub fn set_sort_key(
        &mut self,
        var: VariableId,
        filter: RowFilter,
        p_value: f32,
        missing_threshold: f32,
    ) -> Result<()> {
        self.included(var)?;
        validate_p_value(p_value)?;
        validate_missing_threshold(missing_threshold)?;

        let quiet = self.cancel();
        quiet.with_live(|live| {
            live.sort_key = Some(var);
            live.filter = filter;
            live.config.p_value = p_value;
            live.config.missing_threshold = missing_threshold;
            live.table.clear_scores();
        });
        self.launch(Job::Rank(SortAlgorithm::Quicksort))
    }

    /// Recompute every score and reorder.
    pub fn resort(&mut self) -> Result<()> {
        self.require_key()?;
        let quiet = self.cancel();
        quiet.with_live(|live| live.table.clear_scores());
        self.launch(Job::Rank(SortAlgorithm::Quicksort))
    }

    /// Move the row filter and re-rank incrementally.
    ///
    /// Scores are recomputed during an insertion pass over the current
    /// order on the orchestration thread; when the filter moved only a
    /// little, the current order is nearly sorted and the pass is short.
    pub fn resort_with_filter(&mut self, filter: RowFilter) -> Result<()> {
        self.require_key()?;
        let quiet = self.cancel();
        quiet.with_live(|live| {
            live.filter = filter;
            live.table.clear_scores();
        });
        self.launch(Job::Inline)
    }

    /// Change the statistical parameters and re-rank.
    pub fn resort_with_params(&mut self, p_value: f32, missing_threshold: f32) -> Result<()> {
        self.require_key()?;
        validate_p_value(p_value)?;
        validate_missing_threshold(missing_threshold)?;
        let quiet = self.cancel();
        quiet.with_live(|live| {
            live.config.p_value = p_value;
            live.config.missing_threshold = missing_threshold;
            live.table.clear_scores();
        });
        self.launch(Job::Rank(SortAlgorithm::Quicksort))
    }

    /// Score only the uncomputed columns (typically `var`, just added) and
    /// reorder. Insertion sort is used when the interrupted sort was nearly
    /// done.
    pub fn sort_column(&mut self, var: VariableId) -> Result<()> {
        self.require_key()?;
        if !self.shared.live.read().table.contains(var) {
            let name = self.shared.name_of(var);
            info!("Variable {} is not included in the columns, skipping sorting", name);
            return Err(RankingError::NotAColumn(name));
        }
        let fraction = self.progress();
        drop(self.cancel());
        let algorithm = if fraction < INSERTION_PROGRESS {
            SortAlgorithm::Quicksort
        } else {
            SortAlgorithm::Insertion
        };
        self.launch(Job::Rank(algorithm))
    }

    /// Clear the reference variable and restore the natural column order.
    pub fn unsort(&mut self) -> Result<()> {
        if self.sort_key().is_none() {
            return Ok(());
        }
        let quiet = self.cancel();
        quiet.with_live(|live| {
            live.sort_key = None;
            live.table.clear_scores();
        });
        self.launch(Job::Natural)
    }

    /// Cancel and clear the reference variable, keeping the current order.
    pub fn stop_sorting(&mut self) {
        let quiet = self.cancel();
        quiet.with_live(|live| live.sort_key = None);
    }

    // ---------------------------------------------------------------------
    // Column management
    // ---------------------------------------------------------------------

    /// Add a column; returns its position at insertion time.
    ///
    /// Unsorted: inserted at its natural position. Sorted: appended with no
    /// score, then scored and moved into place by
    /// [`sort_column`](Self::sort_column).
    pub fn add_column(&mut self, var: VariableId) -> Result<usize> {
        self.included(var)?;
        if let Some(idx) = self.shared.live.read().table.position(var) {
            return Ok(idx);
        }
        if self.sort_key().is_none() {
            let quiet = self.wait();
            return Ok(quiet.with_live(|live| live.table.insert_natural(var)));
        }
        let idx = {
            let quiet = self.cancel();
            quiet.with_live(|live| live.table.push(var))
        };
        self.sort_column(var)?;
        Ok(idx)
    }

    /// Add several columns; returns how many were added.
    pub fn add_columns(&mut self, vars: &[VariableId]) -> Result<usize> {
        let candidates: Vec<VariableId> = vars
            .iter()
            .copied()
            .filter(|&var| {
                self.included(var).is_ok() && !self.shared.live.read().table.contains(var)
            })
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let sorted = self.sort_key().is_some();
        {
            let quiet = if sorted { self.cancel() } else { self.wait() };
            quiet.with_live(|live| {
                for &var in &candidates {
                    if live.table.contains(var) {
                        continue;
                    }
                    if sorted {
                        live.table.push(var);
                    } else {
                        live.table.insert_natural(var);
                    }
                }
            });
        }
        if sorted {
            self.resort()?;
        }
        Ok(candidates.len())
    }

    /// Remove a column. A ranking in flight is cancelled and restarted.
    pub fn remove_column(&mut self, var: VariableId) -> Result<bool> {
        self.remove_columns(&[var], None).map(|n| n > 0)
    }

    /// Remove every column in `vars` except `except`; returns how many were
    /// removed.
    pub fn remove_columns(
        &mut self,
        vars: &[VariableId],
        except: Option<VariableId>,
    ) -> Result<usize> {
        let targets: Vec<VariableId> = {
            let live = self.shared.live.read();
            vars.iter()
                .copied()
                .filter(|&var| Some(var) != except && live.table.contains(var))
                .collect()
        };
        if targets.is_empty() {
            return Ok(0);
        }

        let was_sorting = self.is_sorting() && self.sort_key().is_some();
        let removed = {
            let quiet = if was_sorting { self.cancel() } else { self.wait() };
            quiet.with_live(|live| {
                targets.iter().filter(|&&var| live.table.remove(var)).count()
            })
        };
        if was_sorting {
            self.resort()?;
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Covariates
    // ---------------------------------------------------------------------

    pub fn covariate_count(&self) -> usize {
        self.shared.live.read().covariates.len()
    }

    pub fn covariates(&self) -> Vec<VariableId> {
        self.shared.live.read().covariates.clone()
    }

    /// Covariate at position `idx`.
    pub fn covariate(&self, idx: usize) -> Option<VariableId> {
        self.shared.live.read().covariates.get(idx).copied()
    }

    pub fn covariate_position(&self, var: VariableId) -> Option<usize> {
        self.shared.live.read().covariates.iter().position(|&v| v == var)
    }

    /// Add a covariate; returns its position. Adding an existing covariate
    /// returns its current position.
    ///
    /// Covariates do not take part in the ranking, so a running operation
    /// is left alone.
    pub fn add_covariate(&mut self, var: VariableId) -> Result<usize> {
        self.included(var)?;
        let mut live = self.shared.live.write();
        if let Some(idx) = live.covariates.iter().position(|&v| v == var) {
            return Ok(idx);
        }
        live.covariates.push(var);
        debug!("Added covariate {}", self.shared.name_of(var));
        Ok(live.covariates.len() - 1)
    }

    /// Remove a covariate; returns whether it was one.
    pub fn remove_covariate(&mut self, var: VariableId) -> bool {
        let mut live = self.shared.live.write();
        let before = live.covariates.len();
        live.covariates.retain(|&v| v != var);
        live.covariates.len() < before
    }
}

impl<S: DataSource + 'static> Drop for RankingEngine<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DependencyTestKind;
    use crate::data::{DataTable, Range};
    use crate::ranking::ClosureProgressReporter;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    /// x, 2x, noise, a categorical step of x, and a text column.
    fn table(n: usize) -> DataTable {
        let mut rng = StdRng::seed_from_u64(42);
        let x: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64)).collect();
        let double: Vec<Option<f64>> = (0..n).map(|i| Some(2.0 * i as f64)).collect();
        let noise: Vec<Option<f64>> = (0..n).map(|_| Some(rng.r#gen::<f64>())).collect();
        let step: Vec<Option<&str>> = (0..n)
            .map(|i| Some(if i < n / 2 { "low" } else { "high" }))
            .collect();
        let notes: Vec<Option<String>> = (0..n).map(|i| Some(format!("row {}", i))).collect();
        DataTable::builder()
            .numeric("x", x)
            .numeric("double", double)
            .numeric("noise", noise)
            .categorical("step", step)
            .text("notes", notes)
            .build()
            .unwrap()
    }

    fn config() -> RankingConfig {
        RankingConfig::builder()
            .dependency_test(DependencyTestKind::GammaTest)
            .worker_threads(2)
            .surrogate_seed(7)
            .build()
            .unwrap()
    }

    fn engine(n: usize) -> RankingEngine<DataTable> {
        RankingEngine::new(table(n), config()).unwrap()
    }

    fn assert_ranked(engine: &RankingEngine<DataTable>) {
        let table = engine.table();
        let scores: Vec<f32> = table
            .iter()
            .map(|c| c.score.expect("all scores computed"))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]), "not ranked: {:?}", scores);
    }

    #[test]
    fn test_initial_state_is_unsorted() {
        let engine = engine(50);
        assert_eq!(engine.state(), RankingState::Unsorted);
        assert_eq!(engine.progress(), 0.0);
        // The text column is not a column.
        assert_eq!(engine.columns(), (0..4).map(VariableId).collect::<Vec<_>>());
    }

    #[test]
    fn test_sort_ranks_columns() {
        let mut engine = engine(300);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());

        assert_eq!(engine.state(), RankingState::Sorted);
        assert_eq!(engine.progress(), 1.0);
        assert_ranked(&engine);
        // With two x-bins, binned x is the step column, so x, double and
        // step may tie at 1; the order within the tie is not asserted.
        let score = |var| engine.score(VariableId(var)).unwrap().unwrap();
        assert!(score(0) > 0.99, "x scored {}", score(0));
        assert!(score(1) > 0.99, "double scored {}", score(1));
        assert!(score(2) < score(3), "noise {} vs step {}", score(2), score(3));
        assert_eq!(engine.columns().last(), Some(&VariableId(2)));
    }

    #[test]
    fn test_excluded_key_is_rejected() {
        let mut engine = engine(20);
        let result = engine.set_sort_key(VariableId(4), RowFilter::new(), 0.05, 0.8);
        assert!(matches!(result, Err(RankingError::VariableExcluded(_))));
        assert!(engine.is_unsorted());
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let mut engine = engine(20);
        assert!(engine.set_sort_key(VariableId(0), RowFilter::new(), 0.0, 0.8).is_err());
        assert!(engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 1.5).is_err());
        assert!(matches!(engine.resort(), Err(RankingError::Unsorted)));
    }

    #[test]
    fn test_unsort_restores_natural_order() {
        let mut engine = engine(200);
        engine.set_sort_key(VariableId(2), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());
        engine.unsort().unwrap();
        drop(engine.wait());

        assert!(engine.is_unsorted());
        assert_eq!(engine.columns(), (0..4).map(VariableId).collect::<Vec<_>>());
    }

    #[test]
    fn test_filter_resort_scores_inline() {
        let mut engine = engine(300);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());

        let filter = RowFilter::new().with(VariableId(0), Range::interval(0.0, 150.0));
        engine.resort_with_filter(filter.clone()).unwrap();
        drop(engine.wait());

        assert_eq!(engine.filter(), filter);
        assert_eq!(engine.progress(), 1.0);
        assert_ranked(&engine);
    }

    #[test]
    fn test_resort_with_params_updates_config() {
        let mut engine = engine(100);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        engine.resort_with_params(0.01, 0.5).unwrap();
        drop(engine.wait());
        let config = engine.config();
        assert_eq!(config.p_value, 0.01);
        assert_eq!(config.missing_threshold, 0.5);
        assert_ranked(&engine);
    }

    #[test]
    fn test_stop_sorting_clears_key() {
        let mut engine = engine(100);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        engine.stop_sorting();
        assert!(engine.is_unsorted());
        assert!(!engine.is_sorting());
        assert_eq!(engine.column_count(), 4);
    }

    #[test]
    fn test_add_and_remove_columns_unsorted() {
        let mut engine = engine(30);
        assert!(engine.remove_column(VariableId(1)).unwrap());
        assert!(!engine.remove_column(VariableId(1)).unwrap());
        assert_eq!(engine.add_column(VariableId(1)).unwrap(), 1);
        assert_eq!(engine.add_column(VariableId(1)).unwrap(), 1);
        assert!(matches!(
            engine.add_column(VariableId(4)),
            Err(RankingError::VariableExcluded(_))
        ));

        let removed = engine
            .remove_columns(&[VariableId(0), VariableId(2), VariableId(3)], Some(VariableId(3)))
            .unwrap();
        assert_eq!(removed, 2);
        let added = engine
            .add_columns(&[VariableId(2), VariableId(0), VariableId(4)])
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(engine.columns(), (0..4).map(VariableId).collect::<Vec<_>>());
    }

    #[test]
    fn test_add_column_while_sorted_scores_it() {
        let mut engine = engine(200);
        engine.remove_column(VariableId(1)).unwrap();
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());

        engine.add_column(VariableId(1)).unwrap();
        drop(engine.wait());
        assert!(engine.score(VariableId(1)).unwrap().is_some());
        assert_eq!(engine.columns().iter().filter(|&&v| v == VariableId(1)).count(), 1);
        assert_ranked(&engine);
    }

    #[test]
    fn test_sort_column_requires_column() {
        let mut engine = engine(50);
        engine.remove_column(VariableId(3)).unwrap();
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        assert!(matches!(
            engine.sort_column(VariableId(3)),
            Err(RankingError::NotAColumn(_))
        ));
        assert!(matches!(
            engine.score(VariableId(3)),
            Err(RankingError::NotAColumn(_))
        ));
    }

    #[test]
    fn test_cancel_is_quiescent_and_repeatable() {
        let mut engine = engine(2000);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        let columns = engine.cancel().columns();
        assert_eq!(columns.len(), 4);
        assert!(!engine.is_sorting());
        drop(engine.cancel());
        assert_eq!(engine.table().len(), engine.column_count());
    }

    #[test]
    fn test_profile_rows() {
        let mut engine = engine(100);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());
        let rows = engine.profile(&[VariableId(1), VariableId(4)]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "double");
        assert!(rows[0].score.is_some());

        let json = engine.profile_json(&[VariableId(1)]).unwrap();
        let parsed: Vec<ProfileRow> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_covariates_are_gated_and_deduplicated() {
        let mut engine = engine(50);
        assert_eq!(engine.covariate_count(), 0);
        assert_eq!(engine.add_covariate(VariableId(2)).unwrap(), 0);
        assert_eq!(engine.add_covariate(VariableId(0)).unwrap(), 1);
        assert_eq!(engine.add_covariate(VariableId(2)).unwrap(), 0);
        assert!(matches!(
            engine.add_covariate(VariableId(4)),
            Err(RankingError::VariableExcluded(_))
        ));
        assert!(matches!(
            engine.add_covariate(VariableId(9)),
            Err(RankingError::VariableNotFound(_))
        ));

        assert_eq!(engine.covariate_count(), 2);
        assert_eq!(engine.covariate(1), Some(VariableId(0)));
        assert_eq!(engine.covariate(2), None);
        assert_eq!(engine.covariate_position(VariableId(2)), Some(0));

        assert!(engine.remove_covariate(VariableId(2)));
        assert!(!engine.remove_covariate(VariableId(2)));
        assert_eq!(engine.covariates(), vec![VariableId(0)]);
        // Covariates are independent of the columns.
        assert_eq!(engine.column_count(), 4);
    }

    #[test]
    fn test_covariates_survive_a_running_sort() {
        let mut engine = engine(1000);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        engine.add_covariate(VariableId(3)).unwrap();
        drop(engine.wait());
        assert_eq!(engine.covariates(), vec![VariableId(3)]);
        assert_eq!(engine.state(), RankingState::Sorted);
        assert_ranked(&engine);
    }

    #[test]
    fn test_export_uses_current_filter() {
        let mut engine = engine(20);
        let filter = RowFilter::new().with(VariableId(0), Range::interval(0.0, 4.0));
        engine.set_sort_key(VariableId(0), filter, 0.05, 0.8).unwrap();
        drop(engine.wait());
        let (data, dictionary) = engine.export_table(&[VariableId(0), VariableId(3)]).unwrap();
        assert_eq!(data.shape(), (5, 2));
        assert_eq!(dictionary.height(), 2);
    }

    #[test]
    fn test_reporter_sees_completion() {
        let updates = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let mut engine = RankingEngine::new(table(100), config())
            .unwrap()
            .with_reporter(ClosureProgressReporter::new(move |update: ProgressUpdate| {
                sink.lock().push(update.stage);
            }));
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        drop(engine.wait());

        let stages = updates.lock().clone();
        assert_eq!(stages.iter().filter(|s| **s == RankingStage::Scoring).count(), 4);
        assert_eq!(stages.last(), Some(&RankingStage::Complete));
    }

    #[test]
    fn test_handle_reads_from_other_threads() {
        let mut engine = engine(100);
        engine.set_sort_key(VariableId(0), RowFilter::new(), 0.05, 0.8).unwrap();
        let handle = engine.handle();
        let reader = std::thread::spawn(move || {
            let p = handle.progress();
            assert!((0.0..=1.0).contains(&p));
            handle.columns().len()
        });
        assert_eq!(reader.join().unwrap(), 4);
        drop(engine.wait());
        assert_eq!(engine.handle().sort_key(), Some(VariableId(0)));
    }
}
