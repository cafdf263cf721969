use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::plotdata::PlottableData;
use crate::RenderOptions;

/// Everything needed to produce one artifact. Self-contained: no job refers to
/// another job or to shared mutable state.
#[derive(Debug, Clone, Serialize)]
pub struct RenderJob {
    pub output_path: PathBuf,
    pub target: String,
    pub mode: String,
    /// Plot descriptors per group, in panel order.
    pub plots_by_group: IndexMap<String, Vec<PlottableData>>,
    /// Display label per group.
    pub group_labels: IndexMap<String, String>,
    pub x_label: String,
    pub y_label: Option<String>,
    pub x_bounds: Option<(f64, f64)>,
    /// Shared y limits. `None` lets every panel fit its own data.
    pub y_bounds: Option<(f64, f64)>,
    pub semilog_y: bool,
    pub combine_groups: bool,
    pub title: Option<String>,
    pub x_ticks: Option<Vec<(f64, String)>>,
    pub options: RenderOptions,
}

impl RenderJob {
    pub fn group_label<'s>(&'s self, group: &'s str) -> &'s str {
        self.group_labels.get(group).map(|s| s.as_str()).unwrap_or(group)
    }
}

/// Turns a job into a persisted artifact.
pub trait Renderer: Send + Sync {
    fn render(&self, job: &RenderJob) -> anyhow::Result<()>;
}

/// Handle of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    id: usize,
    output_path: PathBuf,
}

impl JobHandle {
    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }
}

type Outcome = (usize, std::result::Result<(), String>);

/// Runs render jobs on a dedicated thread pool and joins them with progress reports.
pub struct RenderDispatcher {
    pool: rayon::ThreadPool,
    renderer: Arc<dyn Renderer>,
    sender: Sender<Outcome>,
    receiver: Receiver<Outcome>,
    next_id: usize,
}

impl RenderDispatcher {
    /// `threads == 0` uses one thread per core.
    pub fn new(renderer: Arc<dyn Renderer>, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("render-{}", i))
            .build()
            .map_err(|e| AnalysisError::configuration(format!("cannot start render pool: {}", e)))?;
        let (sender, receiver) = unbounded();
        Ok(Self {
            pool,
            renderer,
            sender,
            receiver,
            next_id: 0,
        })
    }

    pub fn submit(&mut self, job: RenderJob) -> JobHandle {
        let id = self.next_id;
        self.next_id += 1;
        let handle = JobHandle {
            id,
            output_path: job.output_path.clone(),
        };

        let renderer = Arc::clone(&self.renderer);
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&job))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(payload) => Err(panic_message(payload.as_ref())),
            };
            // The receiver is gone only when the join already failed.
            let _ = sender.send((id, outcome));
        });
        handle
    }

    /// Block until every handle completed. Once per elapsed `period`,
    /// `progress(remaining, total)` is called whether or not jobs finished in
    /// the meantime. The first failure aborts the join.
    pub fn join<F>(&self, handles: &[JobHandle], period: Duration, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let total = handles.len();
        let mut pending: HashMap<usize, &PathBuf> = handles.iter().map(|h| (h.id, &h.output_path)).collect();
        let mut last_report = Instant::now();

        while !pending.is_empty() {
            if last_report.elapsed() >= period {
                progress(pending.len(), total);
                last_report = Instant::now();
            }
            let wait = period.saturating_sub(last_report.elapsed());
            match self.receiver.recv_timeout(wait) {
                Ok((id, Ok(()))) => {
                    if let Some(path) = pending.remove(&id) {
                        debug!("rendered {}", path.display());
                    }
                }
                Ok((id, Err(message))) => {
                    let path = pending
                        .get(&id)
                        .map(|p| p.to_path_buf())
                        .unwrap_or_default();
                    return Err(AnalysisError::Render { path, message });
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AnalysisError::Render {
                        path: PathBuf::new(),
                        message: "render pool stopped before all jobs completed".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Submit all `jobs` and join them.
    pub fn run<F>(mut self, jobs: Vec<RenderJob>, period: Duration, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let handles: Vec<JobHandle> = jobs.into_iter().map(|job| self.submit(job)).collect();
        self.join(&handles, period, progress)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("render job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("render job panicked: {}", s)
    } else {
        "render job panicked".to_string()
    }
}
