use crate::{models::TaskRecord, reconcile::Reconciler, security::AuthContext};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

/// Which reconciliation entry point a job invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Categories,
    Positions,
    Full,
}

impl RunKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "categories" => Some(Self::Categories),
            "positions" => Some(Self::Positions),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    kind: RunKind,
    context: AuthContext,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { tasks: Vec<TaskRecord> },
    Failed { tasks: Vec<TaskRecord> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Error)]
#[error("worker not available")]
pub struct QueueClosed;

impl JobQueue {
    /// One worker drains the queue, so runs of this dealer scope never overlap.
    pub fn spawn(reconciler: Reconciler) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running);
                }
                info!(
                    target = "catalog.jobs",
                    job = %job.id,
                    kind = ?job.kind,
                    operator = %job.context.operator,
                    "run started",
                );

                let tasks = match job.kind {
                    RunKind::Categories => vec![reconciler.update_categories().await],
                    RunKind::Positions => vec![reconciler.update_positions().await],
                    RunKind::Full => reconciler.run_full().await,
                };
                let ok = tasks.iter().all(|t| t.success == Some(true));
                let mut guard = statuses_bg.lock().await;
                if ok {
                    guard.insert(job.id, JobState::Completed { tasks });
                } else {
                    guard.insert(job.id, JobState::Failed { tasks });
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, kind: RunKind, context: AuthContext) -> Result<Uuid, QueueClosed> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job { id, kind, context };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(QueueClosed);
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}
