//! 传输线程池 - 固定数量的 worker 执行上传/下载任务
//!
//! 提交不阻塞；每个任务的结果（成功或失败）通过句柄取回，单个任务失败不影响其他任务。

use super::conflict::CollisionGuard;
use super::resolver::AlbumTarget;
use super::uploader::ChunkedUploader;
use crate::error::SyncError;
use crate::remote::{AlbumApi, ChunkReply};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 传输任务，提交后由线程池独占
#[derive(Debug, Clone)]
pub enum TransferTask {
    Upload {
        source: PathBuf,
        album: AlbumTarget,
    },
    Download {
        photo_id: String,
        url: String,
        directory: PathBuf,
        file_name: String,
    },
}

impl TransferTask {
    /// 用于日志和失败记录的操作描述
    pub fn describe(&self) -> String {
        match self {
            TransferTask::Upload { source, album } => {
                format!("上传 {} -> {}", source.display(), album)
            }
            TransferTask::Download {
                photo_id,
                directory,
                file_name,
                ..
            } => format!(
                "下载 {} -> {}",
                photo_id,
                directory.join(file_name).display()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskOutput {
    Uploaded {
        file_name: String,
        bytes: u64,
        /// 最后一块的服务器响应
        reply: ChunkReply,
    },
    Downloaded {
        path: PathBuf,
        bytes: u64,
    },
}

/// 失败描述：哪个操作，因为什么
#[derive(Debug)]
pub struct TaskFailure {
    pub operation: String,
    pub error: SyncError,
}

impl TaskFailure {
    pub fn new(operation: impl Into<String>, error: SyncError) -> Self {
        Self {
            operation: operation.into(),
            error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, SyncError::Cancelled)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.error)
    }
}

pub type TaskResult = std::result::Result<TaskOutput, TaskFailure>;

#[derive(Debug)]
pub struct TaskOutcome {
    pub id: Uuid,
    pub task: TransferTask,
    pub result: TaskResult,
}

/// 已提交任务的句柄
pub struct TaskHandle {
    id: Uuid,
    task: TransferTask,
    reply: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn task(&self) -> &TransferTask {
        &self.task
    }

    /// 等待任务结束
    pub async fn wait(self) -> TaskOutcome {
        let result = self.reply.await.unwrap_or_else(|_| {
            Err(TaskFailure::new(
                self.task.describe(),
                SyncError::TaskAborted("传输队列已关闭".to_string()),
            ))
        });
        TaskOutcome {
            id: self.id,
            task: self.task,
            result,
        }
    }
}

struct QueuedTask {
    id: Uuid,
    task: TransferTask,
    epoch: u64,
    reply: oneshot::Sender<TaskResult>,
}

/// worker 共享的执行环境
#[derive(Clone)]
pub struct TransferContext {
    pub api: Arc<dyn AlbumApi>,
    pub chunk_size: u64,
    pub guard: Arc<CollisionGuard>,
}

impl TransferContext {
    async fn execute(self, task: TransferTask) -> crate::Result<TaskOutput> {
        match task {
            TransferTask::Upload { source, album } => {
                let bytes = tokio::fs::metadata(&source).await?.len();
                let reply = ChunkedUploader::new(self.api.as_ref(), self.chunk_size)
                    .upload(&album, &source)
                    .await?;
                Ok(TaskOutput::Uploaded {
                    file_name: source
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    bytes,
                    reply,
                })
            }
            TransferTask::Download {
                photo_id,
                url,
                directory,
                file_name,
            } => {
                let path = self.guard.claim(&directory, &file_name, &photo_id);
                let bytes = self.download_to(&url, &path).await?;
                Ok(TaskOutput::Downloaded { path, bytes })
            }
        }
    }

    /// 先写入 `.part` 临时文件，完成后再改名
    async fn download_to(&self, url: &str, path: &Path) -> crate::Result<u64> {
        let mut part_name = path.as_os_str().to_owned();
        part_name.push(".part");
        let part_path = PathBuf::from(part_name);

        let result = async {
            let mut stream = self.api.open_download(url).await?;
            let mut file = tokio::fs::File::create(&part_path).await?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            tokio::fs::rename(&part_path, path).await?;
            Ok::<u64, SyncError>(written)
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&part_path).await;
        }
        result
    }
}

/// 传输管理器
pub struct TransferManager {
    sender: Option<mpsc::UnboundedSender<QueuedTask>>,
    workers: Vec<JoinHandle<()>>,
    epoch: Arc<AtomicU64>,
}

impl TransferManager {
    /// 启动 `max_workers` 个 worker，需要在 tokio 运行时内调用
    pub fn new(context: TransferContext, max_workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let epoch = Arc::new(AtomicU64::new(0));

        let workers = (0..max_workers.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    receiver.clone(),
                    context.clone(),
                    epoch.clone(),
                ))
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            epoch,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// 提交任务，立即返回句柄
    pub fn submit(&self, task: TransferTask) -> TaskHandle {
        let id = Uuid::new_v4();
        let (reply, receiver) = oneshot::channel();
        debug!("提交任务 {}: {}", id, task.describe());

        let queued = QueuedTask {
            id,
            task: task.clone(),
            epoch: self.epoch.load(Ordering::SeqCst),
            reply,
        };
        // 队列已关闭时 reply 随之丢弃，等待方会得到 TaskAborted
        if let Some(sender) = &self.sender {
            let _ = sender.send(queued);
        }

        TaskHandle {
            id,
            task,
            reply: receiver,
        }
    }

    /// 取消所有尚未开始的任务；正在执行的任务不受影响
    pub fn cancel_pending(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!("取消等待中的任务 (epoch {})", epoch);
    }

    /// 等待所有句柄完成，结果顺序与句柄顺序一致
    pub async fn drain(handles: Vec<TaskHandle>) -> Vec<TaskOutcome> {
        futures::future::join_all(handles.into_iter().map(TaskHandle::wait)).await
    }

    /// 关闭队列并等待 worker 退出，已提交的任务会先执行完
    pub async fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!("worker 异常退出: {}", e);
            }
        }
    }
}

async fn worker_loop(
    index: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<QueuedTask>>>,
    context: TransferContext,
    epoch: Arc<AtomicU64>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };

        let operation = queued.task.describe();
        let result = if queued.epoch < epoch.load(Ordering::SeqCst) {
            debug!("任务 {} 已取消", queued.id);
            Err(TaskFailure::new(operation, SyncError::Cancelled))
        } else {
            debug!("worker {} 开始: {}", index, operation);
            // 在单独的任务中执行，panic 只影响当前任务
            match tokio::spawn(context.clone().execute(queued.task)).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(error)) => {
                    warn!("{} 失败: {}", operation, error);
                    Err(TaskFailure::new(operation, error))
                }
                Err(e) => {
                    warn!("{} 异常终止: {}", operation, e);
                    Err(TaskFailure::new(operation, SyncError::TaskAborted(e.to_string())))
                }
            }
        };

        let _ = queued.reply.send(result);
    }
    debug!("worker {} 退出", index);
}

/// 一批传输的结果
#[derive(Debug)]
pub struct TransferReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<TaskOutcome>,
    /// 遍历目录/相册时失败的分支（创建相册、列目录等）
    pub walk_errors: Vec<TaskFailure>,
}

/// 结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub walk_errors: usize,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
    pub duration_ms: i64,
}

impl TransferReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// 没有任何任务或遍历分支失败
    pub fn is_success(&self) -> bool {
        self.walk_errors.is_empty() && self.failed().next().is_none()
    }

    pub fn summary(&self) -> TransferSummary {
        let mut summary = TransferSummary {
            total: self.outcomes.len(),
            walk_errors: self.walk_errors.len(),
            duration_ms: (self.finished_at - self.started_at).num_milliseconds(),
            ..Default::default()
        };

        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(TaskOutput::Uploaded { bytes, .. }) => {
                    summary.succeeded += 1;
                    summary.uploaded_bytes += bytes;
                }
                Ok(TaskOutput::Downloaded { bytes, .. }) => {
                    summary.succeeded += 1;
                    summary.downloaded_bytes += bytes;
                }
                Err(failure) if failure.is_cancelled() => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}
