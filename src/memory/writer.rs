//! 后台记忆写入
//!
//! 每轮结束后的记录写入不阻塞用户回复：Orchestrator 把记录投递到无界队列，
//! 由单个后台 worker 顺序写入（经 MemoryRetriever，故同样受 memory 熔断器保护）。
//! 写入失败只记日志与计数，不会回传到请求路径。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::record::NewMemory;
use super::retrieval::MemoryRetriever;

enum WriterCommand {
    Save(NewMemory),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// 写入统计
#[derive(Debug, Default)]
pub struct WriterStats {
    pub written: AtomicU64,
    pub failed: AtomicU64,
}

/// 后台写入器句柄（可克隆，多处投递）
#[derive(Clone)]
pub struct MemoryWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    stats: Arc<WriterStats>,
}

impl MemoryWriter {
    /// 启动 worker，返回句柄与 worker 的 JoinHandle（所有句柄 drop 后 worker 退出）
    pub fn spawn(retriever: Arc<MemoryRetriever>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterCommand>();
        let stats = Arc::new(WriterStats::default());
        let worker_stats = Arc::clone(&stats);

        let handle = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    WriterCommand::Save(memory) => {
                        let session = memory.session_id.clone();
                        match retriever.save(memory).await {
                            Ok(id) => {
                                worker_stats.written.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(record_id = %id, session = %session, "memory record written");
                            }
                            Err(e) => {
                                worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(session = %session, error = %e, "memory write failed");
                            }
                        }
                    }
                    WriterCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                    WriterCommand::Shutdown(done) => {
                        rx.close();
                        let _ = done.send(());
                        break;
                    }
                }
            }
            tracing::debug!("memory writer stopped");
        });

        (Self { tx, stats }, handle)
    }

    /// 投递一条记录；worker 已退出时返回 false
    pub fn submit(&self, memory: NewMemory) -> bool {
        if self.tx.send(WriterCommand::Save(memory)).is_err() {
            tracing::warn!("memory writer is closed, record dropped");
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// 等待此前投递的记录全部处理完
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// 写完已投递的记录后停止 worker；之后的 submit 返回 false
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::{InMemoryMemoryStore, MemoryError, MemoryQuery, MemoryStore};
    use crate::memory::record::MemoryRecord;
    use crate::resilience::{BreakerConfig, CircuitBreaker};
    use async_trait::async_trait;
    use std::time::Duration;

    struct BrokenStore;

    #[async_trait]
    impl MemoryStore for BrokenStore {
        async fn save(&self, _memory: NewMemory) -> Result<String, MemoryError> {
            Err(MemoryError::Backend("disk full".into()))
        }
        async fn query(&self, _query: &MemoryQuery) -> Result<Vec<MemoryRecord>, MemoryError> {
            Ok(Vec::new())
        }
        async fn prune(&self) -> Result<usize, MemoryError> {
            Ok(0)
        }
    }

    fn retriever(store: Arc<dyn MemoryStore>) -> Arc<MemoryRetriever> {
        Arc::new(MemoryRetriever::new(
            store,
            Arc::new(CircuitBreaker::new("memory", BreakerConfig::storage())),
            Duration::ZERO,
        ))
    }

    #[tokio::test]
    async fn test_submit_then_flush_persists() {
        let store = Arc::new(InMemoryMemoryStore::default());
        let (writer, _handle) = MemoryWriter::spawn(retriever(store.clone()));
        assert!(writer.submit(NewMemory::turn("u1", "s1", "hello")));
        assert!(writer.submit(NewMemory::turn("u1", "s1", "world")));
        writer.flush().await;
        assert_eq!(writer.written(), 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_propagated() {
        let (writer, _handle) = MemoryWriter::spawn(retriever(Arc::new(BrokenStore)));
        writer.submit(NewMemory::turn("u1", "s1", "lost"));
        writer.flush().await;
        assert_eq!(writer.failed(), 1);
        assert_eq!(writer.written(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let store = Arc::new(InMemoryMemoryStore::default());
        let (writer, handle) = MemoryWriter::spawn(retriever(store.clone()));
        writer.submit(NewMemory::turn("u1", "s1", "last words"));
        writer.shutdown().await;
        assert_eq!(store.len().await, 1);
        assert!(!writer.submit(NewMemory::turn("u1", "s1", "too late")));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_exits_when_handles_dropped() {
        let store = Arc::new(InMemoryMemoryStore::default());
        let (writer, handle) = MemoryWriter::spawn(retriever(store));
        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
