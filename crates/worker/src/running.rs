use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use jobsched_core::CancellationHandle;

/// 本节点上正在运行的执行
///
/// 可中止作业带有取消句柄，不可中止作业对应 `None`。
#[derive(Clone, Default)]
pub struct RunningExecutions {
    inner: Arc<RwLock<HashMap<i64, Option<CancellationHandle>>>>,
}

impl RunningExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, execution_id: i64, handle: Option<CancellationHandle>) {
        self.inner.write().await.insert(execution_id, handle);
    }

    pub async fn remove(&self, execution_id: i64) {
        self.inner.write().await.remove(&execution_id);
    }

    /// 置位本地取消标志，执行不在本节点或不可中止时返回 `false`
    pub async fn signal_cancel(&self, execution_id: i64) -> bool {
        let running = self.inner.read().await;
        match running.get(&execution_id) {
            Some(Some(handle)) => {
                handle.request();
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, execution_id: i64) -> bool {
        self.inner.read().await.contains_key(&execution_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_only_reaches_abortable_executions() {
        let running = RunningExecutions::new();
        let handle = CancellationHandle::new();
        running.insert(1, Some(handle.clone())).await;
        running.insert(2, None).await;

        assert!(running.signal_cancel(1).await);
        assert!(handle.is_requested());
        assert!(!running.signal_cancel(2).await);
        assert!(!running.signal_cancel(3).await);

        running.remove(1).await;
        assert_eq!(running.len().await, 1);
    }
}
