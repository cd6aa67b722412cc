use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{models::ParameterSpec, traits::Job};

/// 作业类型目录信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTypeInfo {
    pub job_type: String,
    pub name: String,
    pub description: String,
    pub abortable: bool,
    pub parameters: Vec<ParameterSpec>,
}

/// 作业类型键到作业实现的映射
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Arc<dyn Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 注册作业实现，同名键会被替换
    pub async fn register(&self, job_type: impl Into<String>, job: Arc<dyn Job>) {
        let job_type = job_type.into();
        let mut jobs = self.jobs.write().await;
        if jobs.insert(job_type.clone(), job).is_some() {
            warn!("作业类型 {} 已存在，使用新的实现替换", job_type);
        } else {
            debug!("注册作业类型: {}", job_type);
        }
    }

    pub async fn register_batch(&self, entries: Vec<(String, Arc<dyn Job>)>) {
        let mut jobs = self.jobs.write().await;
        for (job_type, job) in entries {
            jobs.insert(job_type, job);
        }
    }

    pub async fn get(&self, job_type: &str) -> Option<Arc<dyn Job>> {
        let jobs = self.jobs.read().await;
        jobs.get(job_type).cloned()
    }

    pub async fn contains(&self, job_type: &str) -> bool {
        let jobs = self.jobs.read().await;
        jobs.contains_key(job_type)
    }

    pub async fn unregister(&self, job_type: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        jobs.remove(job_type).is_some()
    }

    pub async fn list_job_types(&self) -> Vec<String> {
        let jobs = self.jobs.read().await;
        let mut keys: Vec<String> = jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 所有已注册作业的目录，按类型键排序
    pub async fn catalogue(&self) -> Vec<JobTypeInfo> {
        let jobs = self.jobs.read().await;
        let mut infos: Vec<JobTypeInfo> = jobs
            .iter()
            .map(|(job_type, job)| JobTypeInfo {
                job_type: job_type.clone(),
                name: job.name().to_string(),
                description: job.description().to_string(),
                abortable: job.is_abortable(),
                parameters: job.parameters(),
            })
            .collect();
        infos.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        infos
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
