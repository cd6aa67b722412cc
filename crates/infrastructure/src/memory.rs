//! 内存存储
//!
//! 所有集合放在同一把锁之后，认领、条件转换和统计快照都在一次加锁内完成。
//! 用于测试以及 `database.url = "memory"` 的单机运行。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobsched_core::{
    models::{
        DefinitionSummary, Execution, ExecutionFilter, ExecutionStatus, ExecutionSummary,
        ExecutionTransition, JobDefinition, LogEntry, NodeInfo, Page, PageRequest, StatsQuery,
        StatsSnapshot, Trigger, TriggerFireUpdate,
    },
    traits::{
        DefinitionStateUpdate, ExecutionRepository, JobDefinitionRepository, NodeRepository,
        StatsRepository, TriggerRepository,
    },
    SchedulerError, SchedulerResult,
};

#[derive(Debug, Default)]
struct MemoryState {
    definitions: BTreeMap<i64, JobDefinition>,
    triggers: BTreeMap<i64, Trigger>,
    executions: BTreeMap<i64, Execution>,
    logs: HashMap<i64, Vec<LogEntry>>,
    nodes: HashMap<String, NodeInfo>,
    next_definition_id: i64,
    next_trigger_id: i64,
    next_execution_id: i64,
}

impl MemoryState {
    fn code_taken(&self, code: &str, except: Option<i64>) -> bool {
        self.definitions
            .values()
            .any(|d| d.code == code && Some(d.id) != except)
    }
}

/// 实现全部仓库接口的内存存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> SchedulerResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| SchedulerError::Internal(format!("内存存储锁已损坏: {}", e)))
    }
}

fn duplicate_code(code: &str) -> SchedulerError {
    SchedulerError::Conflict(format!("作业定义编码已存在: {}", code))
}

#[async_trait]
impl JobDefinitionRepository for InMemoryStore {
    async fn create(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let mut state = self.state()?;
        if state.code_taken(&definition.code, None) {
            return Err(duplicate_code(&definition.code));
        }

        state.next_definition_id += 1;
        let now = Utc::now();
        let mut created = definition.clone();
        created.id = state.next_definition_id;
        created.created_at = now;
        created.updated_at = now;
        state.definitions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<JobDefinition>> {
        Ok(self.state()?.definitions.get(&id).cloned())
    }

    async fn get_by_code(&self, code: &str) -> SchedulerResult<Option<JobDefinition>> {
        Ok(self
            .state()?
            .definitions
            .values()
            .find(|d| d.code == code)
            .cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>> {
        Ok(self.state()?.definitions.values().cloned().collect())
    }

    async fn update(&self, definition: &JobDefinition) -> SchedulerResult<JobDefinition> {
        let mut state = self.state()?;
        if state.code_taken(&definition.code, Some(definition.id)) {
            return Err(duplicate_code(&definition.code));
        }

        let existing = state
            .definitions
            .get_mut(&definition.id)
            .ok_or_else(|| SchedulerError::definition_not_found(definition.id))?;
        existing.code = definition.code.clone();
        existing.name = definition.name.clone();
        existing.description = definition.description.clone();
        existing.job_type = definition.job_type.clone();
        existing.enabled = definition.enabled;
        existing.parameters = definition.parameters.clone();
        existing.log_level = definition.log_level;
        existing.max_retry_count = definition.max_retry_count;
        existing.retry_count = existing.retry_count.min(definition.max_retry_count);
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn update_state(&self, id: i64, update: &DefinitionStateUpdate) -> SchedulerResult<()> {
        let mut state = self.state()?;
        let definition = state
            .definitions
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::definition_not_found(id))?;

        if let Some(status) = update.status {
            definition.status = status;
        }
        if update.last_start_time.is_some() {
            definition.last_start_time = update.last_start_time;
        }
        if update.last_end_time.is_some() {
            definition.last_end_time = update.last_end_time;
        }
        if update.last_result.is_some() {
            definition.last_result = update.last_result.clone();
        }
        if let Some(retry_count) = update.retry_count {
            definition.retry_count = retry_count;
        }
        definition.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        Ok(self.state()?.definitions.remove(&id).is_some())
    }
}

#[async_trait]
impl TriggerRepository for InMemoryStore {
    async fn create(&self, trigger: &Trigger) -> SchedulerResult<Trigger> {
        let mut state = self.state()?;
        if !state.definitions.contains_key(&trigger.job_definition_id) {
            return Err(SchedulerError::definition_not_found(trigger.job_definition_id));
        }

        state.next_trigger_id += 1;
        let now = Utc::now();
        let mut created = trigger.clone();
        created.id = state.next_trigger_id;
        created.claim_owner = None;
        created.claim_expiry = None;
        created.created_at = now;
        created.updated_at = now;
        state.triggers.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Trigger>> {
        Ok(self.state()?.triggers.get(&id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<Trigger>> {
        Ok(self.state()?.triggers.values().cloned().collect())
    }

    async fn list_by_definition(&self, job_definition_id: i64) -> SchedulerResult<Vec<Trigger>> {
        Ok(self
            .state()?
            .triggers
            .values()
            .filter(|t| t.job_definition_id == job_definition_id)
            .cloned()
            .collect())
    }

    async fn update(&self, trigger: &Trigger) -> SchedulerResult<Trigger> {
        let mut state = self.state()?;
        let existing = state
            .triggers
            .get_mut(&trigger.id)
            .ok_or_else(|| SchedulerError::trigger_not_found(trigger.id))?;

        existing.job_definition_id = trigger.job_definition_id;
        existing.name = trigger.name.clone();
        existing.description = trigger.description.clone();
        existing.cron_expression = trigger.cron_expression.clone();
        existing.enabled = trigger.enabled;
        existing.start_time = trigger.start_time;
        existing.end_time = trigger.end_time;
        existing.timezone = trigger.timezone.clone();
        existing.priority = trigger.priority;
        existing.misfire_policy = trigger.misfire_policy;
        existing.max_fire_count = trigger.max_fire_count;
        existing.next_fire_time = trigger.next_fire_time;
        existing.claim_owner = None;
        existing.claim_expiry = None;
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    async fn delete(&self, id: i64) -> SchedulerResult<bool> {
        Ok(self.state()?.triggers.remove(&id).is_some())
    }

    async fn delete_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64> {
        let mut state = self.state()?;
        let before = state.triggers.len();
        state
            .triggers
            .retain(|_, t| t.job_definition_id != job_definition_id);
        Ok((before - state.triggers.len()) as u64)
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<Trigger>> {
        let state = self.state()?;
        let mut due: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| t.is_due_at(now))
            .filter(|t| {
                state
                    .definitions
                    .get(&t.job_definition_id)
                    .is_some_and(|d| d.enabled)
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.next_fire_time.cmp(&b.next_fire_time))
                .then(a.id.cmp(&b.id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn try_claim(
        &self,
        trigger_id: i64,
        node_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let mut state = self.state()?;
        let Some(trigger) = state.triggers.get_mut(&trigger_id) else {
            return Ok(false);
        };
        if !trigger.is_claimable_at(now) {
            return Ok(false);
        }
        trigger.claim_owner = Some(node_id.to_string());
        trigger.claim_expiry = Some(lease_until);
        Ok(true)
    }

    async fn complete_fire(
        &self,
        trigger_id: i64,
        node_id: &str,
        update: &TriggerFireUpdate,
    ) -> SchedulerResult<bool> {
        let mut state = self.state()?;
        match state.triggers.get_mut(&trigger_id) {
            Some(trigger) if trigger.claim_owner.as_deref() == Some(node_id) => {
                trigger.apply_fire_update(update);
                trigger.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, trigger_id: i64, node_id: &str) -> SchedulerResult<bool> {
        let mut state = self.state()?;
        match state.triggers.get_mut(&trigger_id) {
            Some(trigger) if trigger.claim_owner.as_deref() == Some(node_id) => {
                trigger.claim_owner = None;
                trigger.claim_expiry = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryStore {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution> {
        let mut state = self.state()?;
        state.next_execution_id += 1;
        let mut created = execution.clone();
        created.id = state.next_execution_id;
        state.executions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Execution>> {
        Ok(self.state()?.executions.get(&id).cloned())
    }

    async fn find_active_by_definition(
        &self,
        job_definition_id: i64,
    ) -> SchedulerResult<Vec<Execution>> {
        Ok(self
            .state()?
            .executions
            .values()
            .filter(|e| e.job_definition_id == job_definition_id && e.status.is_active())
            .cloned()
            .collect())
    }

    async fn find_by_status(&self, status: ExecutionStatus) -> SchedulerResult<Vec<Execution>> {
        Ok(self
            .state()?
            .executions
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn count_by_definition(&self, job_definition_id: i64) -> SchedulerResult<u64> {
        Ok(self
            .state()?
            .executions
            .values()
            .filter(|e| e.job_definition_id == job_definition_id)
            .count() as u64)
    }

    async fn transition(&self, transition: &ExecutionTransition) -> SchedulerResult<bool> {
        let mut state = self.state()?;
        match state.executions.get_mut(&transition.execution_id) {
            Some(execution) if execution.status == transition.from => {
                execution.apply(transition);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(
        &self,
        filter: &ExecutionFilter,
        page: PageRequest,
    ) -> SchedulerResult<Page<Execution>> {
        let state = self.state()?;
        let matching: Vec<&Execution> = state
            .executions
            .values()
            .rev()
            .filter(|e| filter.matches(e))
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, total, page))
    }

    async fn append_logs(&self, execution_id: i64, entries: &[LogEntry]) -> SchedulerResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.state()?
            .logs
            .entry(execution_id)
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn get_logs(&self, execution_id: i64) -> SchedulerResult<Vec<LogEntry>> {
        Ok(self
            .state()?
            .logs
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn request_cancel(&self, execution_id: i64) -> SchedulerResult<bool> {
        let mut state = self.state()?;
        match state.executions.get_mut(&execution_id) {
            Some(execution) if execution.status == ExecutionStatus::Running => {
                execution.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_cancel_requested(&self, execution_id: i64) -> SchedulerResult<bool> {
        Ok(self
            .state()?
            .executions
            .get(&execution_id)
            .is_some_and(|e| e.cancel_requested))
    }
}

#[async_trait]
impl NodeRepository for InMemoryStore {
    async fn heartbeat(&self, node: &NodeInfo) -> SchedulerResult<()> {
        let mut state = self.state()?;
        state
            .nodes
            .entry(node.node_id.clone())
            .and_modify(|existing| existing.last_heartbeat = node.last_heartbeat)
            .or_insert_with(|| node.clone());
        Ok(())
    }

    async fn list_alive(&self, since: DateTime<Utc>) -> SchedulerResult<Vec<NodeInfo>> {
        let mut nodes: Vec<NodeInfo> = self
            .state()?
            .nodes
            .values()
            .filter(|n| n.is_alive(since))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(nodes)
    }
}

#[async_trait]
impl StatsRepository for InMemoryStore {
    async fn snapshot(&self, query: &StatsQuery) -> SchedulerResult<StatsSnapshot> {
        let state = self.state()?;

        let definitions = state
            .definitions
            .values()
            .map(|d| DefinitionSummary {
                id: d.id,
                code: d.code.clone(),
                name: d.name.clone(),
                enabled: d.enabled,
                status: d.status,
            })
            .collect();

        let executions = state
            .executions
            .values()
            .filter(|e| e.created_at >= query.from && e.created_at < query.to)
            .filter(|e| {
                query
                    .job_definition_id
                    .is_none_or(|id| e.job_definition_id == id)
            })
            .map(|e| ExecutionSummary {
                id: e.id,
                job_definition_id: e.job_definition_id,
                status: e.status,
                created_at: e.created_at,
                started_at: e.started_at,
                ended_at: e.ended_at,
            })
            .collect();

        Ok(StatsSnapshot {
            definitions,
            trigger_enabled: state.triggers.values().map(|t| t.enabled).collect(),
            executions,
            taken_at: Utc::now(),
        })
    }
}
