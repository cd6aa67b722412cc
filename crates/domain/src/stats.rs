use std::collections::HashMap;

use chrono::{DateTime, DurationRound, Utc};

use jobsched_core::models::{
    DefinitionStatus, ExecutionStats, ExecutionStatus, ExecutionSummary, StatsQuery,
    StatsSnapshot, StatusCount, TopDefinition, TrendBucket,
};

/// 成功率（百分比），总数为 0 时返回 0
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}

/// 在一致性快照上计算统计
pub struct StatsAggregator;

impl StatsAggregator {
    pub fn aggregate(snapshot: &StatsSnapshot, query: &StatsQuery) -> ExecutionStats {
        let executions = &snapshot.executions;

        let count = |status: ExecutionStatus| {
            executions.iter().filter(|e| e.status == status).count() as u64
        };
        let successful = count(ExecutionStatus::Success);
        let total = executions.len() as u64;

        let definitions = &snapshot.definitions;
        let definitions_in = |status: DefinitionStatus| {
            definitions.iter().filter(|d| d.status == status).count() as u64
        };

        ExecutionStats {
            total_definitions: definitions.len() as u64,
            enabled_definitions: definitions.iter().filter(|d| d.enabled).count() as u64,
            running_definitions: definitions_in(DefinitionStatus::Running),
            failed_definitions: definitions_in(DefinitionStatus::Failed),
            total_executions: total,
            queued_executions: count(ExecutionStatus::Queued),
            running_executions: count(ExecutionStatus::Running),
            successful_executions: successful,
            failed_executions: count(ExecutionStatus::Failed),
            cancelled_executions: count(ExecutionStatus::Cancelled),
            success_rate: success_rate(successful, total),
            average_execution_ms: Self::average_duration_ms(executions),
            definition_status_distribution: Self::definition_distribution(snapshot),
            trigger_status_distribution: Self::trigger_distribution(snapshot),
            trend: Self::trend(executions, query),
            top_definitions: Self::top_definitions(snapshot, query.top_n),
            generated_at: snapshot.taken_at,
        }
    }

    fn average_duration_ms(executions: &[ExecutionSummary]) -> f64 {
        let durations: Vec<i64> = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Success)
            .filter_map(|e| match (e.started_at, e.ended_at) {
                (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
                _ => None,
            })
            .collect();

        if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        }
    }

    fn definition_distribution(snapshot: &StatsSnapshot) -> Vec<StatusCount> {
        let order = [
            DefinitionStatus::Unknown,
            DefinitionStatus::Running,
            DefinitionStatus::Finished,
            DefinitionStatus::Failed,
            DefinitionStatus::Cancelled,
            DefinitionStatus::Paused,
        ];

        order
            .iter()
            .map(|status| StatusCount {
                status: status.to_string(),
                count: snapshot
                    .definitions
                    .iter()
                    .filter(|d| d.status == *status)
                    .count() as u64,
            })
            .filter(|c| c.count > 0)
            .collect()
    }

    fn trigger_distribution(snapshot: &StatsSnapshot) -> Vec<StatusCount> {
        let active = snapshot.trigger_enabled.iter().filter(|e| **e).count() as u64;
        let paused = snapshot.trigger_enabled.len() as u64 - active;

        [("ACTIVE", active), ("PAUSED", paused)]
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(status, count)| StatusCount {
                status: status.to_string(),
                count,
            })
            .collect()
    }

    /// 按分桶粒度切分 `[from, to)`，桶的起点向下对齐到整点或整天（UTC）
    fn trend(executions: &[ExecutionSummary], query: &StatsQuery) -> Vec<TrendBucket> {
        let width = query.bucket.duration();
        let first = query.from.duration_trunc(width).unwrap_or(query.from);

        let mut buckets = Vec::new();
        let mut start = first;
        while start < query.to {
            buckets.push(TrendBucket {
                start,
                total: 0,
                successful: 0,
                failed: 0,
                cancelled: 0,
            });
            start += width;
        }

        let index_of = |at: DateTime<Utc>| -> Option<usize> {
            if at < first || at >= query.to {
                return None;
            }
            let offset = (at - first).num_seconds() / width.num_seconds();
            usize::try_from(offset).ok()
        };

        for execution in executions {
            let at = execution.started_at.unwrap_or(execution.created_at);
            if let Some(bucket) = index_of(at).and_then(|i| buckets.get_mut(i)) {
                bucket.total += 1;
                match execution.status {
                    ExecutionStatus::Success => bucket.successful += 1,
                    ExecutionStatus::Failed => bucket.failed += 1,
                    ExecutionStatus::Cancelled => bucket.cancelled += 1,
                    _ => {}
                }
            }
        }

        buckets
    }

    fn top_definitions(snapshot: &StatsSnapshot, limit: usize) -> Vec<TopDefinition> {
        let mut counts: HashMap<i64, u64> = HashMap::new();
        for execution in &snapshot.executions {
            *counts.entry(execution.job_definition_id).or_default() += 1;
        }

        let mut ranked: Vec<(i64, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        ranked
            .into_iter()
            .take(limit)
            .map(|(id, executions)| {
                let definition = snapshot.definitions.iter().find(|d| d.id == id);
                TopDefinition {
                    job_definition_id: id,
                    code: definition.map(|d| d.code.clone()).unwrap_or_default(),
                    name: definition.map(|d| d.name.clone()).unwrap_or_default(),
                    executions,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use jobsched_core::models::{BucketSize, DefinitionSummary};

    fn summary(id: i64, definition: i64, status: ExecutionStatus, at: DateTime<Utc>) -> ExecutionSummary {
        ExecutionSummary {
            id,
            job_definition_id: definition,
            status,
            created_at: at,
            started_at: Some(at),
            ended_at: status.is_terminal().then(|| at + Duration::milliseconds(200)),
        }
    }

    fn definition(id: i64, status: DefinitionStatus) -> DefinitionSummary {
        DefinitionSummary {
            id,
            code: format!("JOB_{}", id),
            name: format!("Job {}", id),
            enabled: true,
            status,
        }
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(7, 10), 70.0);
        assert_eq!(success_rate(10, 10), 100.0);
    }

    #[test]
    fn test_aggregate_counts_and_rates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let mut executions = Vec::new();
        for i in 0..7 {
            executions.push(summary(i, 1, ExecutionStatus::Success, now - Duration::hours(1)));
        }
        for i in 7..10 {
            executions.push(summary(i, 2, ExecutionStatus::Failed, now - Duration::hours(2)));
        }

        let snapshot = StatsSnapshot {
            definitions: vec![
                definition(1, DefinitionStatus::Finished),
                definition(2, DefinitionStatus::Failed),
            ],
            trigger_enabled: vec![true, true, false],
            executions,
            taken_at: now,
        };
        let query = StatsQuery::last_days(now, 1);
        let stats = StatsAggregator::aggregate(&snapshot, &query);

        assert_eq!(stats.total_executions, 10);
        assert_eq!(stats.successful_executions, 7);
        assert_eq!(stats.success_rate, 70.0);
        assert_eq!(stats.average_execution_ms, 200.0);
        assert_eq!(stats.failed_definitions, 1);
        assert_eq!(stats.top_definitions[0].job_definition_id, 1);
        assert_eq!(stats.top_definitions[0].executions, 7);
        assert_eq!(
            stats.trigger_status_distribution,
            vec![
                StatusCount { status: "ACTIVE".to_string(), count: 2 },
                StatusCount { status: "PAUSED".to_string(), count: 1 },
            ]
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let now = Utc::now();
        let stats = StatsAggregator::aggregate(
            &StatsSnapshot {
                taken_at: now,
                ..Default::default()
            },
            &StatsQuery::last_days(now, 7),
        );
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_execution_ms, 0.0);
        assert!(stats.top_definitions.is_empty());
        assert!(stats.trend.iter().all(|b| b.total == 0));
    }

    #[test]
    fn test_hourly_trend_buckets() {
        let from = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 3, 10, 11, 0, 0).unwrap();
        let query = StatsQuery {
            from,
            to,
            bucket: BucketSize::Hour,
            top_n: 3,
            job_definition_id: None,
        };
        let executions = vec![
            summary(1, 1, ExecutionStatus::Success, from + Duration::minutes(10)),
            summary(2, 1, ExecutionStatus::Failed, from + Duration::minutes(95)),
            summary(3, 1, ExecutionStatus::Cancelled, from + Duration::minutes(100)),
        ];
        let snapshot = StatsSnapshot {
            definitions: vec![definition(1, DefinitionStatus::Finished)],
            trigger_enabled: vec![],
            executions,
            taken_at: to,
        };

        let trend = StatsAggregator::aggregate(&snapshot, &query).trend;
        // 08:00, 09:00, 10:00
        assert_eq!(trend.len(), 3);
        assert_eq!(trend[0].start, Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap());
        assert_eq!(trend[0].successful, 1);
        assert_eq!(trend[2].failed, 1);
        assert_eq!(trend[2].cancelled, 1);
        assert_eq!(trend[1].total, 0);
    }
}
