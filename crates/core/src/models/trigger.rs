use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 错过触发时间后的处理策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MisfirePolicy {
    SmartPolicy,
    IgnoreMisfire,
    FireOnceNow,
    DoNothing,
}

text_enum!(MisfirePolicy {
    SmartPolicy => "SMART_POLICY",
    IgnoreMisfire => "IGNORE_MISFIRE",
    FireOnceNow => "FIRE_ONCE_NOW",
    DoNothing => "DO_NOTHING",
});

impl Default for MisfirePolicy {
    fn default() -> Self {
        MisfirePolicy::SmartPolicy
    }
}

pub const DEFAULT_TRIGGER_PRIORITY: i32 = 5;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// 触发器
///
/// 绑定到一个作业定义的CRON调度。`claim_owner`/`claim_expiry` 组成租约，
/// 只能通过存储层的条件更新获取。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: i64,
    pub job_definition_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: String,
    pub enabled: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// IANA时区名称
    pub timezone: String,
    pub priority: i32,
    pub misfire_policy: MisfirePolicy,
    pub claim_owner: Option<String>,
    pub claim_expiry: Option<DateTime<Utc>>,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub fire_count: i64,
    pub max_fire_count: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    pub fn new(
        job_definition_id: i64,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            job_definition_id,
            name: name.into(),
            description: None,
            cron_expression: cron_expression.into(),
            enabled: true,
            start_time: None,
            end_time: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            priority: DEFAULT_TRIGGER_PRIORITY,
            misfire_policy: MisfirePolicy::default(),
            claim_owner: None,
            claim_expiry: None,
            last_fire_time: None,
            next_fire_time: None,
            fire_count: 0,
            max_fire_count: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 租约是否仍被某个节点有效持有
    pub fn is_claimed_at(&self, now: DateTime<Utc>) -> bool {
        self.claim_owner.is_some() && self.claim_expiry.is_some_and(|expiry| expiry > now)
    }

    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_claimed_at(now)
    }

    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_time.is_some_and(|next| next <= now)
    }

    pub fn reached_max_fire_count(&self) -> bool {
        self.max_fire_count.is_some_and(|max| self.fire_count >= max)
    }

    pub fn apply_fire_update(&mut self, update: &TriggerFireUpdate) {
        self.last_fire_time = update.last_fire_time;
        self.next_fire_time = update.next_fire_time;
        self.fire_count = update.fire_count;
        self.enabled = update.enabled;
        self.claim_owner = None;
        self.claim_expiry = None;
        self.updated_at = Utc::now();
    }
}

/// 一次触发处理完毕后写回的簿记字段，同时释放租约
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFireUpdate {
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub fire_count: i64,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let mut trigger = Trigger::new(1, "every-minute", "0 * * * * ?");
        assert!(trigger.is_claimable_at(now));

        trigger.claim_owner = Some("node-a".to_string());
        trigger.claim_expiry = Some(now + Duration::seconds(30));
        assert!(trigger.is_claimed_at(now));
        assert!(trigger.is_claimable_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_defaults() {
        let trigger = Trigger::new(1, "t", "0 0 * * * ?");
        assert_eq!(trigger.priority, DEFAULT_TRIGGER_PRIORITY);
        assert_eq!(trigger.timezone, "UTC");
        assert_eq!(trigger.misfire_policy, MisfirePolicy::SmartPolicy);
        assert!(!trigger.reached_max_fire_count());
    }

    #[test]
    fn test_misfire_policy_text() {
        assert_eq!(
            "fire_once_now".parse::<MisfirePolicy>().unwrap(),
            MisfirePolicy::FireOnceNow
        );
        assert_eq!(MisfirePolicy::DoNothing.as_str(), "DO_NOTHING");
    }
}
