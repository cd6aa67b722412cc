use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ExecutionStatus;

/// 分页请求，`page` 从 0 开始
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub const MAX_SIZE: u32 = 500;

    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        self.page as u64 * self.size as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, 20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            size: request.size,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size as u64)
        }
    }
}

/// 执行列表过滤条件，时间范围作用于创建时间
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionFilter {
    pub job_definition_id: Option<i64>,
    pub status: Option<ExecutionStatus>,
    pub node_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ExecutionFilter {
    pub fn matches(&self, execution: &super::Execution) -> bool {
        self.job_definition_id
            .is_none_or(|id| execution.job_definition_id == id)
            && self.status.is_none_or(|s| execution.status == s)
            && self
                .node_id
                .as_ref()
                .is_none_or(|n| execution.node_id.as_deref() == Some(n.as_str()))
            && self.from.is_none_or(|from| execution.created_at >= from)
            && self.to.is_none_or(|to| execution.created_at < to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps_size() {
        assert_eq!(PageRequest::new(0, 0).size, 1);
        assert_eq!(PageRequest::new(2, 10_000).size, PageRequest::MAX_SIZE);
        assert_eq!(PageRequest::new(3, 20).offset(), 60);
    }

    #[test]
    fn test_total_pages() {
        let page: Page<i32> = Page::new(vec![], 41, PageRequest::new(0, 20));
        assert_eq!(page.total_pages(), 3);
    }
}
