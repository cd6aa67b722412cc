//! # jobsched 测试工具
//!
//! 各 crate 共享的测试辅助：
//!
//! - **测试数据构建器**：带合理默认值的 `JobDefinition`、`Trigger`、`Execution`
//! - **脚本化测试作业**：总是成功、总是失败、会 panic、可协作取消等行为固定的作业
//!
//! ```toml
//! [dev-dependencies]
//! jobsched-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod jobs;

pub use builders::*;
pub use jobs::*;
