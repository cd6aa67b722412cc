//! # jobsched
//!
//! 分布式定时作业调度引擎。多个节点共享同一个存储，依靠触发器租约保证
//! 每个触发时刻只被一个节点派发。
//!
//! - [`app::Application`]：单节点装配与生命周期
//! - [`admin::AdminService`]：作业定义、触发器、执行的管理入口
//! - [`shutdown::ShutdownManager`]：关闭信号广播

pub mod admin;
pub mod app;
pub mod shutdown;

pub use admin::AdminService;
pub use app::Application;
pub use shutdown::ShutdownManager;
