// ==========================================
// MFD 加药推荐系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 手工加药弹夹推荐引擎 (批次级一次性计算)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 数据提供层 - 上游批次数据
pub mod provider;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    BatchMfdStatus, CanisterBatchStatus, CanisterSlotStatus, FrequentDrugStatus, Quadrant,
    QuadrantId,
};

// 领域实体
pub use domain::{
    AutoFillResolution, BatchDemand, CanisterBatch, CanisterSlot, DeviceCanisterIndex, RunOutput,
    SlotTopology,
};

// 引擎
pub use engine::{
    AutoReconciler, CanisterBatcher, DemandBuilder, OperatorBalancer, QuadrantAllocator,
    RecommendationOrchestrator,
};

// API
pub use api::{RecommendationApi, RecommendationRequest, RecommendationSummary};

// 数据提供
pub use provider::{BatchDataReader, BatchDemandRows};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "MFD加药推荐系统";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

// ==========================================
// 预编译检查
// ==========================================
