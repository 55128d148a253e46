// ==========================================
// MFD 加药推荐系统 - 引擎层
// ==========================================
// 职责: 实现加药推荐的业务规则引擎, 不拼 SQL
// 红线: Engine 不触达数据库, 输入输出都走领域模型
// ==========================================

pub mod auto_reconciler;
pub mod canister_batcher;
pub mod demand_builder;
pub mod error;
pub mod operator_balancer;
pub mod orchestrator;
pub mod quadrant_allocator;
pub mod session;

// 重导出核心引擎
pub use auto_reconciler::AutoReconciler;
pub use canister_batcher::CanisterBatcher;
pub use demand_builder::DemandBuilder;
pub use error::{EngineError, EngineResult};
pub use operator_balancer::OperatorBalancer;
pub use orchestrator::RecommendationOrchestrator;
pub use quadrant_allocator::QuadrantAllocator;
pub use session::RecommendationSession;
