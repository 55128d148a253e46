// ==========================================
// MFD 加药推荐系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口, 供上层服务调用
// ==========================================

pub mod error;
pub mod recommendation_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use recommendation_api::{RecommendationApi, RecommendationRequest, RecommendationSummary};
