// ==========================================
// MFD 加药推荐系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型, 转换 Repository/Engine 错误为用户友好的错误消息
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 推荐运行控制错误
    // ==========================================
    /// 批次已被另一次运行认领
    #[error("推荐运行冲突: batch_id={batch_id} 已在推荐中")]
    ConcurrentRun { batch_id: String },

    /// 批次已有推荐结果且未要求重算
    #[error("推荐已执行: batch_id={batch_id}, 重算需显式指定 recompute")]
    AlreadyExecuted { batch_id: String },

    // ==========================================
    // 分配错误
    // ==========================================
    #[error("象限分配缺口: pack_id={pack_id}, slot_number={slot_number} 无可用象限")]
    AllocationGap { pack_id: i64, slot_number: i64 },

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("批次数据读取失败: {0}")]
    ProviderError(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 数据质量错误
    // ==========================================
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// 目的: 把仓储层的技术错误转换为用户友好的业务错误
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::DatabaseError(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::DatabaseError(format!("外键约束违反: {}", msg))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AllocationGap {
                pack_id,
                slot_number,
            } => ApiError::AllocationGap {
                pack_id,
                slot_number,
            },
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_not_found_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "batch_master".to_string(),
            id: "B001".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("batch_master"));
                assert!(msg.contains("B001"));
            }
            _ => panic!("Expected NotFound"),
        }
    }

    #[test]
    fn test_engine_allocation_gap_conversion() {
        let engine_err = EngineError::AllocationGap {
            pack_id: 42,
            slot_number: 5,
        };
        let api_err: ApiError = engine_err.into();
        match api_err {
            ApiError::AllocationGap {
                pack_id,
                slot_number,
            } => {
                assert_eq!(pack_id, 42);
                assert_eq!(slot_number, 5);
            }
            _ => panic!("Expected AllocationGap"),
        }
    }
}
