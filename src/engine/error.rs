// ==========================================
// MFD 加药推荐系统 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::{PackId, SlotNumber};
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// 槽位在容量核算后仍无可用象限
    ///
    /// 按约定这是需要上报的缺口, 不允许静默丢弃槽位。
    #[error("槽位无可用象限: pack_id={pack_id}, slot_number={slot_number}")]
    AllocationGap {
        pack_id: PackId,
        slot_number: SlotNumber,
    },
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
