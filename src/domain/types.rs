// ==========================================
// MFD 加药推荐系统 - 领域类型定义
// ==========================================
// 红线: 象限归属必须用带标签的 Quadrant 枚举表达,
//       禁止用"整数或元组"的运行时类型判断
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ==========================================
// 标识符别名
// ==========================================
// 与外部系统(订单摄入/设备主数据)保持一致的整型主键
pub type PatientId = i64;
pub type PackId = i64;
pub type SlotNumber = i64;
pub type ColumnId = i64;
pub type DropNumber = i64;
/// 槽位持久化句柄(仅用于写库,算法内不解释)
pub type SlotId = i64;
pub type DeviceId = i64;
pub type QuadrantId = u8;
pub type ConfigId = i64;

/// 分包机固定的四个象限编号
pub const ALL_QUADRANTS: [QuadrantId; 4] = [1, 2, 3, 4];

// ==========================================
// 批次推荐序列 (batch_master.sequence_no)
// ==========================================
// 批次主档的 sequence_no 由整个预处理流水线共用,
// 其余阶段占用其它值; 本引擎只认领/恢复/完成这两个值
pub const SEQ_MFD_RECOMMENDATION_IN_PROGRESS: i64 = 1;
pub const SEQ_MFD_RECOMMENDATION_DONE: i64 = 2;

// ==========================================
// 象限归属 (Quadrant)
// ==========================================
// Single: 槽位/弹夹落在单一象限
// Combined: 跨象限组合位(物理上横跨成员象限, 容量各计一次)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quadrant {
    Single(QuadrantId),
    Combined(BTreeSet<QuadrantId>),
}

impl Quadrant {
    /// 构造单象限归属
    pub fn single(quad: QuadrantId) -> Self {
        Quadrant::Single(quad)
    }

    /// 构造组合象限归属(成员自动去重排序)
    pub fn combined<I: IntoIterator<Item = QuadrantId>>(quads: I) -> Self {
        Quadrant::Combined(quads.into_iter().collect())
    }

    /// 成员象限列表(升序)
    pub fn members(&self) -> Vec<QuadrantId> {
        match self {
            Quadrant::Single(q) => vec![*q],
            Quadrant::Combined(qs) => qs.iter().copied().collect(),
        }
    }

    /// 是否包含指定象限
    pub fn contains(&self, quad: QuadrantId) -> bool {
        match self {
            Quadrant::Single(q) => *q == quad,
            Quadrant::Combined(qs) => qs.contains(&quad),
        }
    }

    /// 是否为组合象限
    pub fn is_combined(&self) -> bool {
        matches!(self, Quadrant::Combined(_))
    }

    /// 单象限时返回象限编号
    pub fn as_single(&self) -> Option<QuadrantId> {
        match self {
            Quadrant::Single(q) => Some(*q),
            Quadrant::Combined(_) => None,
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quadrant::Single(q) => write!(f, "{}", q),
            Quadrant::Combined(qs) => {
                let joined = qs
                    .iter()
                    .map(|q| q.to_string())
                    .collect::<Vec<_>>()
                    .join("+");
                write!(f, "{}", joined)
            }
        }
    }
}

// ==========================================
// 弹夹状态 (Canister Batch Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanisterBatchStatus {
    Pending,    // 待加药
    InProgress, // 加药中
    Filled,     // 已加药
    Skipped,    // 已跳过
}

impl fmt::Display for CanisterBatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl CanisterBatchStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PENDING" => CanisterBatchStatus::Pending,
            "IN_PROGRESS" => CanisterBatchStatus::InProgress,
            "FILLED" => CanisterBatchStatus::Filled,
            "SKIPPED" => CanisterBatchStatus::Skipped,
            _ => CanisterBatchStatus::Pending, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CanisterBatchStatus::Pending => "PENDING",
            CanisterBatchStatus::InProgress => "IN_PROGRESS",
            CanisterBatchStatus::Filled => "FILLED",
            CanisterBatchStatus::Skipped => "SKIPPED",
        }
    }
}

// ==========================================
// 弹夹槽位状态 (Canister Slot Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanisterSlotStatus {
    Pending, // 待加药
    Filled,  // 已加药
    Skipped, // 已跳过
}

impl fmt::Display for CanisterSlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl CanisterSlotStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PENDING" => CanisterSlotStatus::Pending,
            "FILLED" => CanisterSlotStatus::Filled,
            "SKIPPED" => CanisterSlotStatus::Skipped,
            _ => CanisterSlotStatus::Pending, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            CanisterSlotStatus::Pending => "PENDING",
            CanisterSlotStatus::Filled => "FILLED",
            CanisterSlotStatus::Skipped => "SKIPPED",
        }
    }
}

// ==========================================
// 批次 MFD 状态 (batch_master.mfd_status)
// ==========================================
// 推荐成功写入后批次进入 MFD_PENDING, 后续加药流程推进其余状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchMfdStatus {
    MfdPending,    // 待加药
    MfdInProgress, // 加药中
    MfdDone,       // 加药完成
}

impl fmt::Display for BatchMfdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl BatchMfdStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MFD_PENDING" => Some(BatchMfdStatus::MfdPending),
            "MFD_IN_PROGRESS" => Some(BatchMfdStatus::MfdInProgress),
            "MFD_DONE" => Some(BatchMfdStatus::MfdDone),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchMfdStatus::MfdPending => "MFD_PENDING",
            BatchMfdStatus::MfdInProgress => "MFD_IN_PROGRESS",
            BatchMfdStatus::MfdDone => "MFD_DONE",
        }
    }
}

// ==========================================
// 高频手工药状态 (Frequent MFD Drug Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequentDrugStatus {
    Pending, // 待评估
    Listed,  // 已入选
    Removed, // 已移除
}

impl fmt::Display for FrequentDrugStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl FrequentDrugStatus {
    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            FrequentDrugStatus::Pending => "PENDING",
            FrequentDrugStatus::Listed => "LISTED",
            FrequentDrugStatus::Removed => "REMOVED",
        }
    }
}
