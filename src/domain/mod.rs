// ==========================================
// MFD 加药推荐系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、槽位拓扑
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod canister;
pub mod demand;
pub mod topology;
pub mod types;

// 重导出核心类型
pub use canister::{
    AutoFillResolution, CanisterBatch, CanisterSlot, DeviceCanisterIndex, RunOutput,
};
pub use demand::{BatchDemand, ColumnDemand, PackDemand, PatientDemand, SlotAssignment};
pub use topology::SlotTopology;
pub use types::{
    BatchMfdStatus, CanisterBatchStatus, CanisterSlotStatus, ColumnId, ConfigId, DeviceId,
    DropNumber, FrequentDrugStatus, PackId, PatientId, Quadrant, QuadrantId, SlotId, SlotNumber,
    ALL_QUADRANTS, SEQ_MFD_RECOMMENDATION_DONE, SEQ_MFD_RECOMMENDATION_IN_PROGRESS,
};
