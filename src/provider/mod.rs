// ==========================================
// MFD 加药推荐系统 - 上游数据接口层
// ==========================================
// 职责: 定义订单/设备侧数据的抽象读取接口
// 红线: 不含推荐逻辑, 实现由外部适配层提供
// ==========================================

pub mod batch_data_reader;

pub use batch_data_reader::{AutoSlotRow, BatchDataReader, BatchDemandRows, SlotDemandRow};
