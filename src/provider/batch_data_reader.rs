// ==========================================
// MFD 加药推荐系统 - 批次数据读取 Trait
// ==========================================
// 职责: 定义推荐引擎所需的上游数据读取接口（不包含实现）
// 红线: 不包含推荐逻辑、不包含写入
// ==========================================

use crate::domain::canister::DeviceCanisterIndex;
use crate::domain::types::{
    ColumnId, ConfigId, DeviceId, DropNumber, PackId, PatientId, Quadrant, SlotId, SlotNumber,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

// ==========================================
// SlotDemandRow - 手工加药需求行
// ==========================================
/// 上游展开的单条 (病人, 药盒, 槽位, 药品) 手工加药需求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDemandRow {
    pub patient_id: PatientId,
    pub pack_id: PackId,
    pub column: ColumnId,
    pub drop_number: DropNumber,
    pub slot_number: SlotNumber,
    pub slot_id: SlotId,
    pub fndc_txr: String,
    pub quantity: f64,
    /// 上游预标注象限 (已有弹夹归属决定, 组合象限表示跨象限候选)
    pub quadrant: Option<Quadrant>,
    /// 预标注象限对应的配置号
    pub config_id: Option<ConfigId>,
    /// 全手工槽位标记 (槽位内所有药品都无可用弹夹)
    pub manual: bool,
}

// ==========================================
// AutoSlotRow - 自动路径登记行
// ==========================================
/// 自动落药人群的 (药盒, 槽位, 药品) 登记行
///
/// 仅喂给 slot_id 身份表与自动对账工作清单, 不进入弹夹装配。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSlotRow {
    pub pack_id: PackId,
    pub slot_number: SlotNumber,
    pub slot_id: SlotId,
    pub fndc_txr: String,
}

// ==========================================
// BatchDemandRows - 批次需求读取结果
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDemandRows {
    /// 手工加药需求行
    pub demand_rows: Vec<SlotDemandRow>,
    /// 自动路径登记行
    pub auto_rows: Vec<AutoSlotRow>,
    /// 设备 -> 病人处理顺序
    pub device_patient_order: BTreeMap<DeviceId, Vec<PatientId>>,
    /// 设备 -> 承接药盒集
    pub device_packs: BTreeMap<DeviceId, BTreeSet<PackId>>,
}

// ==========================================
// BatchDataReader Trait
// ==========================================
// 用途: 推荐引擎的上游数据接口
// 实现者: 订单/处方侧的数据适配层（测试中为内存桩）
#[async_trait]
pub trait BatchDataReader: Send + Sync {
    /// 读取批次的加药需求行
    ///
    /// # 参数
    /// - batch_id: 批次ID
    ///
    /// # 返回
    /// - BatchDemandRows: 手工需求行 + 自动登记行 + 设备承接关系
    ///
    /// # 用途
    /// - 需求构建器据此产出 BatchDemand
    async fn demand_rows(&self, batch_id: &str) -> Result<BatchDemandRows, Box<dyn Error>>;

    /// 读取批次涉及设备的弹夹在架索引
    ///
    /// # 返回
    /// - 设备 -> 象限/药品/弹夹索引
    ///
    /// # 用途
    /// - 自动对账器据此解析 (药盒, 槽位, 药品) 的自动覆盖情况
    async fn device_canister_index(
        &self,
        batch_id: &str,
    ) -> Result<BTreeMap<DeviceId, DeviceCanisterIndex>, Box<dyn Error>>;
}
