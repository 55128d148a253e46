// ==========================================
// MFD 加药推荐系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询 (槽位拓扑/容量上限/弹夹槽数/加药员人数)
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::{self, open_sqlite_connection};
use crate::domain::topology::SlotTopology;
use crate::domain::types::{ConfigId, QuadrantId, SlotNumber};
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        // schema 版本仅校验告警, 不做自动迁移
        match db::read_schema_version(&conn)? {
            Some(version) if version == db::CURRENT_SCHEMA_VERSION => {}
            Some(version) => tracing::warn!(
                found = version,
                expected = db::CURRENT_SCHEMA_VERSION,
                "schema_version 与代码期望不一致, 请确认数据库结构是否最新"
            ),
            None => tracing::warn!(
                expected = db::CURRENT_SCHEMA_VERSION,
                "数据库缺少 schema_version 表, 请确认已按最新结构建库"
            ),
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    // ===== 槽位拓扑配置 =====

    /// 获取槽位象限拓扑
    ///
    /// # 说明
    /// - `slot_quadrant_topology`: JSON, 槽位 -> 可达象限列表, 如 {"7":[3],"8":[1,2,3,4]}
    /// - `slot_quadrant_config`: JSON, 槽位 -> {象限: 配置号}
    /// - 拓扑键缺失或格式错误时回退到内置 28 槽位出厂拓扑
    /// - 配置键缺失时配置号取象限编号
    pub async fn get_slot_topology(&self) -> Result<SlotTopology, Box<dyn Error>> {
        let raw_topology = self.get_config_value(config_keys::SLOT_QUADRANT_TOPOLOGY)?;

        let valid_quadrants: BTreeMap<SlotNumber, BTreeSet<QuadrantId>> = match raw_topology {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!(
                        config_key = config_keys::SLOT_QUADRANT_TOPOLOGY,
                        raw_value = %raw,
                        "槽位拓扑配置格式错误，使用内置出厂拓扑"
                    );
                    return Ok(SlotTopology::default_28_slot());
                }
            },
            None => return Ok(SlotTopology::default_28_slot()),
        };

        let slot_configs = match self.get_config_value(config_keys::SLOT_QUADRANT_CONFIG)? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!(
                        config_key = config_keys::SLOT_QUADRANT_CONFIG,
                        raw_value = %raw,
                        "槽位配置号表格式错误，配置号回退为象限编号"
                    );
                    derive_slot_configs(&valid_quadrants)
                }
            },
            None => derive_slot_configs(&valid_quadrants),
        };

        Ok(SlotTopology::new(valid_quadrants, slot_configs))
    }

    // ===== 容量与分工配置 =====

    /// 获取象限容量上限（单轮推荐内每象限可承接的弹夹数）
    pub async fn get_quad_capacity_limit(&self) -> Result<i64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::QUAD_CAPACITY_LIMIT, "20")?;
        Ok(value.parse::<i64>().unwrap_or(20))
    }

    /// 获取单个弹夹的内部位置数
    pub async fn get_canister_slot_count(&self) -> Result<i64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::CANISTER_SLOT_COUNT, "4")?;
        Ok(value.parse::<i64>().unwrap_or(4))
    }

    /// 获取加药员人数
    pub async fn get_mfd_operator_count(&self) -> Result<i64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::MFD_OPERATOR_COUNT, "4")?;
        Ok(value.parse::<i64>().unwrap_or(4))
    }
}

/// 配置号缺省推导: 每个可达象限的配置号取象限编号本身
fn derive_slot_configs(
    valid_quadrants: &BTreeMap<SlotNumber, BTreeSet<QuadrantId>>,
) -> BTreeMap<SlotNumber, BTreeMap<QuadrantId, ConfigId>> {
    valid_quadrants
        .iter()
        .map(|(slot, quads)| {
            let configs = quads
                .iter()
                .map(|q| (*q, ConfigId::from(*q)))
                .collect::<BTreeMap<_, _>>();
            (*slot, configs)
        })
        .collect()
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 槽位拓扑
    pub const SLOT_QUADRANT_TOPOLOGY: &str = "slot_quadrant_topology"; // 槽位->可达象限 (JSON)
    pub const SLOT_QUADRANT_CONFIG: &str = "slot_quadrant_config"; // 槽位->{象限:配置号} (JSON)

    // 容量
    pub const QUAD_CAPACITY_LIMIT: &str = "quad_capacity_limit";

    // 弹夹
    pub const CANISTER_SLOT_COUNT: &str = "canister_slot_count";

    // 分工
    pub const MFD_OPERATOR_COUNT: &str = "mfd_operator_count";
}
