// ==========================================
// MFD 加药推荐系统 - 推荐 API
// ==========================================
// 职责: 批次推荐的对外入口: 序列认领 -> 需求读取 -> 引擎编排 -> 原子落库
// 红线: 认领后任何失败路径必须恢复认领前的序列值
// ==========================================

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::config::config_manager::ConfigManager;
use crate::engine::demand_builder::DemandBuilder;
use crate::engine::orchestrator::RecommendationOrchestrator;
use crate::provider::batch_data_reader::BatchDataReader;
use crate::repository::batch_repo::BatchMasterRepository;
use crate::repository::recommendation_repo::RecommendationRepository;

// ==========================================
// RecommendationRequest - 推荐请求
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub batch_id: String,
    pub user_id: String,
    pub company_id: i64,
    pub system_id: i64,
    /// 已有结果时是否重算覆盖
    #[serde(default)]
    pub recompute: bool,
}

// ==========================================
// RecommendationSummary - 推荐运行摘要
// ==========================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub batch_id: String,
    /// 逻辑弹夹批数 (组合目的地落库展开前)
    pub canister_batches: usize,
    /// 落库的弹夹明细行数
    pub canister_slots: usize,
    /// 自动对账命中行数
    pub auto_resolved: usize,
    /// 仍需人工的对账行数
    pub manual_unresolved: usize,
    /// 实际分到弹夹批的操作员人数
    pub operators_used: usize,
}

// ==========================================
// RecommendationApi - 推荐 API
// ==========================================

/// 批次推荐入口
///
/// 职责:
/// 1. 批次存在性与归属校验
/// 2. 推荐阶段序列认领 (条件更新, 并发重入直接拒绝)
/// 3. 引擎编排与结果原子落库
/// 4. 失败时恢复认领前序列值
pub struct RecommendationApi {
    batch_repo: Arc<BatchMasterRepository>,
    recommendation_repo: Arc<RecommendationRepository>,
    config: Arc<ConfigManager>,
    reader: Arc<dyn BatchDataReader>,
}

impl RecommendationApi {
    /// 创建新的 RecommendationApi 实例
    ///
    /// # 参数
    /// - batch_repo: 批次主档仓储
    /// - recommendation_repo: 推荐结果仓储
    /// - config: 配置管理器
    /// - reader: 上游批次数据读取器
    pub fn new(
        batch_repo: Arc<BatchMasterRepository>,
        recommendation_repo: Arc<RecommendationRepository>,
        config: Arc<ConfigManager>,
        reader: Arc<dyn BatchDataReader>,
    ) -> Self {
        Self {
            batch_repo,
            recommendation_repo,
            config,
            reader,
        }
    }

    /// 执行批次推荐
    ///
    /// # 流程
    /// 1. 输入与批次归属校验
    /// 2. 序列认领 (已在推荐中的批次返回 ConcurrentRun)
    /// 3. 已有结果且未要求重算时恢复序列并返回 AlreadyExecuted
    /// 4. 需求为空时直接推进到完成序列
    /// 5. 引擎编排 -> 原子落库 -> 序列推进到完成
    /// 6. 认领后的任何失败恢复认领前序列值后把错误上抛
    ///
    /// # 返回
    /// - Ok(RecommendationSummary): 运行摘要
    /// - Err(ApiError): 校验/并发/引擎/落库错误
    pub async fn run_recommendation(
        &self,
        request: RecommendationRequest,
    ) -> ApiResult<RecommendationSummary> {
        // 参数验证
        if request.batch_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次ID不能为空".to_string()));
        }
        if request.user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("用户ID不能为空".to_string()));
        }

        // 批次存在性与归属校验
        let batch = self
            .batch_repo
            .find_by_id(&request.batch_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("batch_master(id={})不存在", request.batch_id))
            })?;
        if batch.company_id != request.company_id || batch.system_id != request.system_id {
            return Err(ApiError::ValidationError(format!(
                "批次归属不符: company_id={}, system_id={}",
                batch.company_id, batch.system_id
            )));
        }

        // 序列认领
        let run_id = Uuid::new_v4().to_string();
        let previous = self
            .batch_repo
            .claim_recommendation(&request.batch_id)?
            .ok_or_else(|| ApiError::ConcurrentRun {
                batch_id: request.batch_id.clone(),
            })?;
        info!(
            run_id = %run_id,
            batch_id = %request.batch_id,
            company_id = request.company_id,
            system_id = request.system_id,
            previous_sequence = previous,
            recompute = request.recompute,
            "批次推荐序列认领成功"
        );

        // 认领后的失败路径统一恢复序列
        match self.execute_claimed(&request, &run_id).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                if let Err(restore_err) = self
                    .batch_repo
                    .restore_sequence(&request.batch_id, previous)
                {
                    warn!(
                        run_id = %run_id,
                        batch_id = %request.batch_id,
                        error = %restore_err,
                        "认领序列恢复失败"
                    );
                }
                Err(err)
            }
        }
    }

    /// 认领成功后的运行主体
    async fn execute_claimed(
        &self,
        request: &RecommendationRequest,
        run_id: &str,
    ) -> ApiResult<RecommendationSummary> {
        // 已有结果且未要求重算: 拒绝覆盖
        if !request.recompute && self.recommendation_repo.rows_exist(&request.batch_id)? {
            return Err(ApiError::AlreadyExecuted {
                batch_id: request.batch_id.clone(),
            });
        }

        // 读取上游需求
        let rows = self
            .reader
            .demand_rows(&request.batch_id)
            .await
            .map_err(|e| ApiError::ProviderError(e.to_string()))?;
        let mut demand = DemandBuilder::new().build(rows);

        // 无手工需求: 直接推进到完成
        if demand.is_empty() {
            self.batch_repo
                .complete_recommendation(&request.batch_id, &request.user_id)?;
            info!(
                run_id = %run_id,
                batch_id = %request.batch_id,
                "批次无手工加药需求, 推荐直接完成"
            );
            return Ok(RecommendationSummary {
                batch_id: request.batch_id.clone(),
                ..Default::default()
            });
        }

        let canister_indexes = self
            .reader
            .device_canister_index(&request.batch_id)
            .await
            .map_err(|e| ApiError::ProviderError(e.to_string()))?;

        // 配置与引擎编排
        let topology = self
            .config
            .get_slot_topology()
            .await
            .map_err(|e| ApiError::InternalError(format!("配置读取失败: {}", e)))?;
        let capacity_limit = self
            .config
            .get_quad_capacity_limit()
            .await
            .map_err(|e| ApiError::InternalError(format!("配置读取失败: {}", e)))?;
        let max_per_position = self
            .config
            .get_canister_slot_count()
            .await
            .map_err(|e| ApiError::InternalError(format!("配置读取失败: {}", e)))?;
        let operator_count = self
            .config
            .get_mfd_operator_count()
            .await
            .map_err(|e| ApiError::InternalError(format!("配置读取失败: {}", e)))?;

        let orchestrator = RecommendationOrchestrator::new(
            topology,
            capacity_limit,
            max_per_position,
            operator_count,
        );
        let output = orchestrator.run(&mut demand, &canister_indexes)?;

        // 原子落库并推进序列
        let stats = self
            .recommendation_repo
            .persist_run(&request.batch_id, &request.user_id, &output)?;
        self.batch_repo
            .complete_recommendation(&request.batch_id, &request.user_id)?;

        let auto_resolved = output
            .auto_resolutions
            .iter()
            .filter(|r| r.is_resolved())
            .count();
        let operators_used = output
            .canister_batches
            .iter()
            .filter_map(|b| b.assigned_operator)
            .collect::<BTreeSet<_>>()
            .len();
        let summary = RecommendationSummary {
            batch_id: request.batch_id.clone(),
            canister_batches: output.canister_batches.len(),
            canister_slots: stats.slot_rows,
            auto_resolved,
            manual_unresolved: output.auto_resolutions.len() - auto_resolved,
            operators_used,
        };
        info!(
            run_id = %run_id,
            batch_id = %summary.batch_id,
            canister_batches = summary.canister_batches,
            canister_slots = summary.canister_slots,
            auto_resolved = summary.auto_resolved,
            manual_unresolved = summary.manual_unresolved,
            operators_used = summary.operators_used,
            "批次推荐完成"
        );
        Ok(summary)
    }
}
