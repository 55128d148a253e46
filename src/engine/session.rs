// ==========================================
// MFD 加药推荐系统 - 推荐运行会话
// ==========================================
// 职责: 单次推荐运行内的象限容量计数、病人轮基线、弹夹序号
// 红线: 会话状态只在一次运行内有效, 不得做成进程级全局
// ==========================================

use crate::domain::types::{Quadrant, QuadrantId, ALL_QUADRANTS};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ==========================================
// RecommendationSession - 运行会话
// ==========================================
/// 一次推荐运行的容量与序号状态
///
/// 分配顺序有依赖: 后处理的病人看得到先处理病人累计的容量计数,
/// 因此整个运行共用同一个会话, 由编排器按顺序推进。
#[derive(Debug, Clone)]
pub struct RecommendationSession {
    /// 象限 -> 累计弹夹数
    fill_count: BTreeMap<QuadrantId, i64>,
    /// 当前病人轮开始时的计数快照
    pass_baseline: BTreeMap<QuadrantId, i64>,
    /// 运行内下一个弹夹序号
    next_order_no: i64,
    /// 单象限容量上限 (超过即触发回冲)
    capacity_limit: i64,
}

impl RecommendationSession {
    pub fn new(capacity_limit: i64) -> Self {
        let zeroed: BTreeMap<QuadrantId, i64> =
            ALL_QUADRANTS.into_iter().map(|q| (q, 0)).collect();
        Self {
            fill_count: zeroed.clone(),
            pass_baseline: zeroed,
            next_order_no: 1,
            capacity_limit,
        }
    }

    /// 开始一个病人的分配轮, 快照当前计数作为基线
    pub fn begin_patient_pass(&mut self) {
        self.pass_baseline = self.fill_count.clone();
    }

    /// 记录一个弹夹落位, 并按需触发超限回冲
    ///
    /// 组合象限的弹夹物理上横跨各成员象限, 每个成员都计一次。
    pub fn record_fill(&mut self, dest: &Quadrant) {
        for quad in dest.members() {
            *self.fill_count.entry(quad).or_insert(0) += 1;
            self.reset_if_overflowed(quad);
        }
    }

    /// 超限回冲: 超过上限时从全部四个象限扣除本轮基线
    ///
    /// 不清零: 扣除基线后剩下的是本轮新增量, 象限间相对次序得以保留。
    fn reset_if_overflowed(&mut self, quad: QuadrantId) {
        let count = self.fill_of(quad);
        if count <= self.capacity_limit {
            return;
        }
        debug!(quadrant = quad, count, limit = self.capacity_limit, "象限超限, 回冲本轮基线");
        for q in ALL_QUADRANTS {
            let baseline = self.pass_baseline.get(&q).copied().unwrap_or(0);
            *self.fill_count.entry(q).or_insert(0) -= baseline;
        }
    }

    pub fn fill_of(&self, quad: QuadrantId) -> i64 {
        self.fill_count.get(&quad).copied().unwrap_or(0)
    }

    /// 允许集内计数最低的象限, 计数相同取编号较小者
    pub fn least_filled_in(&self, allowed: &BTreeSet<QuadrantId>) -> Option<QuadrantId> {
        allowed
            .iter()
            .copied()
            .min_by_key(|q| (self.fill_of(*q), *q))
    }

    /// 全部象限按 (计数, 编号) 升序
    pub fn quadrants_by_fill(&self) -> Vec<QuadrantId> {
        let mut quads: Vec<QuadrantId> = ALL_QUADRANTS.to_vec();
        quads.sort_by_key(|q| (self.fill_of(*q), *q));
        quads
    }

    /// 取下一个弹夹序号并推进计数器
    pub fn take_order_no(&mut self) -> i64 {
        let order_no = self.next_order_no;
        self.next_order_no += 1;
        order_no
    }
}
