//! 工人跟踪器 - 跨帧身份持久化与重识别
//! Worker tracker: per-frame association, disappearance tolerance,
//! position-based re-identification
//!
//! 核心思想:
//! 1. 外部track_id只是提示, 不保证跨帧稳定
//! 2. 消失的工人进入pending集合, 容忍期内可恢复
//! 3. 未知提示先按最近位置在pending中重识别, 匹配则仅重映射外部标签
//! 4. 空闲判定基于滑动窗口净位移, 平滑单帧抖动

use super::types::{Detection, Point, PpeStatus, TrackPoint, WorkerState};
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// 跨帧工人跟踪器, 每路视频流一个实例
pub struct WorkerTracker {
    config: MonitorConfig,
    /// 当前帧可见 (或本帧刚更新) 的工人
    workers: HashMap<u32, WorkerState>,
    /// 最近消失、等待重现的工人
    ///
    /// 不变式: 任一track_id同一时刻只会出现在workers或pending之一
    pending: HashMap<u32, WorkerState>,
}

impl WorkerTracker {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// 用当前帧的检测更新所有工人状态, 返回活跃工人快照
    ///
    /// 每帧调用一次, 帧必须按时间顺序送入。
    pub fn update(&mut self, detections: &[Detection], now: DateTime<Utc>) -> Vec<WorkerState> {
        let mut seen: HashSet<u32> = HashSet::new();

        for det in detections {
            let position = det.bbox.feet();
            seen.insert(det.track_id);

            if self.workers.contains_key(&det.track_id) {
                self.update_existing(det.track_id, position, now);
            } else if self.pending.contains_key(&det.track_id) {
                self.restore(det.track_id, position, now);
            } else if let Some(old_id) = self.match_pending(position) {
                self.remap(old_id, det.track_id, position, now);
            } else {
                self.create(det.track_id, position, now);
            }
        }

        self.process_disappeared(&seen, now);
        self.sweep_pending(now);

        self.all_active()
    }

    /// 更新已跟踪工人的位置与空闲状态
    fn update_existing(&mut self, track_id: u32, position: Point, now: DateTime<Utc>) {
        let window = self.config.history_window_secs;
        let movement_threshold = self.config.idle_movement_threshold_px;
        let idle_threshold = self.config.idle_time_threshold_secs;

        let Some(worker) = self.workers.get_mut(&track_id) else {
            return;
        };
        worker.is_active = true;
        worker.position = position;
        worker.last_seen = now;

        worker.position_history.push_back(TrackPoint {
            t: now,
            x: position.x,
            y: position.y,
        });
        prune_history(worker, now, window);

        // 空闲判定: 窗口净位移
        let displacement = worker.window_displacement();
        if displacement > movement_threshold {
            // 一次有效移动立即清除空闲状态, 不做平滑
            worker.is_idle = false;
            worker.idle_since = None;
        } else {
            match worker.idle_since {
                None => worker.idle_since = Some(now),
                Some(since) => {
                    if seconds_between(since, now) >= idle_threshold as f64 {
                        worker.is_idle = true;
                    }
                }
            }
        }
    }

    /// 同一外部标签从pending恢复
    fn restore(&mut self, track_id: u32, position: Point, now: DateTime<Utc>) {
        let Some(mut worker) = self.pending.remove(&track_id) else {
            return;
        };
        worker.position = position;
        worker.last_seen = now;
        worker.is_active = true;
        worker.position_history.push_back(TrackPoint {
            t: now,
            x: position.x,
            y: position.y,
        });
        prune_history(&mut worker, now, self.config.history_window_secs);
        self.workers.insert(track_id, worker);
        info!("👷 Worker {} reappeared", track_id);
    }

    /// 在pending中按最近位置做重识别
    ///
    /// 严格小于阈值才算命中; 多候选取最近, 距离完全相等时取较小ID保证确定性。
    fn match_pending(&self, position: Point) -> Option<u32> {
        let threshold = self.config.position_match_threshold_px;
        let mut best: Option<(u32, f32)> = None;

        for (&id, worker) in &self.pending {
            let distance = position.distance(worker.position);
            if distance >= threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_id, best_distance)) => {
                    distance < best_distance || (distance == best_distance && id < best_id)
                }
            };
            if better {
                best = Some((id, distance));
            }
        }

        best.map(|(id, _)| id)
    }

    /// 重识别命中: 身份保留, 仅外部标签重映射
    fn remap(&mut self, old_id: u32, new_id: u32, position: Point, now: DateTime<Utc>) {
        let Some(mut worker) = self.pending.remove(&old_id) else {
            return;
        };
        worker.track_id = new_id;
        worker.position = position;
        worker.last_seen = now;
        worker.is_active = true;
        worker.position_history.push_back(TrackPoint {
            t: now,
            x: position.x,
            y: position.y,
        });
        prune_history(&mut worker, now, self.config.history_window_secs);
        self.workers.insert(new_id, worker);
        info!("👷 Worker remapped: {} -> {}", old_id, new_id);
    }

    /// 全新工人
    fn create(&mut self, track_id: u32, position: Point, now: DateTime<Utc>) {
        if self.workers.len() >= self.config.max_tracked_workers {
            warn!(
                "⚠️ 跟踪容量已满 ({}), 丢弃新工人 ID {}",
                self.config.max_tracked_workers, track_id
            );
            return;
        }
        self.workers
            .insert(track_id, WorkerState::new(track_id, position, now));
        info!("👷 New worker detected: ID {}", track_id);
    }

    /// 本帧未见的工人: 容忍期内移入pending, 超时彻底删除
    fn process_disappeared(&mut self, seen: &HashSet<u32>, now: DateTime<Utc>) {
        let tolerance = self.config.disappearance_tolerance_secs as f64;
        let absent_ids: Vec<u32> = self
            .workers
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();

        for id in absent_ids {
            let Some(mut worker) = self.workers.remove(&id) else {
                continue;
            };
            let absent_secs = seconds_between(worker.last_seen, now);
            if absent_secs > tolerance {
                // 身份丢失, 之后重现会是新身份
                info!("👷 Worker {} removed (absent > {:.1}s)", id, tolerance);
            } else {
                worker.is_active = false;
                self.pending.insert(id, worker);
                debug!("👷 Worker {} pending reappearance", id);
            }
        }
    }

    /// 基于时间的pending清理, 与是否有新检测无关
    pub fn sweep_pending(&mut self, now: DateTime<Utc>) {
        let tolerance = self.config.disappearance_tolerance_secs as f64;
        self.pending.retain(|id, worker| {
            let keep = seconds_between(worker.last_seen, now) <= tolerance;
            if !keep {
                info!("👷 Worker {} removed (absent > {:.1}s)", id, tolerance);
            }
            keep
        });
    }

    // ========== 属性更新 (未知ID静默忽略) ==========

    /// 合并外部PPE结果; 未知ID为无操作, 不会创建工人
    pub fn update_ppe_status(&mut self, track_id: u32, status: PpeStatus) {
        if let Some(worker) = self.get_worker_mut(track_id) {
            worker.ppe = Some(status);
        }
    }

    /// 更新当前区域归属; 未知ID为无操作
    pub fn update_zone(&mut self, track_id: u32, zone_id: Option<String>) {
        if let Some(worker) = self.get_worker_mut(track_id) {
            worker.current_zone = zone_id;
        }
    }

    // ========== 查询 ==========

    /// 当前仍持有身份的全部外部标签 (活跃 + pending)
    pub fn tracked_ids(&self) -> HashSet<u32> {
        self.workers
            .keys()
            .chain(self.pending.keys())
            .copied()
            .collect()
    }

    pub fn get_worker(&self, track_id: u32) -> Option<&WorkerState> {
        self.workers
            .get(&track_id)
            .or_else(|| self.pending.get(&track_id))
    }

    fn get_worker_mut(&mut self, track_id: u32) -> Option<&mut WorkerState> {
        if self.workers.contains_key(&track_id) {
            self.workers.get_mut(&track_id)
        } else {
            self.pending.get_mut(&track_id)
        }
    }

    /// 活跃工人快照 (克隆, 按ID排序保证确定性)
    pub fn all_active(&self) -> Vec<WorkerState> {
        let mut workers: Vec<WorkerState> = self
            .workers
            .values()
            .filter(|w| w.is_active)
            .cloned()
            .collect();
        workers.sort_by_key(|w| w.track_id);
        workers
    }

    /// (活跃非空闲, 活跃空闲) 计数
    pub fn active_idle_counts(&self) -> (usize, usize) {
        let active = self
            .workers
            .values()
            .filter(|w| w.is_active && !w.is_idle)
            .count();
        let idle = self
            .workers
            .values()
            .filter(|w| w.is_active && w.is_idle)
            .count();
        (active, idle)
    }

    pub fn clear(&mut self) {
        self.workers.clear();
        self.pending.clear();
    }
}

fn prune_history(worker: &mut WorkerState, now: DateTime<Utc>, window_secs: f32) {
    while let Some(front) = worker.position_history.front() {
        if seconds_between(front.t, now) > window_secs as f64 {
            worker.position_history.pop_front();
        } else {
            break;
        }
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::types::BBox;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn at(secs: f64) -> DateTime<Utc> {
        t0() + chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }

    /// 脚部位置落在(x, y)的检测
    fn det(id: u32, x: f32, y: f32) -> Detection {
        Detection {
            track_id: id,
            bbox: BBox::new(x - 10.0, y - 40.0, x + 10.0, y),
            confidence: 0.9,
        }
    }

    fn tracker() -> WorkerTracker {
        WorkerTracker::new(MonitorConfig::default())
    }

    #[test]
    fn constant_hint_never_duplicates_identity() {
        let mut tracker = tracker();
        for i in 0..10 {
            let workers = tracker.update(&[det(1, 100.0 + i as f32, 200.0)], at(i as f64 * 0.1));
            assert_eq!(workers.len(), 1);
            assert_eq!(workers[0].track_id, 1);
        }
        assert_eq!(tracker.get_worker(1).unwrap().first_seen, t0());
    }

    #[test]
    fn disappeared_worker_moves_to_pending_not_active() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        let workers = tracker.update(&[], at(1.0));
        assert!(workers.is_empty());
        // 身份仍可查, 但已标记不活跃
        let worker = tracker.get_worker(1).unwrap();
        assert!(!worker.is_active);
    }

    #[test]
    fn reappearance_within_tolerance_keeps_identity() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(1.0));
        // 相同提示重现
        let workers = tracker.update(&[det(1, 102.0, 100.0)], at(2.0));
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].first_seen, t0());
        assert!(workers[0].is_active);
    }

    #[test]
    fn reidentification_by_position_remaps_external_id() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(0.5));
        // 新提示出现在阈值内的(105, 100) → 同一身份
        let workers = tracker.update(&[det(42, 105.0, 100.0)], at(1.0));
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].track_id, 42);
        assert_eq!(workers[0].first_seen, t0());
        // 旧标签不再可查
        assert!(tracker.get_worker(1).is_none());
    }

    #[test]
    fn reidentification_beyond_threshold_creates_new_identity() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(0.5));
        // 距离150px > 100px阈值
        let workers = tracker.update(&[det(42, 250.0, 100.0)], at(1.0));
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].first_seen, at(1.0));
    }

    #[test]
    fn reidentification_picks_closest_pending_candidate() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0), det(2, 160.0, 100.0)], at(0.0));
        tracker.update(&[], at(0.5));
        // 新位置(130, 100)同时在两者阈值内, 距离各为30 → 距离相等取较小ID
        let workers = tracker.update(&[det(99, 130.0, 100.0)], at(1.0));
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].track_id, 99);
        // worker 1 被重映射, worker 2 仍在pending
        assert!(tracker.get_worker(2).is_some());
        assert!(tracker.get_worker(1).is_none());
    }

    #[test]
    fn absence_just_under_tolerance_is_recoverable() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(4.9));
        let workers = tracker.update(&[det(7, 103.0, 100.0)], at(4.95));
        assert_eq!(workers[0].first_seen, t0());
    }

    #[test]
    fn absence_beyond_tolerance_forgets_identity() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(5.1));
        assert!(tracker.get_worker(1).is_none());
        // 之后同位置重现是全新身份
        let workers = tracker.update(&[det(7, 100.0, 100.0)], at(5.2));
        assert_eq!(workers[0].first_seen, at(5.2));
    }

    #[test]
    fn pending_sweep_is_time_based_not_detection_triggered() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(1.0));
        assert!(tracker.get_worker(1).is_some());
        // 没有任何新检测, 仅时间流逝
        tracker.sweep_pending(at(6.1));
        assert!(tracker.get_worker(1).is_none());
    }

    #[test]
    fn idle_after_threshold_elapsed() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        // 静止开始计时
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        // 29.9s: 仍未空闲
        for i in 1..=29 {
            tracker.update(&[det(1, 100.0, 100.0)], at(i as f64));
        }
        let workers = tracker.update(&[det(1, 100.0, 100.0)], at(29.9));
        assert!(!workers[0].is_idle);
        // 30.1s: 空闲
        let workers = tracker.update(&[det(1, 100.0, 100.0)], at(30.1));
        assert!(workers[0].is_idle);
        assert_eq!(workers[0].idle_since, Some(t0()));
    }

    #[test]
    fn single_qualifying_movement_clears_idle_instantly() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        for i in 1..=31 {
            tracker.update(&[det(1, 100.0, 100.0)], at(i as f64));
        }
        assert!(tracker.get_worker(1).unwrap().is_idle);
        // 一次25px移动 (>20px阈值) 立即转为活跃
        let workers = tracker.update(&[det(1, 125.0, 100.0)], at(32.0));
        assert!(!workers[0].is_idle);
        assert!(workers[0].idle_since.is_none());
    }

    #[test]
    fn jitter_below_threshold_does_not_reset_idle_timer() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        // ±5px抖动, 窗口净位移始终低于20px
        for i in 1..=31 {
            let dx = if i % 2 == 0 { 5.0 } else { -5.0 };
            tracker.update(&[det(1, 100.0 + dx, 100.0)], at(i as f64));
        }
        assert!(tracker.get_worker(1).unwrap().is_idle);
    }

    #[test]
    fn history_is_pruned_to_trailing_window() {
        let mut tracker = tracker();
        for i in 0..100 {
            tracker.update(&[det(1, 100.0, 100.0)], at(i as f64 * 0.1));
        }
        let worker = tracker.get_worker(1).unwrap();
        // 10Hz更新, 3秒窗口 → 约31个点
        assert!(worker.position_history.len() <= 32);
        let oldest = worker.position_history.front().unwrap();
        assert!((at(9.9) - oldest.t).num_milliseconds() <= 3000);
    }

    #[test]
    fn tracked_ids_cover_active_and_pending() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0), det(2, 300.0, 100.0)], at(0.0));
        // worker 2进入pending
        tracker.update(&[det(1, 100.0, 100.0)], at(1.0));
        let ids = tracker.tracked_ids();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
        // 全部超过容忍期后身份集合为空
        tracker.update(&[], at(7.0));
        assert!(tracker.tracked_ids().is_empty());
    }

    #[test]
    fn attribute_setters_ignore_unknown_workers() {
        let mut tracker = tracker();
        tracker.update_ppe_status(99, PpeStatus::default());
        tracker.update_zone(99, Some("z1".into()));
        assert!(tracker.get_worker(99).is_none());
    }

    #[test]
    fn attribute_setters_reach_pending_workers() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0)], at(0.0));
        tracker.update(&[], at(1.0));
        tracker.update_zone(1, Some("z1".into()));
        assert_eq!(
            tracker.get_worker(1).unwrap().current_zone.as_deref(),
            Some("z1")
        );
    }

    #[test]
    fn active_idle_counts_split_correctly() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0), det(2, 300.0, 100.0)], at(0.0));
        tracker.update(&[det(1, 100.0, 100.0), det(2, 300.0, 100.0)], at(0.0));
        for i in 1..=31 {
            // worker 1静止, worker 2每帧移动30px
            tracker.update(
                &[det(1, 100.0, 100.0), det(2, 300.0 + i as f32 * 30.0, 100.0)],
                at(i as f64),
            );
        }
        assert_eq!(tracker.active_idle_counts(), (1, 1));
    }

    #[test]
    fn capacity_limit_drops_new_identities_only() {
        let mut config = MonitorConfig::default();
        config.max_tracked_workers = 2;
        let mut tracker = WorkerTracker::new(config);
        let dets: Vec<Detection> = (0..4).map(|i| det(i, i as f32 * 200.0, 100.0)).collect();
        let workers = tracker.update(&dets, at(0.0));
        assert_eq!(workers.len(), 2);
        // 已有身份不受容量限制影响
        let workers = tracker.update(&dets[..2], at(1.0));
        assert_eq!(workers.len(), 2);
    }

    #[test]
    fn clear_resets_both_sets() {
        let mut tracker = tracker();
        tracker.update(&[det(1, 100.0, 100.0), det(2, 300.0, 100.0)], at(0.0));
        tracker.update(&[det(1, 100.0, 100.0)], at(1.0));
        tracker.clear();
        assert!(tracker.get_worker(1).is_none());
        assert!(tracker.get_worker(2).is_none());
        assert!(tracker.all_active().is_empty());
    }
}
