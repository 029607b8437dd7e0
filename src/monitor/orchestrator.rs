//! 逐帧编排器
//! Per-frame orchestrator: detections → tracker → zones → PPE merge
//!
//! 职责: 每帧按固定顺序驱动跟踪器与区域监控器,
//! 合并外部PPE结果, 组装不可变的帧结果快照。
//! 不做任何模型推理, 不持有两大组件之外的可变状态。

use super::tracker::WorkerTracker;
use super::types::{BBox, Detection, PpeStatus, RawDetection, WorkerState};
use super::zones::{ZoneDef, ZoneError, ZoneEvent, ZoneEventSink, ZoneMonitor};
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

/// 单帧处理结果 (不可变快照)
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub timestamp: DateTime<Utc>,
    pub frame_number: u64,
    /// 活跃工人状态 (含本帧合并后的PPE与区域归属)
    pub workers: Vec<WorkerState>,
    /// 本帧外部送入的PPE结果
    pub ppe: HashMap<u32, PpeStatus>,
    /// 本帧产生的区域事件 (已同步投递给订阅者)
    pub zone_events: Vec<ZoneEvent>,
    pub raw_detections: Vec<RawDetection>,
    pub processing_time_ms: f64,
}

impl FrameResult {
    /// 供流媒体/API层使用的工人元数据
    ///
    /// `ppe_default_compliant`: 无PPE结果的工人按该策略上报合规性
    pub fn worker_metadata(&self, ppe_default_compliant: bool) -> Vec<serde_json::Value> {
        self.workers
            .iter()
            .map(|w| {
                let (compliant, violations, helmet, vest, gloves) = match &w.ppe {
                    Some(p) => (
                        p.is_compliant,
                        p.violations.clone(),
                        p.has_helmet,
                        p.has_vest,
                        p.has_gloves,
                    ),
                    None => (ppe_default_compliant, Vec::new(), false, false, false),
                };
                json!({
                    "id": w.track_id,
                    "workerId": w.track_id.to_string(),
                    "x": w.position.x,
                    "y": w.position.y,
                    "isIdle": w.is_idle,
                    "zone": w.current_zone,
                    "ppeCompliant": compliant,
                    "ppeViolations": violations,
                    "hasHelmet": helmet,
                    "hasVest": vest,
                    "hasGloves": gloves,
                })
            })
            .collect()
    }
}

/// 监控统计快照
#[derive(Clone, Debug, Serialize)]
pub struct MonitorStats {
    pub total_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub zones_defined: usize,
    pub frame_count: u64,
    pub last_processing_ms: f64,
}

/// 逐帧编排器, 每路视频流一个实例
pub struct DetectionOrchestrator {
    config: MonitorConfig,
    tracker: WorkerTracker,
    zones: ZoneMonitor,
    frame_counter: u64,
    last_processing_ms: f64,
    /// 当前帧事件缓冲 (区域监控器的sink写入, 帧末取出)
    frame_events: Arc<Mutex<Vec<ZoneEvent>>>,
}

impl DetectionOrchestrator {
    pub fn new(config: MonitorConfig) -> Self {
        Self::build(config, None)
    }

    /// 带外部事件订阅者构造; 事件先入帧缓冲再转发给订阅者
    pub fn with_event_sink(config: MonitorConfig, sink: ZoneEventSink) -> Self {
        Self::build(config, Some(sink))
    }

    fn build(config: MonitorConfig, external: Option<ZoneEventSink>) -> Self {
        let frame_events: Arc<Mutex<Vec<ZoneEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::clone(&frame_events);
        let mut external = external;
        let zones = ZoneMonitor::with_sink(Box::new(move |event: &ZoneEvent| {
            if let Ok(mut buf) = buffer.lock() {
                buf.push(event.clone());
            }
            if let Some(sink) = external.as_mut() {
                sink(event);
            }
        }));

        Self {
            tracker: WorkerTracker::new(config.clone()),
            zones,
            config,
            frame_counter: 0,
            last_processing_ms: 0.0,
            frame_events,
        }
    }

    /// 处理一帧: 归一化 → 跟踪 → PPE合并 → 区域检查 → 组装结果
    ///
    /// 同一路流的帧必须按序调用, 不可并发。
    pub fn process_frame(
        &mut self,
        raw: &[RawDetection],
        ppe: &HashMap<u32, PpeStatus>,
        now: DateTime<Utc>,
    ) -> FrameResult {
        let started = Instant::now();
        self.frame_counter += 1;
        if let Ok(mut buf) = self.frame_events.lock() {
            buf.clear();
        }

        // 1. 归一化外部检测 (畸形检测逐条跳过, 不中断整帧)
        let detections = self.normalize(raw);

        // 2. 跟踪更新; 被遗忘/重映射的身份同步丢弃区域归属
        let tracked = self.tracker.update(&detections, now);
        self.zones.retain_workers(&self.tracker.tracked_ids());

        // 3. 合并PPE结果 (尽力而为, 未知ID静默忽略)
        for (&track_id, status) in ppe {
            self.tracker.update_ppe_status(track_id, status.clone());
        }

        // 4. 区域检查, 最高优先级区域写回跟踪器
        for worker in &tracked {
            let zones = self.zones.check(worker.track_id, worker.position, now);
            let primary = zones.first().map(|z| z.id.clone());
            self.tracker.update_zone(worker.track_id, primary);
        }

        // 5. 组装不可变结果 (重新取快照, 使PPE/区域合并可见)
        let workers = self.tracker.all_active();
        let zone_events = self
            .frame_events
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.last_processing_ms = processing_time_ms;

        FrameResult {
            timestamp: now,
            frame_number: self.frame_counter,
            workers,
            ppe: ppe.clone(),
            zone_events,
            raw_detections: raw.to_vec(),
            processing_time_ms,
        }
    }

    /// 原始检测 → 已校验检测; 缺框/畸形框跳过
    fn normalize(&self, raw: &[RawDetection]) -> Vec<Detection> {
        raw.iter()
            .filter_map(|d| {
                let track_id = d.track_id?;
                let Some([x1, y1, x2, y2]) = d.bbox else {
                    debug!("⚠️ 检测缺少边界框, 跳过 (track_id={})", track_id);
                    return None;
                };
                let bbox = BBox::new(x1, y1, x2, y2);
                if !bbox.is_valid() {
                    debug!("⚠️ 边界框畸形, 跳过 (track_id={})", track_id);
                    return None;
                }
                Some(Detection {
                    track_id,
                    bbox,
                    confidence: d.confidence,
                })
            })
            .collect()
    }

    // ========== 区域管理委托 ==========

    pub fn update_zones(&mut self, defs: &[ZoneDef]) -> usize {
        self.zones.update_zones(defs)
    }

    pub fn add_zone(&mut self, def: &ZoneDef) -> Result<(), ZoneError> {
        self.zones.add_zone(def)
    }

    pub fn remove_zone(&mut self, zone_id: &str) {
        self.zones.remove_zone(zone_id)
    }

    // ========== 查询与复位 ==========

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &WorkerTracker {
        &self.tracker
    }

    pub fn zone_monitor(&self) -> &ZoneMonitor {
        &self.zones
    }

    pub fn stats(&self) -> MonitorStats {
        let (active, idle) = self.tracker.active_idle_counts();
        MonitorStats {
            total_workers: active + idle,
            active_workers: active,
            idle_workers: idle,
            zones_defined: self.zones.zone_count(),
            frame_count: self.frame_counter,
            last_processing_ms: self.last_processing_ms,
        }
    }

    /// 复位跟踪状态; 区域定义保留
    pub fn reset(&mut self) {
        self.tracker.clear();
        self.zones.clear_memberships();
        self.frame_counter = 0;
        if let Ok(mut buf) = self.frame_events.lock() {
            buf.clear();
        }
    }
}
