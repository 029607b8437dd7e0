//! 区域监控 - 多边形区域归属与进出/违规事件
//! Zone monitor: polygon membership plus ENTER/EXIT/VIOLATION events
//!
//! 区域定义来自后端/前端配置通道, 逐条校验后整体替换。
//! 事件在check调用内同步产生并按序投递, 核心不保存事件日志。

use super::geometry::{Polygon, PolygonError};
use super::types::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

// ========== 区域定义 ==========

/// 区域安全类型, 枚举顺序即安全优先级 (越靠前越危险)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneType {
    #[default]
    Danger,
    Restricted,
    RequiredPpe,
    Safe,
}

impl ZoneType {
    /// 安全优先级, 数值越小优先级越高
    pub fn priority(self) -> u8 {
        match self {
            ZoneType::Danger => 0,
            ZoneType::Restricted => 1,
            ZoneType::RequiredPpe => 2,
            ZoneType::Safe => 3,
        }
    }
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ZoneType::Danger => "DANGER",
            ZoneType::Restricted => "RESTRICTED",
            ZoneType::RequiredPpe => "REQUIRED_PPE",
            ZoneType::Safe => "SAFE",
        };
        f.write_str(s)
    }
}

/// 后端/前端下发的区域定义 (线上JSON格式)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneDef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub zone_type: ZoneType,
    /// 有序顶点列表 [[x, y], ...], 语义上首尾闭合
    pub coordinates: Vec<[f32; 2]>,
}

/// 非法区域定义
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("区域 {id} 多边形非法: {source}")]
    InvalidPolygon {
        id: String,
        #[source]
        source: PolygonError,
    },
}

/// 已校验的监控区域
#[derive(Clone, Debug)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub zone_type: ZoneType,
    polygon: Polygon,
}

impl Zone {
    /// 校验并构造区域; 非法定义返回错误, 绝不入库
    pub fn from_def(def: &ZoneDef) -> Result<Self, ZoneError> {
        let vertices = def
            .coordinates
            .iter()
            .map(|&[x, y]| Point::new(x, y))
            .collect();
        let polygon = Polygon::new(vertices).map_err(|source| ZoneError::InvalidPolygon {
            id: def.id.clone(),
            source,
        })?;
        Ok(Self {
            id: def.id.clone(),
            name: def
                .name
                .clone()
                .unwrap_or_else(|| format!("Zone {}", def.id)),
            zone_type: def.zone_type,
            polygon,
        })
    }

    /// 点归属测试 (边界在内)
    pub fn contains(&self, p: Point) -> bool {
        self.polygon.contains(p)
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }
}

// ========== 区域事件 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneEventType {
    Enter,
    Exit,
    Violation,
}

impl fmt::Display for ZoneEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ZoneEventType::Enter => "ENTER",
            ZoneEventType::Exit => "EXIT",
            ZoneEventType::Violation => "VIOLATION",
        };
        f.write_str(s)
    }
}

/// 区域事件 (短生命周期: 产生 → 同步投递 → 丢弃)
#[derive(Clone, Debug, Serialize)]
pub struct ZoneEvent {
    pub event_type: ZoneEventType,
    pub zone_id: String,
    pub zone_name: String,
    pub zone_type: ZoneType,
    pub worker_id: u32,
    pub timestamp: DateTime<Utc>,
    pub position: Point,
}

/// 单订阅者事件回调, 在check调用内同步执行
pub type ZoneEventSink = Box<dyn FnMut(&ZoneEvent) + Send>;

// ========== 区域监控器 ==========

/// 区域监控器, 每路视频流一个实例
pub struct ZoneMonitor {
    /// BTreeMap保证遍历与事件顺序确定
    zones: BTreeMap<String, Zone>,
    /// 每个工人上一次check时的区域归属快照
    worker_zones: HashMap<u32, BTreeSet<String>>,
    sink: Option<ZoneEventSink>,
}

impl ZoneMonitor {
    pub fn new() -> Self {
        Self {
            zones: BTreeMap::new(),
            worker_zones: HashMap::new(),
            sink: None,
        }
    }

    pub fn with_sink(sink: ZoneEventSink) -> Self {
        let mut monitor = Self::new();
        monitor.sink = Some(sink);
        monitor
    }

    pub fn set_sink(&mut self, sink: ZoneEventSink) {
        self.sink = Some(sink);
    }

    /// 整体替换区域集合; 非法定义逐条丢弃并记录原因, 返回加载数量
    pub fn update_zones(&mut self, defs: &[ZoneDef]) -> usize {
        info!("🔄 Processing {} zones...", defs.len());
        let mut next: BTreeMap<String, Zone> = BTreeMap::new();
        for def in defs {
            match Zone::from_def(def) {
                Ok(zone) => {
                    info!("  ✅ Zone loaded: {} ({})", zone.name, zone.zone_type);
                    next.insert(zone.id.clone(), zone);
                }
                Err(e) => warn!("  ⚠️ Zone rejected: {}", e),
            }
        }
        let loaded = next.len();
        self.zones = next;
        info!("✅ {} zones active", loaded);
        loaded
    }

    /// 增量添加单个区域
    pub fn add_zone(&mut self, def: &ZoneDef) -> Result<(), ZoneError> {
        let zone = Zone::from_def(def)?;
        info!("✅ Zone added: {} ({})", zone.name, zone.zone_type);
        self.zones.insert(zone.id.clone(), zone);
        Ok(())
    }

    /// 删除区域; 不存在时为无操作
    pub fn remove_zone(&mut self, zone_id: &str) {
        if let Some(zone) = self.zones.remove(zone_id) {
            info!("🗑️ Zone removed: {}", zone.name);
        }
    }

    /// 归属测试 + 进出事件, 耦合在一次调用内
    ///
    /// 事件决策依赖该工人上一次调用的归属快照, 因此二者不可拆分。
    /// 返回当前包含该位置的区域 (克隆, 按优先级再按ID排序)。
    pub fn check(&mut self, worker_id: u32, position: Point, now: DateTime<Utc>) -> Vec<Zone> {
        let current: BTreeSet<String> = self
            .zones
            .values()
            .filter(|z| z.contains(position))
            .map(|z| z.id.clone())
            .collect();
        let previous = self
            .worker_zones
            .get(&worker_id)
            .cloned()
            .unwrap_or_default();

        // 进入: ENTER, DANGER区域紧跟VIOLATION (每次进入都发, 不限流)
        for zone_id in current.difference(&previous) {
            let Some(zone) = self.zones.get(zone_id) else {
                continue;
            };
            let is_danger = zone.zone_type == ZoneType::Danger;
            let enter = make_event(ZoneEventType::Enter, zone, worker_id, position, now);
            self.emit(enter);
            if is_danger {
                let Some(zone) = self.zones.get(zone_id) else {
                    continue;
                };
                let violation = make_event(ZoneEventType::Violation, zone, worker_id, position, now);
                self.emit(violation);
            }
        }

        // 离开: 仅对仍存在的区域发EXIT, 已删除的区域事件被抑制
        for zone_id in previous.difference(&current) {
            if let Some(zone) = self.zones.get(zone_id) {
                let exit = make_event(ZoneEventType::Exit, zone, worker_id, position, now);
                self.emit(exit);
            }
        }

        // 无条件存储本次归属快照
        self.worker_zones.insert(worker_id, current.clone());

        let mut result: Vec<Zone> = current
            .iter()
            .filter_map(|id| self.zones.get(id))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.zone_type
                .priority()
                .cmp(&b.zone_type.priority())
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    fn emit(&mut self, event: ZoneEvent) {
        let emoji = match event.event_type {
            ZoneEventType::Enter => "🚧",
            ZoneEventType::Exit => "🚪",
            ZoneEventType::Violation => "🚨",
        };
        info!(
            "{} Zone {}: Worker {} -> {} ({})",
            emoji, event.event_type, event.worker_id, event.zone_name, event.zone_type
        );
        if let Some(sink) = self.sink.as_mut() {
            sink(&event);
        }
    }

    /// 某点处最高优先级的区域 (DANGER > RESTRICTED > REQUIRED_PPE > SAFE)
    pub fn zone_at(&self, p: Point) -> Option<&Zone> {
        self.zones
            .values()
            .filter(|z| z.contains(p))
            .min_by_key(|z| z.zone_type.priority())
    }

    /// 各区域当前的工人占用
    pub fn occupancy(&self) -> BTreeMap<String, BTreeSet<u32>> {
        let mut occupancy: BTreeMap<String, BTreeSet<u32>> = self
            .zones
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (&worker_id, zone_ids) in &self.worker_zones {
            for zone_id in zone_ids {
                if let Some(workers) = occupancy.get_mut(zone_id) {
                    workers.insert(worker_id);
                }
            }
        }
        occupancy
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// 清除单个工人的归属记录
    pub fn clear_worker(&mut self, worker_id: u32) {
        self.worker_zones.remove(&worker_id);
    }

    /// 丢弃不在身份集合中的归属记录
    ///
    /// 跟踪器遗忘或重映射身份后调用, 否则occupancy会
    /// 一直把早已消失的工人报告为在区域内。
    pub fn retain_workers(&mut self, known: &HashSet<u32>) {
        self.worker_zones.retain(|id, _| known.contains(id));
    }

    /// 清除所有工人的归属记录, 区域定义保留
    pub fn clear_memberships(&mut self) {
        self.worker_zones.clear();
    }

    /// 清除区域与归属的全部状态
    pub fn clear(&mut self) {
        self.zones.clear();
        self.worker_zones.clear();
    }
}

impl Default for ZoneMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn make_event(
    event_type: ZoneEventType,
    zone: &Zone,
    worker_id: u32,
    position: Point,
    now: DateTime<Utc>,
) -> ZoneEvent {
    ZoneEvent {
        event_type,
        zone_id: zone.id.clone(),
        zone_name: zone.name.clone(),
        zone_type: zone.zone_type,
        worker_id,
        timestamp: now,
        position,
    }
}
