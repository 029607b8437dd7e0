//! 监控系统数据结构定义
//! Data structures for the worker safety monitoring core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ========== 基础几何类型 ==========

/// 帧像素坐标系中的二维点
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// 检测框 (绝对像素坐标, 左上/右下)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 脚部参考点: 框底边中点
    pub fn feet(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, self.y2)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// 有效框: 坐标有限且右下严格在左上的右下方
    pub fn is_valid(&self) -> bool {
        self.x1.is_finite()
            && self.y1.is_finite()
            && self.x2.is_finite()
            && self.y2.is_finite()
            && self.x2 > self.x1
            && self.y2 > self.y1
    }
}

// ========== 外部检测输入 ==========

/// 上游检测器的原始输出
///
/// `track_id` 是上游分配的外部标签, 不保证跨帧稳定,
/// 跟踪器据此做重识别而不是盲目信任它。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub track_id: Option<u32>,
    /// [x1, y1, x2, y2] 绝对像素坐标
    #[serde(default, rename = "box")]
    pub bbox: Option<[f32; 4]>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub label: Option<String>,
}

/// 归一化后的检测 (进入跟踪器前已校验)
#[derive(Clone, Debug)]
pub struct Detection {
    pub track_id: u32,
    pub bbox: BBox,
    pub confidence: f32,
}

// ========== PPE合规 ==========

/// PPE违规项 (封闭枚举, 线上格式为SCREAMING_SNAKE_CASE)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PpeViolation {
    NoHelmet,
    NoVest,
    NoGloves,
}

/// 外部PPE分类器输出的合规状态
///
/// 更新节奏比检测粗, 帧间可能过期, 跟踪器按尽力而为合并。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PpeStatus {
    pub has_helmet: bool,
    pub has_vest: bool,
    pub has_gloves: bool,
    #[serde(default)]
    pub violations: Vec<PpeViolation>,
    pub is_compliant: bool,
}

// ========== 跟踪状态 ==========

/// 位置历史轨迹点
#[derive(Clone, Copy, Debug)]
pub struct TrackPoint {
    pub t: DateTime<Utc>,
    pub x: f32,
    pub y: f32,
}

/// 单个工人的跟踪状态
///
/// `track_id` 是对外暴露的稳定身份; 重识别时内部状态保留,
/// 仅外部标签被重新映射。
#[derive(Clone, Debug)]
pub struct WorkerState {
    pub track_id: u32,
    /// 当前参考位置 (脚部)
    pub position: Point,
    /// 滑动窗口内的位置历史 (用于空闲判定)
    pub position_history: VecDeque<TrackPoint>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// false = 已消失但仍在容忍期内
    pub is_active: bool,
    pub is_idle: bool,
    /// 静止开始时间 (一旦有足够位移立即清空)
    pub idle_since: Option<DateTime<Utc>>,
    pub ppe: Option<PpeStatus>,
    pub current_zone: Option<String>,
}

impl WorkerState {
    pub(crate) fn new(track_id: u32, position: Point, now: DateTime<Utc>) -> Self {
        let mut history = VecDeque::new();
        history.push_back(TrackPoint {
            t: now,
            x: position.x,
            y: position.y,
        });
        Self {
            track_id,
            position,
            position_history: history,
            first_seen: now,
            last_seen: now,
            is_active: true,
            is_idle: false,
            idle_since: None,
            ppe: None,
            current_zone: None,
        }
    }

    /// 保留窗口内的净位移: 最老保留点 → 当前位置
    ///
    /// 用窗口净位移而不是相邻帧位移做空闲判定, 可平滑单帧抖动。
    pub fn window_displacement(&self) -> f32 {
        match self.position_history.front() {
            Some(oldest) => self.position.distance(Point::new(oldest.x, oldest.y)),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feet_is_bottom_center() {
        let bbox = BBox::new(10.0, 20.0, 30.0, 80.0);
        let feet = bbox.feet();
        assert_eq!(feet, Point::new(20.0, 80.0));
    }

    #[test]
    fn degenerate_boxes_are_invalid() {
        assert!(!BBox::new(10.0, 10.0, 10.0, 20.0).is_valid());
        assert!(!BBox::new(10.0, 10.0, 5.0, 20.0).is_valid());
        assert!(!BBox::new(f32::NAN, 10.0, 20.0, 20.0).is_valid());
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn raw_detection_tolerates_missing_fields() {
        let det: RawDetection = serde_json::from_str(r#"{"confidence": 0.8}"#).unwrap();
        assert!(det.track_id.is_none());
        assert!(det.bbox.is_none());

        let det: RawDetection =
            serde_json::from_str(r#"{"track_id": 7, "box": [0.0, 0.0, 10.0, 20.0], "confidence": 0.9}"#)
                .unwrap();
        assert_eq!(det.track_id, Some(7));
        assert_eq!(det.bbox, Some([0.0, 0.0, 10.0, 20.0]));
    }

    #[test]
    fn ppe_violations_use_wire_names() {
        let status: PpeStatus = serde_json::from_str(
            r#"{"has_helmet": false, "has_vest": true, "has_gloves": false,
                "violations": ["NO_HELMET", "NO_GLOVES"], "is_compliant": false}"#,
        )
        .unwrap();
        assert_eq!(
            status.violations,
            vec![PpeViolation::NoHelmet, PpeViolation::NoGloves]
        );
    }
}
