//! 监控核心 (Monitoring Core)
//!
//! 纯CPU内存计算, 不做任何模型推理:
//! - geometry:     多边形归属测试
//! - tracker:      工人跟踪与重识别
//! - zones:        区域监控与进出/违规事件
//! - orchestrator: 逐帧编排
pub mod geometry;
pub mod orchestrator;
pub mod tracker;
pub mod types;
pub mod zones;

pub use geometry::{Polygon, PolygonError};
pub use orchestrator::{DetectionOrchestrator, FrameResult, MonitorStats};
pub use tracker::WorkerTracker;
pub use types::{
    BBox, Detection, Point, PpeStatus, PpeViolation, RawDetection, TrackPoint, WorkerState,
};
pub use zones::{
    Zone, ZoneDef, ZoneError, ZoneEvent, ZoneEventSink, ZoneEventType, ZoneMonitor, ZoneType,
};
