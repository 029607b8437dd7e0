//! 工地安全监控核心 (Site Safety Monitoring Core)
//!
//! 接收外部检测结果, 维护工人身份与状态, 监控危险区域进出,
//! 合并PPE合规结果, 输出逐帧不可变快照与区域事件。
//!
//! 分层:
//! - config:   监控参数 (JSON加载, 缺省回退)
//! - monitor:  纯计算核心 (几何/跟踪/区域/编排)
//! - pipeline: 每路视频流一条线程流水线

pub mod config; // 监控配置参数
pub mod monitor; // 监控核心
pub mod pipeline; // 流处理流水线

pub use crate::config::MonitorConfig;
pub use crate::monitor::{
    BBox, Detection, DetectionOrchestrator, FrameResult, MonitorStats, Point, Polygon,
    PolygonError, PpeStatus, PpeViolation, RawDetection, TrackPoint, WorkerState, WorkerTracker,
    Zone, ZoneDef, ZoneError, ZoneEvent, ZoneEventSink, ZoneEventType, ZoneMonitor, ZoneType,
};
pub use crate::pipeline::{spawn, ControlMessage, FrameInput, PipelineError, PipelineHandle};
