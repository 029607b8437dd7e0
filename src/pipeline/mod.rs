//! 视频流处理流水线 (Stream Processing Pipeline)
//! Per-stream sequential processing loop
//!
//! 每路视频流一条流水线, 独立线程, 通过crossbeam通道通信:
//! - 帧通道:   外部检测源 → 流水线 (严格按序处理, 绝不并发)
//! - 控制通道: 区域/PPE更新在帧间原子应用, 不会撕裂到帧中间
//! - 结果通道: 流水线 → 下游 (帧N的结果先于帧N+1的处理可见)
//!
//! 多路摄像头各自spawn一条流水线, 实例间无共享可变状态。

use crate::config::MonitorConfig;
use crate::monitor::orchestrator::{DetectionOrchestrator, FrameResult};
use crate::monitor::types::{PpeStatus, RawDetection};
use crate::monitor::zones::{ZoneDef, ZoneEventSink};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{info, warn};

/// 一帧的外部输入
#[derive(Clone, Debug)]
pub struct FrameInput {
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<RawDetection>,
}

/// 控制消息 (帧间应用)
#[derive(Clone, Debug)]
pub enum ControlMessage {
    /// 整体替换区域集合
    UpdateZones(Vec<ZoneDef>),
    AddZone(ZoneDef),
    RemoveZone(String),
    /// 替换PPE结果批次 (节奏比检测粗, 后续帧复用直到下一批)
    UpdatePpe(HashMap<u32, PpeStatus>),
    /// 清空跟踪状态, 区域定义保留
    Reset,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("流水线通道已关闭")]
    ChannelClosed,
}

/// 流水线句柄; drop时自动关停并等待线程退出
pub struct PipelineHandle {
    frame_tx: Sender<FrameInput>,
    ctrl_tx: Sender<ControlMessage>,
    result_rx: Receiver<FrameResult>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn submit_frame(&self, frame: FrameInput) -> Result<(), PipelineError> {
        self.frame_tx
            .send(frame)
            .map_err(|_| PipelineError::ChannelClosed)
    }

    pub fn update_zones(&self, defs: Vec<ZoneDef>) -> Result<(), PipelineError> {
        self.send_control(ControlMessage::UpdateZones(defs))
    }

    pub fn add_zone(&self, def: ZoneDef) -> Result<(), PipelineError> {
        self.send_control(ControlMessage::AddZone(def))
    }

    pub fn remove_zone(&self, zone_id: String) -> Result<(), PipelineError> {
        self.send_control(ControlMessage::RemoveZone(zone_id))
    }

    pub fn update_ppe(&self, ppe: HashMap<u32, PpeStatus>) -> Result<(), PipelineError> {
        self.send_control(ControlMessage::UpdatePpe(ppe))
    }

    pub fn reset(&self) -> Result<(), PipelineError> {
        self.send_control(ControlMessage::Reset)
    }

    fn send_control(&self, msg: ControlMessage) -> Result<(), PipelineError> {
        self.ctrl_tx
            .send(msg)
            .map_err(|_| PipelineError::ChannelClosed)
    }

    /// 帧结果接收端
    pub fn results(&self) -> &Receiver<FrameResult> {
        &self.result_rx
    }

    /// 关停流水线并等待线程退出; 跟踪状态被确定性释放
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.ctrl_tx.send(ControlMessage::Shutdown);
        // 工人线程可能正阻塞在已满的结果通道上;
        // join前持续排空结果, 直到它退出并断开通道
        while self.result_rx.recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 启动一条流水线 (独立线程)
pub fn spawn(config: MonitorConfig, sink: Option<ZoneEventSink>) -> PipelineHandle {
    let (frame_tx, frame_rx) = bounded::<FrameInput>(8);
    let (ctrl_tx, ctrl_rx) = bounded::<ControlMessage>(32);
    let (result_tx, result_rx) = bounded::<FrameResult>(8);

    let handle = thread::spawn(move || run_loop(config, sink, frame_rx, ctrl_rx, result_tx));

    PipelineHandle {
        frame_tx,
        ctrl_tx,
        result_rx,
        handle: Some(handle),
    }
}

fn run_loop(
    config: MonitorConfig,
    sink: Option<ZoneEventSink>,
    frame_rx: Receiver<FrameInput>,
    ctrl_rx: Receiver<ControlMessage>,
    result_tx: Sender<FrameResult>,
) {
    let mut orchestrator = match sink {
        Some(sink) => DetectionOrchestrator::with_event_sink(config, sink),
        None => DetectionOrchestrator::new(config),
    };
    // 最近一批PPE结果, 每帧复用直到下一批到达
    let mut ppe: HashMap<u32, PpeStatus> = HashMap::new();

    info!("✅ 监控流水线启动");

    loop {
        select! {
            recv(ctrl_rx) -> msg => {
                match msg {
                    Ok(msg) => {
                        if apply_control(&mut orchestrator, &mut ppe, msg) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            recv(frame_rx) -> frame => {
                let Ok(frame) = frame else { break };
                // 帧间先应用全部挂起的控制消息,
                // 保证本帧看到的区域集合是一致的
                let mut shutdown = false;
                for msg in ctrl_rx.try_iter() {
                    if apply_control(&mut orchestrator, &mut ppe, msg) {
                        shutdown = true;
                        break;
                    }
                }
                if shutdown {
                    break;
                }

                let result = orchestrator.process_frame(&frame.detections, &ppe, frame.timestamp);
                if result_tx.send(result).is_err() {
                    warn!("⚠️ 结果接收端已关闭, 流水线退出");
                    break;
                }
            }
        }
    }

    // 确定性释放: 无残留定时器, 无残留跟踪状态
    orchestrator.reset();
    info!("🛑 监控流水线退出");
}

/// 应用一条控制消息; 返回true表示请求关停
fn apply_control(
    orchestrator: &mut DetectionOrchestrator,
    ppe: &mut HashMap<u32, PpeStatus>,
    msg: ControlMessage,
) -> bool {
    match msg {
        ControlMessage::UpdateZones(defs) => {
            orchestrator.update_zones(&defs);
        }
        ControlMessage::AddZone(def) => {
            if let Err(e) = orchestrator.add_zone(&def) {
                warn!("⚠️ Zone rejected: {}", e);
            }
        }
        ControlMessage::RemoveZone(zone_id) => orchestrator.remove_zone(&zone_id),
        ControlMessage::UpdatePpe(batch) => *ppe = batch,
        ControlMessage::Reset => orchestrator.reset(),
        ControlMessage::Shutdown => return true,
    }
    false
}
