//! 监控参数配置 - 可通过JSON文件调整
//! Monitor configuration, adjustable via a JSON file
//!
//! 每路视频流持有自己的一份配置副本, 不使用全局单例,
//! 多路并行监控时互不影响。

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{info, warn};

/// 监控核心参数
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    // === 重识别参数 ===
    pub disappearance_tolerance_secs: f32, // 消失后保留身份的时间(秒)
    pub position_match_threshold_px: f32,  // 重识别位置匹配阈值(像素)

    // === 空闲判定参数 ===
    pub idle_movement_threshold_px: f32, // 窗口净位移低于该值视为静止(像素)
    pub idle_time_threshold_secs: f32,   // 静止多久标记为IDLE(秒)
    pub history_window_secs: f32,        // 位置历史保留窗口(秒)

    // === 跟踪容量 ===
    pub max_tracked_workers: usize, // 同时跟踪的工人上限

    // === PPE合规策略 ===
    pub ppe_default_compliant: bool, // 无PPE结果的工人是否默认合规
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            disappearance_tolerance_secs: 5.0,
            position_match_threshold_px: 100.0,
            idle_movement_threshold_px: 20.0,
            idle_time_threshold_secs: 30.0,
            history_window_secs: 3.0,
            max_tracked_workers: 20,
            ppe_default_compliant: false,
        }
    }
}

impl MonitorConfig {
    /// 从JSON文件加载配置, 文件缺失或解析失败时回退默认值
    pub fn load(path: &str) -> Self {
        match Self::try_load(path) {
            Ok(config) => {
                info!("✅ 配置已从 {} 加载", path);
                config
            }
            Err(e) => {
                warn!("⚠️ 配置加载失败: {:#}, 使用默认值", e);
                Self::default()
            }
        }
    }

    fn try_load(path: &str) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path).with_context(|| format!("读取配置文件 {}", path))?;
        let config = serde_json::from_str(&json).with_context(|| format!("解析配置文件 {}", path))?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("写入配置文件 {}", path))?;
        info!("💾 配置已保存到 {}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_match_documented_thresholds() {
        let config = MonitorConfig::default();
        assert_eq!(config.disappearance_tolerance_secs, 5.0);
        assert_eq!(config.position_match_threshold_px, 100.0);
        assert_eq!(config.idle_movement_threshold_px, 20.0);
        assert_eq!(config.idle_time_threshold_secs, 30.0);
        assert_eq!(config.history_window_secs, 3.0);
        assert_eq!(config.max_tracked_workers, 20);
        assert!(!config.ppe_default_compliant);
    }

    #[test]
    fn load_of_missing_file_falls_back_to_defaults() {
        let config = MonitorConfig::load("/nonexistent/sitewatch.json");
        assert_eq!(config.max_tracked_workers, 20);
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = MonitorConfig::default();
        config.idle_time_threshold_secs = 12.5;
        let json = serde_json::to_string(&config).unwrap();
        let back: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.idle_time_threshold_secs, 12.5);
    }
}
