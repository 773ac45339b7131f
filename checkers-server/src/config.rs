//! 服务端配置

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use protocol::{Rules, DEFAULT_PORT, HEARTBEAT_TIMEOUT_SECS, MAX_CONNECTIONS};

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "CHECKERS_CONFIG";

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 最大同时连接数
    pub max_connections: usize,
    /// 超过该时间未收到任何消息则断开连接
    pub heartbeat_timeout_secs: u64,
    /// 房间空闲超时，None 表示不清理
    pub idle_room_ttl_secs: Option<u64>,
    /// 规则变体
    pub rules: Rules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_connections: MAX_CONNECTIONS,
            heartbeat_timeout_secs: HEARTBEAT_TIMEOUT_SECS,
            idle_room_ttl_secs: None,
            rules: Rules::default(),
        }
    }
}

impl ServerConfig {
    /// 从 JSON 文本解析
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("配置格式错误")
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("无法解析配置文件 {}", path.display()))
    }

    /// 按环境变量加载，未设置时使用默认配置
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn idle_room_ttl(&self) -> Option<Duration> {
        self.idle_room_ttl_secs.map(Duration::from_secs)
    }
}
