//! Concierge - 对话助手的决策与执行核心
//!
//! 每轮用户输入在这里被决定为对话、技能调用或工作流，并在熔断、缓存与护栏的保护下执行。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **context**: 会话上下文（操作历史、实体、当前工作数据）
//! - **core**: 错误与恢复、依赖装配、Orchestrator 单轮请求/响应
//! - **decision**: 意图预解析、决策引擎、提示组装与关键词回退
//! - **guardrails**: 回复的事后校验（修正或拒答）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入
//! - **memory**: 交互记录存储（进程内 / SQLite）、检索与后台写入
//! - **observability**: 日志初始化
//! - **resilience**: 熔断器与响应缓存
//! - **skills**: 技能 trait、输入 schema、目录与执行器
//! - **workflow**: 工作流构建、模板与顺序执行引擎

pub mod config;
pub mod context;
pub mod core;
pub mod decision;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod resilience;
pub mod skills;
pub mod workflow;

pub use crate::core::{Orchestrator, OrchestratorBuilder, TurnRequest, TurnResponse};
