//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__LLM__PROVIDER=openai`）。
//! 所有字段均为启动期配置，不随请求变化。

use std::path::PathBuf;

use serde::Deserialize;

use crate::resilience::BreakerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub resilience: ResilienceSection,
    pub cache: CacheSection,
    pub context: ContextSection,
    pub memory: MemorySection,
    pub decision: DecisionSection,
    pub guardrails: GuardrailsSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与单轮调用上限
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；有 API Key 时才会真正启用远程后端
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单轮最多接受的技能调用数，多余的丢弃
    #[serde(default = "default_max_calls_per_turn")]
    pub max_calls_per_turn: usize,
    /// 嵌入模型（为空则不启用语义检索）
    pub embedding_model: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_max_calls_per_turn() -> usize {
    3
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            max_calls_per_turn: default_max_calls_per_turn(),
            embedding_model: None,
        }
    }
}

/// [resilience.*] 段：每个依赖一组熔断参数
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceSection {
    #[serde(default = "BreakerConfig::llm")]
    pub llm: BreakerConfig,
    #[serde(default = "BreakerConfig::storage")]
    pub memory: BreakerConfig,
    #[serde(default = "BreakerConfig::skills")]
    pub skills: BreakerConfig,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            llm: BreakerConfig::llm(),
            memory: BreakerConfig::storage(),
            skills: BreakerConfig::skills(),
        }
    }
}

/// [cache] 段：响应缓存容量、默认 TTL、清扫间隔、模糊匹配阈值
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// 对话类缓存的模糊命中阈值（0~1），为 0 表示关闭模糊查找
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    500
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_fuzzy_threshold() -> f64 {
    0.9
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            default_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            fuzzy_threshold: default_fuzzy_threshold(),
        }
    }
}

/// [context] 段：操作栈容量与会话过期
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_stack_capacity")]
    pub operation_stack_capacity: usize,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// 额外的已知地名（与内置意大利城市列表合并）
    #[serde(default)]
    pub extra_locations: Vec<String>,
}

fn default_stack_capacity() -> usize {
    10
}

fn default_session_ttl_secs() -> u64 {
    3600
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            operation_stack_capacity: default_stack_capacity(),
            session_ttl_secs: default_session_ttl_secs(),
            extra_locations: Vec::new(),
        }
    }
}

/// [memory] 段：存储后端、保留策略、检索参数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// memory / sqlite
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    pub sqlite_path: Option<PathBuf>,
    /// 记录保留时长（秒）
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// 每个用户最多保留的记录数
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// 决策引擎每轮最多取回的记录数
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// 查询时排除最近 N 秒内写入的记录（避免命中本轮自身）
    #[serde(default = "default_exclusion_window_secs")]
    pub exclusion_window_secs: u64,
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_retention_secs() -> u64 {
    30 * 24 * 3600
}

fn default_max_records() -> usize {
    1000
}

fn default_search_limit() -> usize {
    5
}

fn default_exclusion_window_secs() -> u64 {
    2
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            sqlite_path: None,
            retention_secs: default_retention_secs(),
            max_records: default_max_records(),
            search_limit: default_search_limit(),
            exclusion_window_secs: default_exclusion_window_secs(),
        }
    }
}

/// [decision] 段：敏感技能策略
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionSection {
    /// 调用前必须经用户确认的技能 ID
    #[serde(default = "default_sensitive_skills")]
    pub sensitive_skills: Vec<String>,
    /// 意图预解析命中时合成决策的置信度
    #[serde(default = "default_forced_confidence")]
    pub forced_confidence: f32,
}

fn default_sensitive_skills() -> Vec<String> {
    vec![
        "email_send".into(),
        "document_send".into(),
        "project_delete".into(),
    ]
}

fn default_forced_confidence() -> f32 {
    0.95
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            sensitive_skills: default_sensitive_skills(),
            forced_confidence: default_forced_confidence(),
        }
    }
}

/// [guardrails] 段：策略禁止的技能、屏蔽词、最短回复
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailsSection {
    #[serde(default)]
    pub forbidden_skills: Vec<String>,
    #[serde(default = "default_blocked_terms")]
    pub blocked_terms: Vec<String>,
    #[serde(default = "default_min_response_chars")]
    pub min_response_chars: usize,
    #[serde(default = "default_refusal_message")]
    pub refusal_message: String,
}

fn default_blocked_terms() -> Vec<String> {
    vec![
        "money laundering".into(),
        "riciclaggio".into(),
        "tax evasion".into(),
        "evasione fiscale".into(),
        "bribe".into(),
        "tangente".into(),
    ]
}

fn default_min_response_chars() -> usize {
    12
}

fn default_refusal_message() -> String {
    "I'm sorry, I can't provide that answer. Is there something else I can help you with?".to_string()
}

impl Default for GuardrailsSection {
    fn default() -> Self {
        Self {
            forbidden_skills: Vec::new(),
            blocked_terms: default_blocked_terms(),
            min_response_chars: default_min_response_chars(),
            refusal_message: default_refusal_message(),
        }
    }
}

/// [orchestrator] 段：整轮超时
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

fn default_turn_timeout_secs() -> u64 {
    120
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// 启动期校验；任何一项不合法都是致命配置错误
    pub fn validate(&self) -> Result<(), String> {
        self.resilience.llm.validate("llm")?;
        self.resilience.memory.validate("memory")?;
        self.resilience.skills.validate("skills")?;
        if self.cache.capacity == 0 {
            return Err("cache.capacity must be >= 1".into());
        }
        if !(0.0..=1.0).contains(&self.cache.fuzzy_threshold) {
            return Err("cache.fuzzy_threshold must be within [0, 1]".into());
        }
        if self.context.operation_stack_capacity == 0 {
            return Err("context.operation_stack_capacity must be >= 1".into());
        }
        if self.memory.max_records == 0 {
            return Err("memory.max_records must be >= 1".into());
        }
        if self.memory.backend == "sqlite" && self.memory.sqlite_path.is_none() {
            return Err("memory.sqlite_path is required for the sqlite backend".into());
        }
        if !matches!(self.memory.backend.as_str(), "memory" | "sqlite") {
            return Err(format!("unknown memory.backend '{}'", self.memory.backend));
        }
        if self.orchestrator.turn_timeout_secs == 0 {
            return Err("orchestrator.turn_timeout_secs must be > 0".into());
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
