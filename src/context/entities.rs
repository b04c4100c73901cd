//! 实体抽取：从操作的输入/结果中识别地名与项目名
//!
//! 地名来自固定列表（意大利主要城市，意/英两种写法，可由配置追加），项目名匹配 `project <name>` / `progetto <name>`。

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// 实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Location,
    Project,
}

impl EntityCategory {
    pub fn label(&self) -> &'static str {
        match self {
            EntityCategory::Location => "locations",
            EntityCategory::Project => "projects",
        }
    }
}

const KNOWN_LOCATIONS: &[&str] = &[
    "Milano", "Milan", "Roma", "Rome", "Torino", "Turin", "Napoli", "Naples", "Firenze",
    "Florence", "Venezia", "Venice", "Bologna", "Genova", "Genoa", "Palermo", "Bari", "Verona",
    "Padova", "Padua", "Trieste", "Brescia", "Bergamo", "Catania", "Parma", "Modena", "Pisa",
    "Como", "Monza",
];

/// 输入字段中直接视为地名 / 项目名的键
const LOCATION_KEYS: &[&str] = &["location", "city", "location_a", "location_b", "comune"];
const PROJECT_KEYS: &[&str] = &["project_name", "projectName", "project"];

pub struct EntityExtractor {
    locations: Vec<String>,
    location_re: Regex,
    project_re: Regex,
}

impl EntityExtractor {
    /// 内置地名列表 + 额外地名
    pub fn new(extra_locations: &[String]) -> Result<Self, regex::Error> {
        let mut locations: Vec<String> = KNOWN_LOCATIONS.iter().map(|s| s.to_string()).collect();
        for extra in extra_locations {
            if !locations.iter().any(|l| l.eq_ignore_ascii_case(extra)) {
                locations.push(extra.clone());
            }
        }
        // 长名优先，避免前缀抢先匹配
        let mut alternatives: Vec<&String> = locations.iter().collect();
        alternatives.sort_by_key(|s| std::cmp::Reverse(s.len()));
        let pattern = alternatives
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            location_re: Regex::new(&format!(r"(?i)\b(?:{})\b", pattern))?,
            project_re: Regex::new(r#"(?i)\b(?:project|progetto)\s+"?([A-Za-z0-9][A-Za-z0-9_\-]*)"#)?,
            locations,
        })
    }

    fn canonical_location(&self, found: &str) -> String {
        self.locations
            .iter()
            .find(|l| l.eq_ignore_ascii_case(found))
            .cloned()
            .unwrap_or_else(|| found.to_string())
    }

    /// 文本中出现的地名，按首次出现顺序去重
    pub fn locations_in(&self, text: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for m in self.location_re.find_iter(text) {
            let name = self.canonical_location(m.as_str());
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
        out
    }

    /// 文本中出现的项目名
    pub fn projects_in(&self, text: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for cap in self.project_re.captures_iter(text) {
            if let Some(name) = cap.get(1) {
                let name = name.as_str().to_string();
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// 从任意文本抽取全部实体
    pub fn extract_text(&self, text: &str) -> Vec<(EntityCategory, String)> {
        let mut out: Vec<(EntityCategory, String)> = self
            .locations_in(text)
            .into_iter()
            .map(|l| (EntityCategory::Location, l))
            .collect();
        out.extend(
            self.projects_in(text)
                .into_iter()
                .map(|p| (EntityCategory::Project, p)),
        );
        out
    }

    /// 从 JSON 值（操作输入或结果）递归抽取实体
    pub fn extract_value(&self, value: &Value) -> Vec<(EntityCategory, String)> {
        let mut out = Vec::new();
        self.walk(None, value, &mut out);
        out
    }

    fn walk(&self, key: Option<&str>, value: &Value, out: &mut Vec<(EntityCategory, String)>) {
        match value {
            Value::String(s) => {
                let s_trim = s.trim();
                match key {
                    Some(k) if PROJECT_KEYS.contains(&k) && !s_trim.is_empty() => {
                        out.push((EntityCategory::Project, s_trim.to_string()));
                    }
                    Some(k) if LOCATION_KEYS.contains(&k) && !s_trim.is_empty() => {
                        out.push((EntityCategory::Location, self.canonical_location(s_trim)));
                    }
                    _ => out.extend(self.extract_text(s_trim)),
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(key, item, out);
                }
            }
            Value::Object(map) => {
                for (k, v) in map {
                    self.walk(Some(k.as_str()), v, out);
                }
            }
            _ => {}
        }
    }
}
