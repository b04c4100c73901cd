//! 技能输入契约
//!
//! 每个技能声明一份 SkillSchema（字段名、类型、是否必填、默认值；封闭或开放映射）。
//! 参数在目录边界校验，通过后得到 ValidatedArgs，这是 Skill::execute 唯一接受的参数类型。

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// 参数校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}, got {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("unexpected field '{0}'")]
    UnexpectedField(String),

    #[error("unknown skill '{0}'")]
    UnknownSkill(String),
}

impl SchemaError {
    /// 出问题的字段名（用于澄清问题）
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaError::MissingField(f) | SchemaError::UnexpectedField(f) => Some(f),
            SchemaError::WrongType { field, .. } => Some(field),
            _ => None,
        }
    }

    /// 面向用户的简短说明
    pub fn user_hint(&self) -> String {
        match self {
            SchemaError::MissingField(f) => format!("the {} is missing", f.replace('_', " ")),
            SchemaError::WrongType { field, expected, .. } => {
                format!("the {} should be {}", field.replace('_', " "), expected)
            }
            SchemaError::UnexpectedField(f) => format!("'{}' is not something I can use here", f),
            other => other.to_string(),
        }
    }
}

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Integer => "an integer",
            FieldKind::Boolean => "a boolean",
            FieldKind::Array => "an array",
            FieldKind::Object => "an object",
            FieldKind::Any => "any value",
        }
    }

    fn json_type(&self) -> Option<&'static str> {
        match self {
            FieldKind::String => Some("string"),
            FieldKind::Number => Some("number"),
            FieldKind::Integer => Some("integer"),
            FieldKind::Boolean => Some("boolean"),
            FieldKind::Array => Some("array"),
            FieldKind::Object => Some("object"),
            FieldKind::Any => None,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    /// 缺省时填入的默认值（仅对可选字段生效）
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// 技能输入 schema
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkillSchema {
    pub fields: Vec<FieldSpec>,
    /// 开放映射：允许未声明的字段（原样透传）
    pub open: bool,
}

impl SkillSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// 通用开放映射（仅用于真正接受任意键值的技能）
    pub fn open_map() -> Self {
        Self {
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn allow_extra(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// 校验参数；null 视为空对象
    pub fn validate(&self, args: &Value) -> Result<ValidatedArgs, SchemaError> {
        let empty = Map::new();
        let map = match args {
            Value::Object(m) => m,
            Value::Null => &empty,
            other => return Err(SchemaError::NotAnObject(type_name(other))),
        };

        let mut out = Map::new();
        for spec in &self.fields {
            match map.get(&spec.name) {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(SchemaError::MissingField(spec.name.clone()));
                    }
                    if let Some(default) = &spec.default {
                        out.insert(spec.name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(SchemaError::WrongType {
                            field: spec.name.clone(),
                            expected: spec.kind.describe(),
                            found: type_name(value),
                        });
                    }
                    out.insert(spec.name.clone(), value.clone());
                }
            }
        }

        for (key, value) in map {
            if self.fields.iter().any(|f| &f.name == key) {
                continue;
            }
            if !self.open {
                return Err(SchemaError::UnexpectedField(key.clone()));
            }
            out.insert(key.clone(), value.clone());
        }
        Ok(ValidatedArgs(out))
    }

    /// JSON Schema 形式（写入模型提示中的技能描述）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for f in &self.fields {
            let mut prop = Map::new();
            if let Some(t) = f.kind.json_type() {
                prop.insert("type".into(), json!(t));
            }
            if !f.description.is_empty() {
                prop.insert("description".into(), json!(f.description));
            }
            if let Some(d) = &f.default {
                prop.insert("default".into(), d.clone());
            }
            properties.insert(f.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self.required_fields().map(|f| f.name.as_str()).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.open,
        })
    }
}

/// 通过校验的参数
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// 反序列化为技能自己的强类型输入
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}
