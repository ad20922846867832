//! 执行单元描述与参数绑定

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use jobrunner_core::{SchedulerError, SchedulerResult};

/// 已按输入模式校验过的参数
pub type ParameterValues = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    /// 不做类型检查
    Any,
}

impl ParameterKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Object => value.is_object(),
            ParameterKind::Array => value.is_array(),
            ParameterKind::Any => true,
        }
    }
}

/// 单个输入参数的声明
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

impl ParameterSpec {
    pub fn required<S: Into<String>>(name: S, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
        }
    }

    pub fn optional<S: Into<String>>(name: S, kind: ParameterKind, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default,
        }
    }
}

/// 执行单元描述（authority + code + 输入模式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitDescriptor {
    pub authority: String,
    pub code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub inputs: Vec<ParameterSpec>,
}

impl UnitDescriptor {
    pub fn new<A: Into<String>, C: Into<String>>(authority: A, code: C) -> Self {
        let code = code.into();
        Self {
            authority: authority.into(),
            title: code.clone(),
            code,
            inputs: Vec::new(),
        }
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_input(mut self, input: ParameterSpec) -> Self {
        self.inputs.push(input);
        self
    }

    /// 按输入模式绑定原始参数
    ///
    /// 原始参数必须是对象（`null` 视为空对象）。未声明的键、缺失的必填项
    /// 以及类型不符都会返回 `InvalidParameters`；缺省项用默认值填充。
    pub fn bind(&self, raw: &Value) -> SchedulerResult<ParameterValues> {
        let empty = Map::new();
        let provided = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(SchedulerError::invalid_params(format!(
                    "{}/{} 的参数必须是对象，实际为: {other}",
                    self.authority, self.code
                )))
            }
        };

        if let Some(unknown) = provided
            .keys()
            .find(|key| !self.inputs.iter().any(|spec| &spec.name == *key))
        {
            return Err(SchedulerError::invalid_params(format!(
                "{}/{} 未声明参数: {unknown}",
                self.authority, self.code
            )));
        }

        let mut bound = Map::new();
        for spec in &self.inputs {
            match provided.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    if !spec.kind.accepts(value) {
                        return Err(SchedulerError::invalid_params(format!(
                            "参数 {} 类型错误，期望 {:?}，实际为: {value}",
                            spec.name, spec.kind
                        )));
                    }
                    bound.insert(spec.name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &spec.default {
                        bound.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(SchedulerError::invalid_params(format!(
                            "缺少必填参数: {}",
                            spec.name
                        )));
                    }
                }
            }
        }

        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> UnitDescriptor {
        UnitDescriptor::new("local", "buffer")
            .with_input(ParameterSpec::required("distance", ParameterKind::Number))
            .with_input(ParameterSpec::optional(
                "unit",
                ParameterKind::String,
                Some(json!("m")),
            ))
            .with_input(ParameterSpec::optional("tags", ParameterKind::Array, None))
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound = descriptor().bind(&json!({ "distance": 12.5 })).unwrap();
        assert_eq!(bound["distance"], json!(12.5));
        assert_eq!(bound["unit"], json!("m"));
        assert!(!bound.contains_key("tags"));
    }

    #[test]
    fn test_bind_rejects_missing_required() {
        let err = descriptor().bind(&json!({ "unit": "km" })).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameters(_)));
    }

    #[test]
    fn test_bind_rejects_wrong_kind() {
        let err = descriptor().bind(&json!({ "distance": "far" })).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParameters(_)));
    }

    #[test]
    fn test_bind_rejects_unknown_key() {
        let err = descriptor()
            .bind(&json!({ "distance": 1, "colour": "red" }))
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_bind_rejects_non_object() {
        assert!(descriptor().bind(&json!([1, 2])).is_err());
        let empty = UnitDescriptor::new("local", "noop");
        assert!(empty.bind(&Value::Null).unwrap().is_empty());
    }
}
