/// WebSocket RPC 消息定义
///
/// 线上格式为只有一个键的 JSON 对象：键是过程名，值是有序参数数组，
/// 例如 `{"printToConsole": ["Hello there!"]}`。没有请求 ID，也没有响应关联。

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use super::RpcError;

/// 旧版信封中的过程名字段
const LEGACY_PROCEDURE_KEY: &str = "pro";

/// 旧版信封中的参数字段
const LEGACY_ARGUMENTS_KEY: &str = "par";

/// RPC 消息
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    /// 过程名
    pub procedure: String,

    /// 有序参数列表
    pub arguments: Vec<Value>,
}

impl RpcMessage {
    /// 创建调用消息
    pub fn new(procedure: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            procedure: procedure.into(),
            arguments,
        }
    }

    /// 创建不带参数的调用消息
    pub fn without_arguments(procedure: impl Into<String>) -> Self {
        Self::new(procedure, Vec::new())
    }

    /// 由任意可序列化的参数元组/数组创建调用消息
    ///
    /// `("a", 1)` 会变成 `["a", 1]`；序列化结果不是数组时返回参数错误。
    pub fn from_serializable<A: serde::Serialize>(
        procedure: impl Into<String>,
        arguments: &A,
    ) -> Result<Self, RpcError> {
        match serde_json::to_value(arguments)? {
            Value::Array(arguments) => Ok(Self::new(procedure, arguments)),
            Value::Null => Ok(Self::without_arguments(procedure)),
            other => Err(RpcError::invalid_params(format!(
                "参数必须序列化为数组，实际为: {}",
                other
            ))),
        }
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// 从 JSON 值解析
    ///
    /// 同时接受旧版的 `{"pro": "<name>", "par": [...]}` 信封。
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(RpcError::invalid_request(format!(
                    "消息必须是 JSON 对象，实际为: {}",
                    other
                )))
            }
        };

        if is_legacy_envelope(&object) {
            let procedure = match object.remove(LEGACY_PROCEDURE_KEY) {
                Some(Value::String(name)) => name,
                _ => return Err(RpcError::invalid_request("旧版消息缺少过程名")),
            };
            let arguments = match object.remove(LEGACY_ARGUMENTS_KEY) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(arguments)) => arguments,
                Some(other) => {
                    return Err(RpcError::invalid_request(format!(
                        "过程 \"{}\" 的参数必须是数组，实际为: {}",
                        procedure, other
                    )))
                }
            };
            return Ok(Self::new(procedure, arguments));
        }

        if object.len() != 1 {
            return Err(RpcError::invalid_request(format!(
                "消息必须只有一个键，实际有 {} 个",
                object.len()
            )));
        }

        let Some((procedure, arguments)) = object.into_iter().next() else {
            return Err(RpcError::invalid_request("消息缺少过程名"));
        };

        match arguments {
            Value::Array(arguments) => Ok(Self::new(procedure, arguments)),
            other => Err(RpcError::invalid_request(format!(
                "过程 \"{}\" 的参数必须是数组，实际为: {}",
                procedure, other
            ))),
        }
    }
}

impl Serialize for RpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.procedure, &self.arguments)?;
        map.end()
    }
}

fn is_legacy_envelope(object: &serde_json::Map<String, Value>) -> bool {
    matches!(object.get(LEGACY_PROCEDURE_KEY), Some(Value::String(_)))
        && object
            .keys()
            .all(|key| key == LEGACY_PROCEDURE_KEY || key == LEGACY_ARGUMENTS_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws_rpc::RpcErrorCode;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let msg = RpcMessage::new("foo", vec![json!(1), json!("a")]);
        assert_eq!(msg.to_json().unwrap(), r#"{"foo":[1,"a"]}"#);

        let parsed: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, json!({"foo": [1, "a"]}));
    }

    #[test]
    fn test_without_arguments() {
        let msg = RpcMessage::without_arguments("clientIsReadyNow");
        assert_eq!(msg.to_json().unwrap(), r#"{"clientIsReadyNow":[]}"#);
    }

    #[test]
    fn test_parse_nested_values() {
        let msg = RpcMessage::from_json(r#"{"showThemApples":[{"name":"apples"},[1,2],null,true]}"#)
            .unwrap();
        assert_eq!(msg.procedure, "showThemApples");
        assert_eq!(
            msg.arguments,
            vec![json!({"name": "apples"}), json!([1, 2]), Value::Null, json!(true)]
        );
    }

    #[test]
    fn test_parse_legacy_envelope() {
        let msg = RpcMessage::from_json(r#"{"pro":"setClientName","par":["abc"]}"#).unwrap();
        assert_eq!(msg.procedure, "setClientName");
        assert_eq!(msg.arguments, vec![json!("abc")]);

        let msg = RpcMessage::from_json(r#"{"pro":"clientIsReadyNow"}"#).unwrap();
        assert!(msg.arguments.is_empty());
    }

    #[test]
    fn test_procedure_named_pro_is_not_legacy() {
        let msg = RpcMessage::from_json(r#"{"pro":[1]}"#).unwrap();
        assert_eq!(msg.procedure, "pro");
        assert_eq!(msg.arguments, vec![json!(1)]);
    }

    #[test]
    fn test_reject_malformed() {
        let cases = [
            r#"[1,2]"#,
            r#"{}"#,
            r#"{"a":[],"b":[]}"#,
            r#"{"a":"not an array"}"#,
            r#"{"pro":"x","par":"y"}"#,
        ];
        for case in cases {
            let err = RpcMessage::from_json(case).unwrap_err();
            assert_eq!(err.code, RpcErrorCode::InvalidRequest, "case: {}", case);
        }

        let err = RpcMessage::from_json("{not json").unwrap_err();
        assert_eq!(err.code, RpcErrorCode::SerializationError);
    }

    #[test]
    fn test_from_serializable() {
        let msg = RpcMessage::from_serializable("setClientName", &("old", "new")).unwrap();
        assert_eq!(msg.to_json().unwrap(), r#"{"setClientName":["old","new"]}"#);

        let err = RpcMessage::from_serializable("x", &json!({"a": 1})).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::InvalidParams);
    }
}
