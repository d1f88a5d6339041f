//! 工具名 / 参数一致性检查
//!
//! 工具名：期望工具是否都出现（缺失即失败，多余的只记录）；未给期望时，有调用即通过。
//! 参数：按工具配置 required_keys / key_values / key_contains / key_list_contains 规则，逐条收集错误。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单个工具的参数规则
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArgRules {
    /// 必须出现的参数键
    pub required_keys: Vec<String>,
    /// 参数值必须相等
    pub key_values: HashMap<String, Value>,
    /// 参数值（字符串化后）必须包含子串
    pub key_contains: HashMap<String, String>,
    /// 数组参数必须包含元素（非数组按单元素数组处理）
    pub key_list_contains: HashMap<String, Value>,
}

/// 一次实际调用（或计划中的调用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConformanceReport {
    pub passed: bool,
    pub reason: String,
    pub actual_tools: Vec<String>,
    pub expected_tools: Vec<String>,
    pub missing_tools: Vec<String>,
    pub extra_tools: Vec<String>,
    pub arg_errors: Vec<String>,
}

/// 只比对工具名
pub fn check_tool_names(actual: &[String], expected: &[String]) -> ConformanceReport {
    let mut report = ConformanceReport {
        actual_tools: actual.to_vec(),
        expected_tools: expected.to_vec(),
        ..Default::default()
    };

    if expected.is_empty() {
        report.passed = !actual.is_empty();
        report.reason = if report.passed {
            "no expected tools given, tool calls were produced".to_string()
        } else {
            "no tool calls were produced".to_string()
        };
        return report;
    }

    report.missing_tools = expected.iter().filter(|t| !actual.contains(t)).cloned().collect();
    report.extra_tools = actual.iter().filter(|t| !expected.contains(t)).cloned().collect();
    report.passed = report.missing_tools.is_empty();
    report.reason = if report.passed {
        "all expected tools were called".to_string()
    } else {
        format!("missing expected tool calls: {:?}", report.missing_tools)
    };
    report
}

/// 比对工具名与参数
pub fn check_tool_calls(
    actual: &[ToolCallRecord],
    expected_tools: &[String],
    expected_args: &HashMap<String, ArgRules>,
) -> ConformanceReport {
    let names: Vec<String> = actual.iter().map(|c| c.tool_name.clone()).collect();
    let mut report = check_tool_names(&names, expected_tools);
    if !expected_tools.is_empty() && !report.passed {
        return report;
    }
    if expected_args.is_empty() {
        report.passed = true;
        report.reason = "tool names conform, no argument rules given".to_string();
        return report;
    }

    for call in actual {
        let Some(rules) = expected_args.get(&call.tool_name) else {
            continue;
        };
        report.arg_errors.extend(check_args(&call.tool_name, &call.args, rules));
    }

    report.passed = report.arg_errors.is_empty();
    report.reason = match report.arg_errors.first() {
        Some(first) => format!("argument check failed: {first}"),
        None => "tool names and arguments conform".to_string(),
    };
    report
}

fn check_args(tool: &str, args: &Value, rules: &ArgRules) -> Vec<String> {
    let mut errors = Vec::new();
    for key in &rules.required_keys {
        if args.get(key.as_str()).is_none() {
            errors.push(format!("tool {tool} is missing required argument: {key}"));
        }
    }
    for (key, expected) in &rules.key_values {
        let actual = args.get(key.as_str()).cloned().unwrap_or(Value::Null);
        if &actual != expected {
            errors.push(format!(
                "tool {tool} argument {key} mismatch: expected={expected}, actual={actual}"
            ));
        }
    }
    for (key, substring) in &rules.key_contains {
        let actual = match args.get(key.as_str()) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if !actual.contains(substring.as_str()) {
            errors.push(format!(
                "tool {tool} argument {key} does not contain {substring:?}: actual={actual:?}"
            ));
        }
    }
    for (key, item) in &rules.key_list_contains {
        let found = match args.get(key.as_str()) {
            Some(Value::Array(items)) => items.contains(item),
            Some(single) => single == item,
            None => false,
        };
        if !found {
            errors.push(format!(
                "tool {tool} argument {key} does not contain element {item}"
            ));
        }
    }
    errors
}
