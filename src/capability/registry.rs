//! 能力注册表
//!
//! 进程级只读表：规范名 -> CapabilityEntry。所有查找先经过 normalize：
//! 精确匹配 -> 大小写不敏感 -> 大小写不敏感且 `-` 与 `_` 视为等价。未知名称原样返回，由调用方决定如何处理。
//! 内置哨兵能力 `llm_tool` 表示「不调用工具，直接由模型回答」，始终存在。

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::FlowError;

/// 直答哨兵能力名（Planner 给出空 tool_name 时替换为此值）
pub const DIRECT_ANSWER_TOOL: &str = "llm_tool";
/// 直答哨兵能力的所属执行器
pub const DIRECT_ANSWER_EXECUTOR: &str = "llm_tool_agent";

/// 单个能力（工具）的静态描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// 规范名
    pub name: String,
    /// 所属执行器名（分发时经 ExecutorRegistry 解析）
    pub executor: String,
    /// 备选工具，按声明顺序尝试
    #[serde(default)]
    pub alternatives: Vec<String>,
    /// 校验时是否额外要求对返回数据做自洽检查
    #[serde(default)]
    pub requires_self_check: bool,
    #[serde(default)]
    pub description: String,
    /// 是否需要文件输入
    #[serde(default)]
    pub needs_file_input: bool,
    /// 是否产出可供后续步骤使用的文件
    #[serde(default)]
    pub generates_file_output: bool,
    /// 参数填写提示（参数生成时拼入 prompt）
    #[serde(default)]
    pub args_hint: Option<String>,
}

impl CapabilityEntry {
    pub fn new(name: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor: executor.into(),
            alternatives: Vec::new(),
            requires_self_check: false,
            description: String::new(),
            needs_file_input: false,
            generates_file_output: false,
            args_hint: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives = alternatives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_self_check(mut self) -> Self {
        self.requires_self_check = true;
        self
    }

    pub fn with_file_io(mut self, needs_file_input: bool, generates_file_output: bool) -> Self {
        self.needs_file_input = needs_file_input;
        self.generates_file_output = generates_file_output;
        self
    }

    pub fn with_args_hint(mut self, hint: impl Into<String>) -> Self {
        self.args_hint = Some(hint.into());
        self
    }

    fn direct_answer() -> Self {
        Self::new(DIRECT_ANSWER_TOOL, DIRECT_ANSWER_EXECUTOR).with_description(
            "Answer directly with the language model when no tool fits or a step only needs text.",
        )
    }
}

/// Planner 看到的能力摘要
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
    pub needs_file_input: bool,
    pub generates_file_output: bool,
}

impl From<&CapabilityEntry> for CapabilitySummary {
    fn from(entry: &CapabilityEntry) -> Self {
        Self {
            name: entry.name.clone(),
            description: entry.description.clone(),
            needs_file_input: entry.needs_file_input,
            generates_file_output: entry.generates_file_output,
        }
    }
}

/// capabilities.toml 的文件结构：若干 [[capability]] 表
#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(default, rename = "capability")]
    capabilities: Vec<CapabilityEntry>,
}

/// 能力注册表：保持声明顺序，按规范名索引
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    entries: Vec<CapabilityEntry>,
    index: HashMap<String, usize>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
            index: HashMap::new(),
        };
        registry.upsert(CapabilityEntry::direct_answer());
        registry
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由条目列表构建；重名视为配置错误
    pub fn from_entries(entries: Vec<CapabilityEntry>) -> Result<Self, FlowError> {
        let mut registry = Self::default();
        let mut seen = std::collections::HashSet::new();
        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(FlowError::Config("capability with empty name".to_string()));
            }
            if !seen.insert(entry.name.clone()) {
                return Err(FlowError::Config(format!(
                    "duplicate capability '{}'",
                    entry.name
                )));
            }
            registry.upsert(entry);
        }
        registry.warn_dangling_alternatives();
        Ok(registry)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, FlowError> {
        let file: CapabilityFile =
            toml::from_str(content).map_err(|e| FlowError::Config(e.to_string()))?;
        Self::from_entries(file.capabilities)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    fn upsert(&mut self, entry: CapabilityEntry) {
        match self.index.get(&entry.name) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn warn_dangling_alternatives(&self) {
        for entry in &self.entries {
            for alt in &entry.alternatives {
                if self.get(alt).is_none() {
                    tracing::warn!(
                        capability = %entry.name,
                        alternative = %alt,
                        "alternative is not a registered capability"
                    );
                }
            }
        }
    }

    /// 名称归一化：精确 -> 大小写不敏感 -> 大小写不敏感且 `-`/`_` 等价；未知名称原样（去首尾空白）返回
    pub fn normalize(&self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() || self.index.contains_key(name) {
            return name.to_string();
        }
        let low = name.to_lowercase();
        if self.index.contains_key(&low) {
            return low;
        }
        if let Some(entry) = self.entries.iter().find(|e| e.name.to_lowercase() == low) {
            return entry.name.clone();
        }
        let unified = unify_separators(&low);
        self.entries
            .iter()
            .find(|e| unify_separators(&e.name.to_lowercase()) == unified)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityEntry> {
        let canonical = self.normalize(name);
        self.index.get(&canonical).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 某能力声明的备选工具（已归一化，保持声明顺序）
    pub fn alternatives(&self, name: &str) -> Vec<String> {
        self.get(name)
            .map(|e| e.alternatives.iter().map(|a| self.normalize(a)).collect())
            .unwrap_or_default()
    }

    /// 全部条目（含哨兵），声明顺序
    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    /// Planner 可见的能力列表（不含直答哨兵）
    pub fn capability_list(&self) -> Vec<CapabilitySummary> {
        self.entries
            .iter()
            .filter(|e| e.name != DIRECT_ANSWER_TOOL)
            .map(CapabilitySummary::from)
            .collect()
    }

    /// 在一段文本中出现过的已注册工具名（不含哨兵），用于从失败原因里提取可行的补救工具
    pub fn mentioned_in(&self, text: &str) -> Vec<String> {
        let unified = unify_separators(&text.to_lowercase());
        self.entries
            .iter()
            .filter(|e| e.name != DIRECT_ANSWER_TOOL)
            .filter(|e| contains_word(&unified, &unify_separators(&e.name.to_lowercase())))
            .map(|e| e.name.clone())
            .collect()
    }
}

fn unify_separators(s: &str) -> String {
    s.replace('-', "_")
}

/// 以标识符边界匹配，避免 `search` 命中 `web_search_v2` 之类的子串
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}
