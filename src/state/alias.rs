//! 别名注册表：逻辑输出句柄 -> 具体工件路径
//!
//! 注册时同时存原始键与归一化键；解析未注册的令牌时原样返回，
//! 由 validate_chain 决定未解析引用是否构成问题。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 归一化别名：去首尾空白、剥除花括号、去内部空白、转小写
pub fn normalize_alias(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// 每 run 一份；后写覆盖先写
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasRegistry {
    entries: HashMap<String, String>,
}

impl AliasRegistry {
    /// 注册别名；同时写入原始（trim 后）与归一化两个键
    pub fn register(&mut self, alias: &str, artifact_path: &str) {
        let trimmed = alias.trim();
        if trimmed.is_empty() {
            return;
        }
        self.entries
            .insert(trimmed.to_string(), artifact_path.to_string());
        self.entries
            .insert(normalize_alias(alias), artifact_path.to_string());
    }

    /// 解析令牌：先按原样查、再按归一化查；都未命中时原样返回
    pub fn resolve(&self, token: &str) -> String {
        if let Some(path) = self.entries.get(token.trim()) {
            return path.clone();
        }
        if let Some(path) = self.entries.get(&normalize_alias(token)) {
            return path.clone();
        }
        token.to_string()
    }

    /// 别名是否已注册
    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token.trim())
            || self.entries.contains_key(&normalize_alias(token))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_alias() {
        assert_eq!(normalize_alias("  {Merged Data} "), "mergeddata");
        assert_eq!(normalize_alias("m1"), "m1");
        assert_eq!(normalize_alias("{ M1 }"), "m1");
    }

    #[test]
    fn test_unregistered_returns_token_unchanged() {
        let registry = AliasRegistry::default();
        assert_eq!(registry.resolve("unknown.dat"), "unknown.dat");
    }

    #[test]
    fn test_resolve_registered_alias() {
        let mut registry = AliasRegistry::default();
        registry.register("m1", "/artifacts/merged.dat");
        assert_eq!(registry.resolve("m1"), "/artifacts/merged.dat");
        assert_eq!(registry.resolve(" {M1} "), "/artifacts/merged.dat");
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = AliasRegistry::default();
        registry.register("m1", "/artifacts/v1.dat");
        registry.register("m1", "/artifacts/v2.dat");
        assert_eq!(registry.resolve("m1"), "/artifacts/v2.dat");
    }

    #[test]
    fn test_empty_alias_ignored() {
        let mut registry = AliasRegistry::default();
        registry.register("   ", "/artifacts/x.dat");
        assert!(registry.is_empty());
    }
}
