use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use utoipa::ToSchema;

static ACTIVE: Lazy<RwLock<String>> = Lazy::new(|| RwLock::new("en".to_string()));

static CATALOGS: Lazy<HashMap<&'static str, HashMap<&'static str, &'static str>>> =
    Lazy::new(|| {
        let mut catalogs = HashMap::new();

        let mut en = HashMap::new();
        en.insert("chat.interrupted", "[generation interrupted]");
        en.insert("error.not_found", "not found");
        en.insert("error.invalid_request", "invalid request");
        en.insert("error.conflict", "conflict");
        en.insert("error.upstream_failure", "model endpoint failed");
        en.insert("error.upstream_timeout", "model endpoint timed out");
        en.insert("error.canceled", "generation stopped");
        en.insert("error.storage_failure", "storage failure");
        en.insert("error.internal", "internal server error");
        en.insert("manager.conflicting_install", "an existing runtime installation was found; the managed copy will be used");
        catalogs.insert("en", en);

        let mut zh = HashMap::new();
        zh.insert("chat.interrupted", "[生成已中断]");
        zh.insert("error.not_found", "未找到");
        zh.insert("error.invalid_request", "请求无效");
        zh.insert("error.conflict", "资源冲突");
        zh.insert("error.upstream_failure", "模型服务请求失败");
        zh.insert("error.upstream_timeout", "模型服务请求超时");
        zh.insert("error.canceled", "生成已停止");
        zh.insert("error.storage_failure", "存储失败");
        zh.insert("error.internal", "服务器内部错误");
        zh.insert("manager.conflicting_install", "检测到已安装的模型运行时，将使用托管副本");
        catalogs.insert("zh", zh);

        catalogs
    });

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LanguageInfo {
    pub code: String,
    pub title: String,
}

pub fn languages() -> Vec<LanguageInfo> {
    vec![
        LanguageInfo {
            code: "en".to_string(),
            title: "English".to_string(),
        },
        LanguageInfo {
            code: "zh".to_string(),
            title: "简体中文".to_string(),
        },
    ]
}

/// Switch the active catalog. Returns false for an unknown language code.
pub fn set_language(code: &str) -> bool {
    if !CATALOGS.contains_key(code) {
        return false;
    }
    *ACTIVE.write().expect("language lock poisoned") = code.to_string();
    true
}

pub fn language() -> String {
    ACTIVE.read().expect("language lock poisoned").clone()
}

/// Look up a phrase in the active catalog, falling back to English, then to
/// the key itself.
pub fn phrase(key: &str) -> String {
    let active = language();
    CATALOGS
        .get(active.as_str())
        .and_then(|c| c.get(key))
        .or_else(|| CATALOGS.get("en").and_then(|c| c.get(key)))
        .map(|s| s.to_string())
        .unwrap_or_else(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_fallback() {
        assert_eq!(phrase("no.such.key"), "no.such.key");
        assert!(!phrase("chat.interrupted").is_empty());
    }

    #[test]
    fn test_set_language_rejects_unknown() {
        assert!(!set_language("xx"));
        assert!(set_language("en"));
    }
}
