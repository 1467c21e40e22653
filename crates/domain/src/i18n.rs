//! Localized user-facing error templates.
//!
//! Keyed by [`ErrorCode`] with locales `en`, `zh-TW`, `zh-CN`.  Missing
//! locales fall back to English; unknown codes fall back to the code string.

use crate::error::ErrorCode;

/// Look up the template for a code in the given locale.
pub fn template(code: ErrorCode, locale: &str) -> String {
    match lookup(code, locale).or_else(|| lookup(code, "en")) {
        Some(s) => s.to_owned(),
        None => code.to_string(),
    }
}

fn lookup(code: ErrorCode, locale: &str) -> Option<&'static str> {
    use ErrorCode::*;
    let (en, zh_tw, zh_cn) = match code {
        Unknown => (
            "An unknown error occurred",
            "發生未知錯誤",
            "发生未知错误",
        ),
        Internal => (
            "Internal server error",
            "內部伺服器錯誤",
            "内部服务器错误",
        ),
        Timeout => ("Operation timed out", "操作逾時", "操作超时"),
        Validation => ("Validation failed", "驗證失敗", "验证失败"),
        InvalidInput => ("Invalid input provided", "輸入無效", "输入无效"),
        MissingRequired => (
            "Required field is missing",
            "缺少必要欄位",
            "缺少必要字段",
        ),
        Unauthorized => (
            "Authentication required",
            "需要驗證身份",
            "需要验证身份",
        ),
        Forbidden => (
            "You don't have permission to perform this action",
            "您沒有權限執行此操作",
            "您没有权限执行此操作",
        ),
        ElevationRequired => (
            "Elevated privileges required. Use /elevated on",
            "需要提升權限。請使用 /elevated on",
            "需要提升权限。请使用 /elevated on",
        ),
        NotFound => ("Resource not found", "找不到資源", "找不到资源"),
        AlreadyExists => (
            "Resource already exists",
            "資源已存在",
            "资源已存在",
        ),
        TooManyRequests => (
            "Too many requests. Please slow down",
            "請求過於頻繁，請稍後再試",
            "请求过于频繁，请稍后再试",
        ),
        QuotaExceeded => ("Quota exceeded", "配額已用盡", "配额已用尽"),
        LlmError => ("AI model error", "AI 模型錯誤", "AI 模型错误"),
        PlatformError => (
            "Messaging platform error",
            "通訊平台錯誤",
            "通讯平台错误",
        ),
        NetworkError => ("Network error", "網路錯誤", "网络错误"),
        Unavailable => (
            "Service is temporarily unavailable",
            "服務暫時無法使用",
            "服务暂时无法使用",
        ),
        InvalidCommand => ("Invalid command", "無效的指令", "无效的指令"),
        CommandFailed => (
            "Command execution failed",
            "指令執行失敗",
            "指令执行失败",
        ),
    };

    match locale {
        "en" => Some(en),
        "zh-TW" => Some(zh_tw),
        "zh-CN" => Some(zh_cn),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_templates_present() {
        assert_eq!(
            template(ErrorCode::ElevationRequired, "en"),
            "Elevated privileges required. Use /elevated on"
        );
    }

    #[test]
    fn localized_lookup() {
        assert_eq!(template(ErrorCode::Timeout, "zh-TW"), "操作逾時");
        assert_eq!(template(ErrorCode::Timeout, "zh-CN"), "操作超时");
    }

    #[test]
    fn unknown_locale_falls_back_to_english() {
        assert_eq!(
            template(ErrorCode::NotFound, "fr"),
            template(ErrorCode::NotFound, "en")
        );
    }
}
