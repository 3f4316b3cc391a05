//! 命名转换策略
//!
//! 组件键与类型名、源文件路径之间的转换通过 `Inflector` 完成，
//! 由应用配置注入，而不是修改某个全局状态。

use std::collections::BTreeSet;

pub trait Inflector: Send + Sync {
    /// `user_repo` -> `UserRepo`
    fn camelize(&self, word: &str) -> String;

    /// `UserRepo` -> `user_repo`
    fn underscore(&self, word: &str) -> String;
}

/// 默认实现，支持首字母缩写词（如 `api` -> `API`）
#[derive(Debug, Clone, Default)]
pub struct DefaultInflector {
    acronyms: BTreeSet<String>,
}

impl DefaultInflector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acronyms<I, S>(acronyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acronyms: acronyms.into_iter().map(|a| a.into().to_uppercase()).collect(),
        }
    }
}

impl Inflector for DefaultInflector {
    fn camelize(&self, word: &str) -> String {
        word.split(['_', '-'])
            .filter(|part| !part.is_empty())
            .map(|part| {
                let upper = part.to_uppercase();
                if self.acronyms.contains(&upper) {
                    return upper;
                }
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect()
    }

    fn underscore(&self, word: &str) -> String {
        let chars: Vec<char> = word.chars().collect();
        let mut out = String::with_capacity(word.len() + 4);
        for (i, &c) in chars.iter().enumerate() {
            if c == '-' || c == ' ' {
                out.push('_');
                continue;
            }
            if c.is_uppercase() {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                let boundary = match prev {
                    Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                    // `APIClient` -> `api_client`
                    Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                    _ => false,
                };
                if boundary && !out.ends_with('_') {
                    out.push('_');
                }
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}
