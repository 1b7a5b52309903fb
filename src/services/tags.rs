// 标签注册
// 每个标签独立 upsert，单个失败不影响其它标签与题目入库

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::services::database::QuestionStore;

/// 一次注册的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRegistration {
    pub registered: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TagNormalizer;

impl TagNormalizer {
    /// 去重后逐个查找或创建
    pub fn register<'a, I>(store: &dyn QuestionStore, names: I) -> TagRegistration
    where
        I: IntoIterator<Item = &'a str>,
    {
        let distinct: BTreeSet<&str> = names
            .into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        let mut registration = TagRegistration::default();
        for name in distinct {
            match store.upsert_tag(name) {
                Ok(tag) => registration.registered.push(tag.name),
                Err(e) => {
                    log::warn!("Failed to register tag {:?}: {}", name, e);
                    registration.failed.push(name.to_string());
                }
            }
        }
        registration
    }
}
