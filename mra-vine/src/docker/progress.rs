//! `docker pull` 输出的行级进度解析.
//!
//! docker 并没有为 pull 进度提供结构化协议, 这里按行做启发式解析:
//! 首个 `:` 之前恰好 12 个字符的 token 视为层 id, `:` 之后的状态串
//! 与固定的完成串逐字比较. 该启发式随 docker 版本演化可能失效,
//! 因此它只驱动进度显示, 不参与任何正确性判断.

use std::collections::BTreeMap;

/// 层 id 的固定长度 (短格式摘要).
const LAYER_ID_LEN: usize = 12;

/// 层完成状态串. `:` 之后按原样保留, 含前导空格.
const PULL_COMPLETE: &str = " Pull complete";

/// `docker pull` 的累积进度状态.
///
/// 逐行喂入输出即可; 无法解析的行会被原样忽略, 不产生错误.
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    layers: BTreeMap<String, String>,
}

impl PullProgress {
    /// 创建空状态.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一行输出, 返回当前进度.
    ///
    /// 行尾空白会被剥掉. 形如 `<12字符>: <状态>` 的行更新对应层的
    /// 状态, 其余行不改变状态. 尚未观察到任何层时返回 `None`.
    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim_end();
        if let Some((id, status)) = line.split_once(':') {
            if id.chars().count() == LAYER_ID_LEN {
                self.layers.insert(id.to_owned(), status.to_owned());
            }
        }
        self.ratio()
    }

    /// 当前进度: 已完成层数 / 已知层数. 尚未观察到任何层时为 `None`.
    pub fn ratio(&self) -> Option<f64> {
        if self.layers.is_empty() {
            return None;
        }
        Some(self.completed_len() as f64 / self.layers.len() as f64)
    }

    /// 已知层数.
    #[inline]
    pub fn layer_len(&self) -> usize {
        self.layers.len()
    }

    /// 已完成层数. 仅状态串与完成串完全一致的层计入.
    pub fn completed_len(&self) -> usize {
        self.layers
            .values()
            .filter(|status| status.as_str() == PULL_COMPLETE)
            .count()
    }
}
