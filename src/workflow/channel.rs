//! 删除传播通道
//!
//! 子图无法直接删除父图持有的消息，只能把待删除的消息 ID 写入本通道。
//! 通道随每次节点调用以 `&mut` 显式传递（不可 Clone，子图拿到的就是同一个实例），
//! 只有根图退出时凭 RootExit 才能取出并应用到 Ledger。

use std::collections::HashSet;

use crate::memory::MessageId;

/// 根图退出凭证：只有引擎的根帧能构造
#[derive(Debug)]
pub struct RootExit {
    _private: (),
}

impl RootExit {
    pub(in crate::workflow) fn new() -> Self {
        Self { _private: () }
    }
}

/// 有序集合：保留首次标记的顺序，重复 ID 合并；没有移除单个 ID 的接口
#[derive(Debug, Default)]
pub struct DeletionChannel {
    ids: Vec<MessageId>,
    seen: HashSet<MessageId>,
}

impl DeletionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记一个待删除 ID；已存在时返回 false
    pub fn mark(&mut self, id: impl Into<MessageId>) -> bool {
        let id = id.into();
        if self.seen.contains(&id) {
            return false;
        }
        self.seen.insert(id.clone());
        self.ids.push(id);
        true
    }

    pub fn extend<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<MessageId>,
    {
        for id in ids {
            self.mark(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn ids(&self) -> &[MessageId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 根图退出时取出全部 ID
    pub fn into_ids(self, _exit: &RootExit) -> Vec<MessageId> {
        self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse_preserving_order() {
        let mut channel = DeletionChannel::new();
        assert!(channel.mark("b"));
        assert!(channel.mark("a"));
        assert!(!channel.mark("b"));
        channel.extend(["c", "a"]);
        assert_eq!(channel.ids(), ["b", "a", "c"]);
        assert_eq!(channel.len(), 3);
        assert!(channel.contains("c"));
    }

    #[test]
    fn test_into_ids_requires_root_exit() {
        let mut channel = DeletionChannel::new();
        channel.mark("m1");
        let exit = RootExit::new();
        assert_eq!(channel.into_ids(&exit), vec!["m1".to_string()]);
    }
}
