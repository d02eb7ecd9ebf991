/// サブルーチン（JSR/RET）の管理
///
/// finallyのコンパイル形式として使われる旧来のサブルーチン呼び出しを追跡する。
/// サブルーチンは入口pcで識別し、呼び出し元（JSR）と対応するRETを記録する。

use super::cfg::BlockId;
use serde::Serialize;
use std::collections::HashMap;

/// サブルーチンID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubId(pub u32);

/// JSRによる呼び出し
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JsrCall {
    /// JSRを含むブロック
    pub bb: BlockId,
    pub jsr_pc: usize,
    /// 戻り先（JSRの次の命令）
    pub follow_pc: usize,
}

/// サブルーチン本体のRET
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubRet {
    pub pc: usize,
    pub bb: BlockId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sub {
    pub id: SubId,
    pub entry_pc: usize,
    pub ret: Option<SubRet>,
    pub callers: Vec<JsrCall>,
}

/// サブルーチン表
#[derive(Debug, Clone, Default)]
pub struct SubTable {
    subs: Vec<Sub>,
    by_entry: HashMap<usize, SubId>,
}

impl SubTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入口pcのサブルーチンを取得、なければ作成。新規作成ならtrue
    pub fn get_or_create(&mut self, entry_pc: usize) -> (SubId, bool) {
        if let Some(&id) = self.by_entry.get(&entry_pc) {
            return (id, false);
        }
        let id = SubId(self.subs.len() as u32);
        self.subs.push(Sub {
            id,
            entry_pc,
            ret: None,
            callers: Vec::new(),
        });
        self.by_entry.insert(entry_pc, id);
        (id, true)
    }

    pub fn get(&self, id: SubId) -> &Sub {
        &self.subs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SubId) -> &mut Sub {
        &mut self.subs[id.0 as usize]
    }

    pub fn by_entry(&self, entry_pc: usize) -> Option<&Sub> {
        self.by_entry.get(&entry_pc).map(|&id| self.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sub> {
        self.subs.iter()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// ブロック分割後、from_pc以降の命令を参照する記録を新ブロックへ付け替える
    pub fn retarget(&mut self, old: BlockId, new: BlockId, from_pc: usize) {
        for sub in &mut self.subs {
            for call in sub.callers.iter_mut().filter(|c| c.bb == old && c.jsr_pc >= from_pc) {
                call.bb = new;
            }
            if let Some(ret) = sub.ret.as_mut().filter(|r| r.bb == old && r.pc >= from_pc) {
                ret.bb = new;
            }
        }
    }
}
