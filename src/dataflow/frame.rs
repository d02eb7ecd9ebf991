/// フレーム
///
/// 1つのプログラム点におけるローカル変数とオペランドスタックのスナップショット。
/// スロットは[0, locals)がローカル、それ以降がスタック（下から順）で、
/// 統一インデックスで参照できる。

use super::reg::RegId;
use super::sub::SubId;
use std::fmt;
use thiserror::Error;

/// 1スロット分の値。wideはlong/doubleの論理1スロット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    pub reg: Option<RegId>,
    pub wide: bool,
}

impl Slot {
    pub fn new(reg: RegId, wide: bool) -> Self {
        Self { reg: Some(reg), wide }
    }

    /// スタック上の幅（ワード数）
    pub fn width(&self) -> usize {
        if self.wide {
            2
        } else {
            1
        }
    }
}

/// スタック操作の失敗
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackFault {
    #[error("operand stack underflow")]
    Underflow,
    #[error("single-width pop would split a wide value")]
    WideSplit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    slots: Vec<Slot>,
    locals: usize,
    /// 実行中のサブルーチン（JSRの入れ子）
    subs: Vec<SubId>,
    /// 活性ビット集合（統一インデックス）
    alive: Vec<u64>,
}

impl Frame {
    pub fn new(locals: usize) -> Self {
        Self {
            slots: vec![Slot::default(); locals],
            locals,
            subs: Vec::new(),
            alive: Vec::new(),
        }
    }

    pub fn locals_len(&self) -> usize {
        self.locals
    }

    pub fn stack_len(&self) -> usize {
        self.slots.len() - self.locals
    }

    /// ローカルとスタックを合わせたスロット数
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// スタックのワード幅（wide値は2）
    pub fn width(&self) -> usize {
        self.slots[self.locals..].iter().map(Slot::width).sum()
    }

    pub fn get(&self, index: usize) -> Option<RegId> {
        self.slots.get(index).and_then(|s| s.reg)
    }

    pub fn slot(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }

    pub fn set(&mut self, index: usize, reg: Option<RegId>) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.reg = reg;
        }
    }

    pub fn set_slot(&mut self, index: usize, slot: Slot) {
        if let Some(s) = self.slots.get_mut(index) {
            *s = slot;
        }
    }

    pub fn local(&self, index: usize) -> Option<RegId> {
        if index < self.locals {
            self.get(index)
        } else {
            None
        }
    }

    /// ローカルに値を書き込む。wide値は次のインデックスも占有し、
    /// 直前のwide値の後半を上書きした場合はそれを無効化する
    pub fn set_local(&mut self, index: usize, reg: Option<RegId>, wide: bool) {
        if index >= self.locals {
            return;
        }
        self.slots[index] = Slot { reg, wide };
        if wide && index + 1 < self.locals {
            self.slots[index + 1] = Slot::default();
        }
        if index > 0 && self.slots[index - 1].wide {
            self.slots[index - 1] = Slot::default();
        }
    }

    /// スタック深さdepth（0が底）の統一インデックス
    pub fn stack_index(&self, depth: usize) -> usize {
        self.locals + depth
    }

    pub fn stack(&self) -> &[Slot] {
        &self.slots[self.locals..]
    }

    pub fn push(&mut self, reg: RegId, wide: bool) {
        self.slots.push(Slot::new(reg, wide));
    }

    pub fn push_slot(&mut self, slot: Slot) {
        self.slots.push(slot);
    }

    /// 幅を問わずトップを取り出す
    pub fn pop(&mut self) -> Result<Slot, StackFault> {
        if self.stack_len() == 0 {
            return Err(StackFault::Underflow);
        }
        self.slots.pop().ok_or(StackFault::Underflow)
    }

    /// 単一幅の値を取り出す。トップがwide値ならエラー
    pub fn pop_narrow(&mut self) -> Result<Slot, StackFault> {
        match self.peek(0) {
            None => Err(StackFault::Underflow),
            Some(slot) if slot.wide => Err(StackFault::WideSplit),
            Some(_) => self.pop(),
        }
    }

    /// トップからdepth番目（0がトップ）
    pub fn peek(&self, depth: usize) -> Option<Slot> {
        let len = self.stack_len();
        if depth >= len {
            return None;
        }
        self.slot(self.locals + len - 1 - depth)
    }

    pub fn clear_stack(&mut self) {
        self.slots.truncate(self.locals);
    }

    pub fn subs(&self) -> &[SubId] {
        &self.subs
    }

    pub fn push_sub(&mut self, sub: SubId) {
        self.subs.push(sub);
    }

    pub fn set_subs(&mut self, subs: Vec<SubId>) {
        self.subs = subs;
    }

    pub fn in_sub(&self, sub: SubId) -> bool {
        self.subs.contains(&sub)
    }

    /// 例外ハンドラ入口用のフレーム（ローカルはそのまま、スタックは例外のみ）
    pub fn handler_frame(&self, exception: RegId) -> Frame {
        let mut frame = Frame {
            slots: self.slots[..self.locals].to_vec(),
            locals: self.locals,
            subs: self.subs.clone(),
            alive: Vec::new(),
        };
        frame.push(exception, false);
        frame
    }

    /// oldを保持するすべてのスロットをnewに置き換える。置き換えた数を返す
    pub fn replace(&mut self, old: RegId, new: Option<RegId>) -> usize {
        let mut count = 0;
        for slot in self.slots.iter_mut().filter(|s| s.reg == Some(old)) {
            slot.reg = new;
            count += 1;
        }
        count
    }

    pub fn regs(&self) -> impl Iterator<Item = (usize, RegId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.reg.map(|r| (i, r)))
    }

    pub fn is_alive(&self, index: usize) -> bool {
        self.alive
            .get(index / 64)
            .map(|w| w & (1 << (index % 64)) != 0)
            .unwrap_or(false)
    }

    /// 活性ビットを立てる。新たに立った場合true
    pub fn mark_alive(&mut self, index: usize) -> bool {
        let word = index / 64;
        if self.alive.len() <= word {
            self.alive.resize(word + 1, 0);
        }
        let bit = 1u64 << (index % 64);
        let fresh = self.alive[word] & bit == 0;
        self.alive[word] |= bit;
        fresh
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_slot = |i: usize, s: &Slot| -> String {
            let mark = if self.is_alive(i) { "*" } else { "" };
            match s.reg {
                Some(r) => format!("{}{}", r, mark),
                None => "-".to_string(),
            }
        };
        let locals: Vec<String> = self.slots[..self.locals]
            .iter()
            .enumerate()
            .map(|(i, s)| fmt_slot(i, s))
            .collect();
        let stack: Vec<String> = self.slots[self.locals..]
            .iter()
            .enumerate()
            .map(|(d, s)| fmt_slot(self.locals + d, s))
            .collect();
        write!(f, "[{} | {}]", locals.join(" "), stack.join(" "))?;
        if !self.subs.is_empty() {
            write!(f, " subs={:?}", self.subs.iter().map(|s| s.0).collect::<Vec<_>>())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_discipline() {
        let mut frame = Frame::new(2);
        frame.push(RegId(0), false);
        frame.push(RegId(1), true);
        assert_eq!(frame.stack_len(), 2);
        assert_eq!(frame.width(), 3);
        assert_eq!(frame.pop_narrow(), Err(StackFault::WideSplit));
        assert_eq!(frame.pop().unwrap().reg, Some(RegId(1)));
        assert_eq!(frame.pop_narrow().unwrap().reg, Some(RegId(0)));
        assert_eq!(frame.pop(), Err(StackFault::Underflow));
    }

    #[test]
    fn test_wide_local_invalidates_neighbour() {
        let mut frame = Frame::new(4);
        frame.set_local(1, Some(RegId(7)), false);
        frame.set_local(0, Some(RegId(5)), true);
        assert_eq!(frame.local(1), None);
        frame.set_local(1, Some(RegId(8)), false);
        assert_eq!(frame.local(0), None);
    }

    #[test]
    fn test_handler_frame_and_replace() {
        let mut frame = Frame::new(2);
        frame.set_local(0, Some(RegId(1)), false);
        frame.set_local(1, Some(RegId(1)), false);
        frame.push(RegId(2), false);
        let handler = frame.handler_frame(RegId(9));
        assert_eq!(handler.stack_len(), 1);
        assert_eq!(handler.peek(0).unwrap().reg, Some(RegId(9)));
        assert_eq!(frame.replace(RegId(1), Some(RegId(3))), 2);
        assert_eq!(frame.local(1), Some(RegId(3)));
    }

    #[test]
    fn test_liveness_bits() {
        let mut frame = Frame::new(70);
        assert!(!frame.is_alive(65));
        assert!(frame.mark_alive(65));
        assert!(!frame.mark_alive(65));
        assert!(frame.is_alive(65));
        assert_eq!(frame.to_string().matches('-').count(), 70);
    }
}
