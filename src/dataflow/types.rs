/// 型ラティス
///
/// バイトコードのプリミティブ型は「byte/short/intのどれか」のように曖昧なまま
/// 現れるため、kindビット集合（多重型）として表現する。
/// 参照型はクラス名で表し、クラス階層は外部の `ClassHierarchy` に問い合わせる。
/// すべての型は解析ごとの `TypeStore` にインターンされ、`T` ハンドルで参照される。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::str::FromStr;
use std::sync::Arc;

pub const OBJECT: &str = "java.lang.Object";
pub const THROWABLE: &str = "java.lang.Throwable";
const ARRAY_INTERFACES: [&str; 2] = ["java.lang.Cloneable", "java.io.Serializable"];

/// プリミティブ種別のビット集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Kind(pub u16);

impl Kind {
    pub const NONE: Kind = Kind(0);
    pub const BOOLEAN: Kind = Kind(1 << 0);
    pub const CHAR: Kind = Kind(1 << 1);
    pub const BYTE: Kind = Kind(1 << 2);
    pub const SHORT: Kind = Kind(1 << 3);
    pub const INT: Kind = Kind(1 << 4);
    pub const FLOAT: Kind = Kind(1 << 5);
    pub const LONG: Kind = Kind(1 << 6);
    pub const DOUBLE: Kind = Kind(1 << 7);
    pub const REF: Kind = Kind(1 << 8);
    /// JSRが積む戻りアドレス（疑似型）
    pub const RET: Kind = Kind(1 << 9);

    /// boolean/char/byte/short/int（バイトコード上はすべてint扱い）
    pub const INT_FAMILY: Kind = Kind(0b1_1111);
    pub const WIDE: Kind = Kind(Self::LONG.0 | Self::DOUBLE.0);
    pub const ANY: Kind = Kind(0x3ff);

    /// 縮約テーブルの4ビットインデックスが対象とするビット（char/byte/short/int）
    const INDEX_MASK: u16 = 0b1_1110;

    const NAMES: [(Kind, &'static str); 10] = [
        (Kind::BOOLEAN, "boolean"),
        (Kind::CHAR, "char"),
        (Kind::BYTE, "byte"),
        (Kind::SHORT, "short"),
        (Kind::INT, "int"),
        (Kind::FLOAT, "float"),
        (Kind::LONG, "long"),
        (Kind::DOUBLE, "double"),
        (Kind::REF, "ref"),
        (Kind::RET, "ret"),
    ];

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// selfがotherのビットをすべて含むか
    pub fn contains(self, other: Kind) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Kind) -> bool {
        self.0 & other.0 != 0
    }

    /// long/doubleのみから成る（2ワードを占める）か
    pub fn is_wide(self) -> bool {
        !self.is_empty() && Kind::WIDE.contains(self)
    }

    /// 整数リテラルが取りうる種別の和集合
    pub fn for_int(value: i64) -> Kind {
        let mut kind = Kind::INT;
        if value == 0 || value == 1 {
            kind = kind | Kind::BOOLEAN;
        }
        if (0..=0xffff).contains(&value) {
            kind = kind | Kind::CHAR;
        }
        if (-128..=127).contains(&value) {
            kind = kind | Kind::BYTE;
        }
        if (-32768..=32767).contains(&value) {
            kind = kind | Kind::SHORT;
        }
        kind
    }

    fn index(self) -> usize {
        ((self.0 & Self::INDEX_MASK) >> 1) as usize
    }

    fn from_index(index: u8) -> Kind {
        Kind((index as u16) << 1)
    }

    pub fn name(self) -> String {
        let parts: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(k, _)| self.contains(*k))
            .map(|(_, n)| *n)
            .collect();
        if parts.len() == 1 {
            parts[0].to_string()
        } else {
            format!("{{{}}}", parts.join(","))
        }
    }

    fn from_name(name: &str) -> Option<Kind> {
        Self::NAMES.iter().find(|(_, n)| *n == name).map(|(k, _)| *k)
    }
}

impl BitAnd for Kind {
    type Output = Kind;
    fn bitand(self, rhs: Kind) -> Kind {
        Kind(self.0 & rhs.0)
    }
}

impl BitOr for Kind {
    type Output = Kind;
    fn bitor(self, rhs: Kind) -> Kind {
        Kind(self.0 | rhs.0)
    }
}

impl Not for Kind {
    type Output = Kind;
    fn not(self) -> Kind {
        Kind(!self.0 & Kind::ANY.0)
    }
}

// 4ビットインデックス上の暗黙の拡大変換: byte→short→int, char→int
const IDX_CHAR: u8 = 1;
const IDX_BYTE: u8 = 2;
const IDX_SHORT: u8 = 4;
const IDX_INT: u8 = 8;

const fn widen_targets(bits: u8) -> u8 {
    let mut out = 0;
    if bits & IDX_CHAR != 0 {
        out |= IDX_CHAR | IDX_INT;
    }
    if bits & IDX_BYTE != 0 {
        out |= IDX_BYTE | IDX_SHORT | IDX_INT;
    }
    if bits & IDX_SHORT != 0 {
        out |= IDX_SHORT | IDX_INT;
    }
    if bits & IDX_INT != 0 {
        out |= IDX_INT;
    }
    out
}

/// 他の要素から拡大変換で到達できる要素を取り除く
const fn minimal(bits: u8) -> u8 {
    let mut out = bits;
    let mut b = 1u8;
    while b <= IDX_INT {
        if bits & b != 0 {
            out &= !(widen_targets(b) & !b);
        }
        b <<= 1;
    }
    out
}

const fn build_intersect_table() -> [[u8; 15]; 15] {
    let mut table = [[0u8; 15]; 15];
    let mut i = 0;
    while i < 15 {
        let mut j = 0;
        while j < 15 {
            let a = (i + 1) as u8;
            let b = (j + 1) as u8;
            let and = a & b;
            table[i][j] = if and != 0 {
                and
            } else {
                minimal(widen_targets(a) & widen_targets(b))
            };
            j += 1;
        }
        i += 1;
    }
    table
}

const fn build_assign_table() -> [[u8; 15]; 15] {
    let mut table = [[0u8; 15]; 15];
    let mut i = 0;
    while i < 15 {
        let mut j = 0;
        while j < 15 {
            let value = (i + 1) as u8;
            let target = (j + 1) as u8;
            let and = value & target;
            table[i][j] = if and != 0 {
                and
            } else if widen_targets(value) & target != 0 {
                value
            } else {
                0
            };
            j += 1;
        }
        i += 1;
    }
    table
}

/// 合流時の縮約: 共通部分、なければ最小の共通拡大先
static INTERSECT_REDUCT: [[u8; 15]; 15] = build_intersect_table();
/// 代入時の縮約: 共通部分、なければ拡大変換可能なら元の集合
static ASSIGN_REDUCT: [[u8; 15]; 15] = build_assign_table();

/// プリミティブ同士の交差
pub fn kind_intersect(a: Kind, b: Kind) -> Option<Kind> {
    let (i, j) = (a.index(), b.index());
    let mut out = a & b;
    if i != 0 && j != 0 {
        out = Kind(out.0 & !Kind::INDEX_MASK) | Kind::from_index(INTERSECT_REDUCT[i - 1][j - 1]);
    }
    if !out.is_empty() {
        return Some(out);
    }
    if Kind::INT_FAMILY.contains(a) && Kind::INT_FAMILY.contains(b) {
        return Some(Kind::INT);
    }
    None
}

/// プリミティブの代入縮約
///
/// 戻り値はNone（代入不可）、value自身（そのまま代入可）、
/// valueとtargetの両方の部分集合（縮約）のいずれか
pub fn kind_assign(value: Kind, target: Kind) -> Option<Kind> {
    let and = value & target;
    if !and.is_empty() {
        return Some(and);
    }
    let (i, j) = (value.index(), target.index());
    if i != 0 && j != 0 && ASSIGN_REDUCT[i - 1][j - 1] != 0 {
        return Some(value);
    }
    None
}

/// デコーダから渡される型記述
///
/// 文字列形式: `int`, `{byte,short,int}`, `ref`, `java.lang.String`, `int[]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeSpec {
    Multi(Kind),
    Class(String),
}

impl TypeSpec {
    pub fn kind(kind: Kind) -> Self {
        TypeSpec::Multi(kind)
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeSpec::Class(name.into())
    }

    pub fn int() -> Self {
        TypeSpec::Multi(Kind::INT)
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, TypeSpec::Multi(k) if k.is_wide())
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Multi(kind) => write!(f, "{}", kind.name()),
            TypeSpec::Class(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for TypeSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty type".to_string());
        }
        if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let mut kind = Kind::NONE;
            for part in inner.split(',') {
                let part = part.trim();
                kind = kind | Kind::from_name(part).ok_or_else(|| format!("unknown kind: {}", part))?;
            }
            if kind.is_empty() {
                return Err("empty kind set".to_string());
            }
            return Ok(TypeSpec::Multi(kind));
        }
        match Kind::from_name(s) {
            Some(kind) => Ok(TypeSpec::Multi(kind)),
            None => Ok(TypeSpec::Class(s.to_string())),
        }
    }
}

impl TryFrom<String> for TypeSpec {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TypeSpec> for String {
    fn from(spec: TypeSpec) -> String {
        spec.to_string()
    }
}

/// クラス階層の問い合わせ口
///
/// 宣言型の解決は解析の外側の責務。未知のクラスはObject直下として扱われる。
pub trait ClassHierarchy: fmt::Debug + Send + Sync {
    /// 直接のスーパークラス（Objectや未知のクラスはNone）
    fn super_class(&self, name: &str) -> Option<String>;
    /// 直接実装するインタフェース
    fn interfaces(&self, name: &str) -> Vec<String>;
    fn is_interface(&self, name: &str) -> bool;
    fn is_known(&self, name: &str) -> bool;
}

/// クラス宣言（CLI入力やテスト用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub is_interface: bool,
}

/// HashMapベースの単純なクラス階層
#[derive(Debug, Clone, Default)]
pub struct MapHierarchy {
    classes: HashMap<String, ClassDecl>,
}

impl MapHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_decls(decls: impl IntoIterator<Item = ClassDecl>) -> Self {
        let mut hierarchy = Self::new();
        for decl in decls {
            hierarchy.add(decl);
        }
        hierarchy
    }

    pub fn add(&mut self, decl: ClassDecl) {
        self.classes.insert(decl.name.clone(), decl);
    }

    /// クラスを追加（テスト用の簡易版）
    pub fn class(mut self, name: &str, super_name: &str, interfaces: &[&str]) -> Self {
        self.add(ClassDecl {
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            is_interface: false,
        });
        self
    }

    pub fn interface(mut self, name: &str, supers: &[&str]) -> Self {
        self.add(ClassDecl {
            name: name.to_string(),
            super_name: None,
            interfaces: supers.iter().map(|s| s.to_string()).collect(),
            is_interface: true,
        });
        self
    }
}

impl ClassHierarchy for MapHierarchy {
    fn super_class(&self, name: &str) -> Option<String> {
        self.classes.get(name).and_then(|c| c.super_name.clone())
    }

    fn interfaces(&self, name: &str) -> Vec<String> {
        self.classes
            .get(name)
            .map(|c| c.interfaces.clone())
            .unwrap_or_default()
    }

    fn is_interface(&self, name: &str) -> bool {
        self.classes.get(name).map(|c| c.is_interface).unwrap_or(false)
    }

    fn is_known(&self, name: &str) -> bool {
        name == OBJECT || self.classes.contains_key(name)
    }
}

/// インターンされた型のハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct T(u32);

#[derive(Debug, Clone)]
enum TypeData {
    Multi(Kind),
    Class(String),
}

/// 型のインターン表
///
/// 解析コンテキストが所有する。kindビット集合または参照型名をキーに
/// 型を一意化し、共通祖先探索と交差の結果をメモ化する。
pub struct TypeStore {
    types: Vec<TypeData>,
    names: Vec<String>,
    by_kind: HashMap<Kind, T>,
    by_name: HashMap<String, T>,
    hierarchy: Arc<dyn ClassHierarchy>,
    /// 型 → (祖先, BFS深さ)。自身を深さ0で含む
    ancestors: HashMap<T, Arc<[(T, u32)]>>,
    intersections: HashMap<(T, T), Option<T>>,
}

impl fmt::Debug for TypeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeStore")
            .field("types", &self.names)
            .finish()
    }
}

impl TypeStore {
    pub fn new(hierarchy: Arc<dyn ClassHierarchy>) -> Self {
        Self {
            types: Vec::new(),
            names: Vec::new(),
            by_kind: HashMap::new(),
            by_name: HashMap::new(),
            hierarchy,
            ancestors: HashMap::new(),
            intersections: HashMap::new(),
        }
    }

    /// 階層情報なしのストア（テスト用）
    pub fn standalone() -> Self {
        Self::new(Arc::new(MapHierarchy::new()))
    }

    pub fn kind(&mut self, kind: Kind) -> T {
        if let Some(&t) = self.by_kind.get(&kind) {
            return t;
        }
        let t = self.push(TypeData::Multi(kind), kind.name());
        self.by_kind.insert(kind, t);
        t
    }

    pub fn class(&mut self, name: &str) -> T {
        if let Some(&t) = self.by_name.get(name) {
            return t;
        }
        let t = self.push(TypeData::Class(name.to_string()), name.to_string());
        self.by_name.insert(name.to_string(), t);
        t
    }

    pub fn int(&mut self) -> T {
        self.kind(Kind::INT)
    }

    pub fn object(&mut self) -> T {
        self.class(OBJECT)
    }

    fn push(&mut self, data: TypeData, name: String) -> T {
        let t = T(self.types.len() as u32);
        self.types.push(data);
        self.names.push(name);
        t
    }

    pub fn intern(&mut self, spec: &TypeSpec) -> T {
        match spec {
            TypeSpec::Multi(kind) => self.kind(*kind),
            TypeSpec::Class(name) => self.class(name),
        }
    }

    pub fn spec(&self, t: T) -> TypeSpec {
        match &self.types[t.0 as usize] {
            TypeData::Multi(kind) => TypeSpec::Multi(*kind),
            TypeData::Class(name) => TypeSpec::Class(name.clone()),
        }
    }

    /// 正規名（等価性は正規名で決まる）
    pub fn name(&self, t: T) -> &str {
        &self.names[t.0 as usize]
    }

    /// 参照型はREFとして返す
    pub fn kinds(&self, t: T) -> Kind {
        match &self.types[t.0 as usize] {
            TypeData::Multi(kind) => *kind,
            TypeData::Class(_) => Kind::REF,
        }
    }

    pub fn is_wide(&self, t: T) -> bool {
        self.kinds(t).is_wide()
    }

    pub fn is_class(&self, t: T) -> bool {
        matches!(self.types[t.0 as usize], TypeData::Class(_))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// 要素型tの配列型。曖昧な多重型の配列は名前が付かないのでREFになる
    pub fn array_of(&mut self, t: T) -> T {
        match self.types[t.0 as usize].clone() {
            TypeData::Class(name) => {
                let name = format!("{}[]", name);
                self.class(&name)
            }
            TypeData::Multi(kind)
                if Kind::NAMES.iter().any(|(k, _)| *k == kind) && !kind.intersects(Kind::REF | Kind::RET) =>
            {
                let name = format!("{}[]", kind.name());
                self.class(&name)
            }
            TypeData::Multi(_) => self.kind(Kind::REF),
        }
    }

    pub fn element_of(&mut self, t: T) -> Option<T> {
        let name = match &self.types[t.0 as usize] {
            TypeData::Class(name) => name.strip_suffix("[]")?.to_string(),
            TypeData::Multi(_) => return None,
        };
        let spec: TypeSpec = name.parse().ok()?;
        Some(self.intern(&spec))
    }

    /// 祖先一覧（スーパークラスとインタフェースの閉包をBFSで列挙）
    ///
    /// 未知または循環した祖先はObjectとして扱う
    fn ancestors(&mut self, t: T) -> Arc<[(T, u32)]> {
        if let Some(list) = self.ancestors.get(&t) {
            return list.clone();
        }
        let start = self.name(t).to_string();
        let mut seen: HashSet<String> = HashSet::new();
        let mut order: Vec<(String, u32)> = Vec::new();
        let mut queue: VecDeque<(String, u32)> = VecDeque::new();
        seen.insert(start.clone());
        queue.push_back((start, 0));

        while let Some((name, depth)) = queue.pop_front() {
            order.push((name.clone(), depth));
            if name == OBJECT {
                continue;
            }
            let mut parents = Vec::new();
            if name.ends_with("[]") {
                parents.push(OBJECT.to_string());
                parents.extend(ARRAY_INTERFACES.iter().map(|s| s.to_string()));
            } else {
                match self.hierarchy.super_class(&name) {
                    Some(sup) => parents.push(sup),
                    None => parents.push(OBJECT.to_string()),
                }
                parents.extend(self.hierarchy.interfaces(&name));
            }
            for parent in parents {
                if seen.insert(parent.clone()) {
                    queue.push_back((parent, depth + 1));
                }
            }
        }

        let list: Arc<[(T, u32)]> = order
            .into_iter()
            .map(|(name, depth)| (self.class(&name), depth))
            .collect::<Vec<_>>()
            .into();
        self.ancestors.insert(t, list.clone());
        list
    }

    /// ancがtの祖先（またはt自身）か
    pub fn is_ancestor(&mut self, anc: T, t: T) -> bool {
        self.ancestors(t).iter().any(|(a, _)| *a == anc)
    }

    fn is_interface(&self, t: T) -> bool {
        let name = self.name(t);
        ARRAY_INTERFACES.contains(&name) || self.hierarchy.is_interface(name)
    }

    fn common_super(&mut self, a: T, b: T) -> T {
        if let (Some(ea), Some(eb)) = (self.element_of(a), self.element_of(b)) {
            if self.is_class(ea) && self.is_class(eb) {
                let e = self.common_super(ea, eb);
                return self.array_of(e);
            }
        }
        let aa = self.ancestors(a);
        let ba = self.ancestors(b);
        let depths: HashMap<T, u32> = ba.iter().copied().collect();
        let best = aa
            .iter()
            .filter_map(|&(t, da)| {
                depths.get(&t).map(|&db| {
                    (da.max(db), da + db, self.is_interface(t), self.name(t).to_string(), t)
                })
            })
            .min();
        match best {
            Some((.., t)) => t,
            None => self.object(),
        }
    }

    /// 交差: 両方の値を受け入れられる型。共通型がなければNone
    pub fn intersect(&mut self, a: T, b: T) -> Option<T> {
        if a == b {
            return Some(a);
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&cached) = self.intersections.get(&key) {
            return cached;
        }
        let result = match (self.types[a.0 as usize].clone(), self.types[b.0 as usize].clone()) {
            (TypeData::Multi(x), TypeData::Multi(y)) => kind_intersect(x, y).map(|k| self.kind(k)),
            (TypeData::Multi(x), TypeData::Class(_)) => x.intersects(Kind::REF).then_some(b),
            (TypeData::Class(_), TypeData::Multi(y)) => y.intersects(Kind::REF).then_some(a),
            (TypeData::Class(_), TypeData::Class(_)) => Some(self.common_super(a, b)),
        };
        self.intersections.insert(key, result);
        result
    }

    /// 和: どちらかの値でありうる型
    ///
    /// 参照型同士は一方が他方の部分型ならより具体的な方、
    /// 無関係なら不明参照（`ref`）を返す
    pub fn union(&mut self, a: T, b: T) -> T {
        if a == b {
            return a;
        }
        match (self.types[a.0 as usize].clone(), self.types[b.0 as usize].clone()) {
            (TypeData::Multi(x), TypeData::Multi(y)) => self.kind(x | y),
            (TypeData::Multi(x), TypeData::Class(_)) | (TypeData::Class(_), TypeData::Multi(x)) => {
                self.kind(x | Kind::REF)
            }
            (TypeData::Class(_), TypeData::Class(_)) => {
                if self.is_ancestor(b, a) {
                    a
                } else if self.is_ancestor(a, b) {
                    b
                } else {
                    self.kind(Kind::REF)
                }
            }
        }
    }

    /// 代入縮約: Noneなら代入不可、tそのもの、またはより具体的な型
    pub fn assign_to(&mut self, t: T, target: T) -> Option<T> {
        if t == target {
            return Some(t);
        }
        match (self.types[t.0 as usize].clone(), self.types[target.0 as usize].clone()) {
            (TypeData::Multi(v), TypeData::Multi(g)) => {
                let reduced = kind_assign(v, g)?;
                Some(if reduced == v { t } else { self.kind(reduced) })
            }
            (TypeData::Multi(v), TypeData::Class(_)) => v.intersects(Kind::REF).then_some(target),
            (TypeData::Class(_), TypeData::Multi(g)) => g.intersects(Kind::REF).then_some(t),
            (TypeData::Class(value), TypeData::Class(goal)) => {
                if self.is_ancestor(target, t) {
                    Some(t)
                } else if self.is_ancestor(t, target) {
                    Some(target)
                } else if self.hierarchy.is_interface(&goal)
                    || !self.hierarchy.is_known(&value)
                    || !self.hierarchy.is_known(&goal)
                {
                    // 検証器同様、インタフェースと未知のクラスは寛容に扱う
                    Some(t)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hierarchy() -> Arc<MapHierarchy> {
        Arc::new(
            MapHierarchy::new()
                .interface("java.lang.Comparable", &[])
                .class("java.lang.Number", OBJECT, &["java.io.Serializable"])
                .class("java.lang.Integer", "java.lang.Number", &["java.lang.Comparable"])
                .class("java.lang.Long", "java.lang.Number", &["java.lang.Comparable"])
                .class("java.lang.Throwable", OBJECT, &[])
                .class("java.lang.Exception", "java.lang.Throwable", &[])
                .class("java.lang.RuntimeException", "java.lang.Exception", &[])
                .class("java.lang.ArithmeticException", "java.lang.RuntimeException", &[]),
        )
    }

    #[test]
    fn test_int_literal_kinds() {
        assert_eq!(Kind::for_int(1).name(), "{boolean,char,byte,short,int}");
        assert_eq!(Kind::for_int(-5).name(), "{byte,short,int}");
        assert_eq!(Kind::for_int(1000).name(), "{char,short,int}");
        assert_eq!(Kind::for_int(100_000), Kind::INT);
    }

    #[test]
    fn test_intersect_narrowing() {
        let mut store = TypeStore::standalone();
        let bsi = store.kind(Kind::BYTE | Kind::SHORT | Kind::INT);
        let int = store.int();
        assert_eq!(store.intersect(bsi, int), Some(int));
        assert_eq!(store.intersect(bsi, bsi), Some(bsi));
    }

    #[test]
    fn test_intersect_common_widening() {
        let mut store = TypeStore::standalone();
        let byte = store.kind(Kind::BYTE);
        let short = store.kind(Kind::SHORT);
        let ch = store.kind(Kind::CHAR);
        assert_eq!(store.intersect(byte, short), Some(short));
        let int = store.int();
        assert_eq!(store.intersect(ch, byte), Some(int));
    }

    #[test]
    fn test_intersect_int_family_fallback() {
        let mut store = TypeStore::standalone();
        let boolean = store.kind(Kind::BOOLEAN);
        let int = store.int();
        let float = store.kind(Kind::FLOAT);
        assert_eq!(store.intersect(boolean, int), Some(int));
        assert_eq!(store.intersect(float, int), None);
    }

    #[test]
    fn test_assign_to_outcomes() {
        let mut store = TypeStore::standalone();
        let bsi = store.kind(Kind::BYTE | Kind::SHORT | Kind::INT);
        let int = store.int();
        let byte = store.kind(Kind::BYTE);
        let float = store.kind(Kind::FLOAT);
        assert_eq!(store.assign_to(bsi, int), Some(int));
        assert_eq!(store.assign_to(byte, int), Some(byte));
        assert_eq!(store.assign_to(int, float), None);
    }

    #[test]
    fn test_reference_common_super() {
        let mut store = TypeStore::new(hierarchy());
        let integer = store.class("java.lang.Integer");
        let long = store.class("java.lang.Long");
        let number = store.class("java.lang.Number");
        assert_eq!(store.intersect(integer, long), Some(number));
        assert_eq!(store.intersect(long, integer), Some(number));

        let arith = store.class("java.lang.ArithmeticException");
        let exc = store.class("java.lang.Exception");
        assert_eq!(store.intersect(arith, exc), Some(exc));
    }

    #[test]
    fn test_unknown_class_falls_back_to_object() {
        let mut store = TypeStore::new(hierarchy());
        let a = store.class("com.example.A");
        let b = store.class("com.example.B");
        let object = store.object();
        assert_eq!(store.intersect(a, b), Some(object));
    }

    #[test]
    fn test_reference_arrays() {
        let mut store = TypeStore::new(hierarchy());
        let ints = store.class("java.lang.Integer[]");
        let longs = store.class("java.lang.Long[]");
        let numbers = store.class("java.lang.Number[]");
        assert_eq!(store.intersect(ints, longs), Some(numbers));

        let prim = store.class("int[]");
        let object = store.object();
        assert_eq!(store.intersect(prim, ints), Some(object));
    }

    #[test]
    fn test_reference_union() {
        let mut store = TypeStore::new(hierarchy());
        let integer = store.class("java.lang.Integer");
        let number = store.class("java.lang.Number");
        let exc = store.class("java.lang.Exception");
        assert_eq!(store.union(integer, number), integer);
        let any_ref = store.kind(Kind::REF);
        assert_eq!(store.union(integer, exc), any_ref);
    }

    #[test]
    fn test_null_assigns_to_class() {
        let mut store = TypeStore::new(hierarchy());
        let null = store.kind(Kind::REF);
        let exc = store.class("java.lang.Exception");
        let int = store.int();
        assert_eq!(store.assign_to(null, exc), Some(exc));
        assert_eq!(store.assign_to(int, exc), None);
    }

    #[test]
    fn test_type_spec_parse() {
        assert_eq!("int".parse::<TypeSpec>().unwrap(), TypeSpec::int());
        assert_eq!(
            "{byte,short,int}".parse::<TypeSpec>().unwrap(),
            TypeSpec::Multi(Kind::BYTE | Kind::SHORT | Kind::INT)
        );
        assert_eq!(
            "java.lang.String".parse::<TypeSpec>().unwrap(),
            TypeSpec::class("java.lang.String")
        );
        assert!("{byte,bogus}".parse::<TypeSpec>().is_err());
    }

    fn kind_strategy() -> impl Strategy<Value = Kind> {
        (1u16..=0x3ff).prop_map(Kind)
    }

    proptest! {
        #[test]
        fn prop_intersect_commutes(a in kind_strategy(), b in kind_strategy()) {
            let mut store = TypeStore::standalone();
            let (ta, tb) = (store.kind(a), store.kind(b));
            prop_assert_eq!(store.intersect(ta, tb), store.intersect(tb, ta));
        }

        #[test]
        fn prop_union_commutes(a in kind_strategy(), b in kind_strategy()) {
            let mut store = TypeStore::standalone();
            let (ta, tb) = (store.kind(a), store.kind(b));
            prop_assert_eq!(store.union(ta, tb), store.union(tb, ta));
        }

        #[test]
        fn prop_intersect_identity(a in kind_strategy()) {
            let mut store = TypeStore::standalone();
            let ta = store.kind(a);
            let any = store.kind(Kind::ANY);
            prop_assert_eq!(store.intersect(ta, ta), Some(ta));
            prop_assert_eq!(store.intersect(ta, any), Some(ta));
        }

        #[test]
        fn prop_assign_is_sound(a in kind_strategy(), b in kind_strategy()) {
            let mut store = TypeStore::standalone();
            let (ta, tb) = (store.kind(a), store.kind(b));
            if let Some(r) = store.assign_to(ta, tb) {
                if r != ta {
                    let k = store.kinds(r);
                    prop_assert!(a.contains(k) && b.contains(k));
                }
            }
        }
    }
}
