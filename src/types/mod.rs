//! The dynamic type model.
//!
//! A [`DynType`] is built from the compact descriptor notation and owns an
//! arena of type nodes. Nodes reference each other by [`TypeId`], which is
//! what makes self-referential definitions (`Tnode={Lnode;...};`) cycle-free
//! to own and drop. [`TypeView`] couples a borrowed arena with a node id and
//! is the unit of all introspection and instance work.
//!
//! # Descriptor notation
//!
//! Simple types are one character (`I` i32, `D` double, `t` string, ...).
//! `{DD a b}` is a record with two named double fields, `[D` a sequence of
//! doubles, `*D` an owning pointer, `TName=<type>;` declares a nested type
//! that `LName;` (pointer) and `lName;` (by value) can refer to, and
//! `#name=value;` attaches a meta-property to the type that follows.

pub(crate) mod layout;
mod instance;
mod print;

pub use instance::Instance;

use enum_dispatch::enum_dispatch;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use ustr::{ustr, Ustr};

use crate::error::{DfiError, Result};
use crate::scanner::Scanner;
use layout::Layout;

/// Index of a node inside its owning [`DynType`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub(crate) u32);

/// The scalar kinds, tagged by their descriptor byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SimpleKind {
    Bool = b'Z',
    Int8 = b'B',
    UInt8 = b'b',
    Int16 = b'S',
    UInt16 = b's',
    Int32 = b'I',
    UInt32 = b'i',
    Int64 = b'J',
    UInt64 = b'j',
    NativeInt = b'N',
    Float = b'F',
    Double = b'D',
    /// 32-bit signed storage with a symbol table in the meta-properties.
    Enum = b'E',
    /// Untyped pointer. Representable, but rejected by both codecs.
    Pointer = b'P',
    Void = b'V',
}

/// Coarse variant classification of a type node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Simple,
    Text,
    Complex,
    Sequence,
    TypedPointer,
    Ref,
}

#[derive(Debug, Clone)]
pub(crate) struct Simple {
    pub kind: SimpleKind,
}

#[derive(Debug, Clone)]
pub(crate) struct Text;

#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub name: Option<Ustr>,
    pub ty: TypeId,
}

#[derive(Debug, Clone)]
pub(crate) struct Complex {
    pub fields: Vec<Field>,
    /// Field offsets in the platform struct layout; filled by the layout
    /// pass.
    pub offsets: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) struct Sequence {
    pub item: TypeId,
}

#[derive(Debug, Clone)]
pub(crate) struct TypedPointer {
    pub pointee: TypeId,
}

#[derive(Debug, Clone)]
pub(crate) struct RefByValue {
    pub target: TypeId,
}

#[enum_dispatch(Body)]
pub(crate) trait BodyMethods {
    /// Descriptor byte of this body variant.
    fn descriptor(&self) -> u8;
    fn class(&self) -> TypeClass;
}

impl BodyMethods for Simple {
    fn descriptor(&self) -> u8 {
        self.kind.into()
    }
    fn class(&self) -> TypeClass {
        TypeClass::Simple
    }
}

impl BodyMethods for Text {
    fn descriptor(&self) -> u8 {
        b't'
    }
    fn class(&self) -> TypeClass {
        TypeClass::Text
    }
}

impl BodyMethods for Complex {
    fn descriptor(&self) -> u8 {
        b'{'
    }
    fn class(&self) -> TypeClass {
        TypeClass::Complex
    }
}

impl BodyMethods for Sequence {
    fn descriptor(&self) -> u8 {
        b'['
    }
    fn class(&self) -> TypeClass {
        TypeClass::Sequence
    }
}

impl BodyMethods for TypedPointer {
    fn descriptor(&self) -> u8 {
        b'*'
    }
    fn class(&self) -> TypeClass {
        TypeClass::TypedPointer
    }
}

impl BodyMethods for RefByValue {
    fn descriptor(&self) -> u8 {
        b'l'
    }
    fn class(&self) -> TypeClass {
        TypeClass::Ref
    }
}

#[enum_dispatch]
#[derive(Debug, Clone)]
pub(crate) enum Body {
    Simple,
    Text,
    Complex,
    Sequence,
    TypedPointer,
    RefByValue,
}

#[derive(Debug, Clone)]
pub(crate) struct TypeNode {
    pub name: Option<Ustr>,
    pub parent: Option<TypeId>,
    /// Named nested definitions (`T...=...;`), reference targets for the
    /// rest of the enclosing production.
    pub nested: Vec<TypeId>,
    /// Ordered meta-properties (`#name=value;`).
    pub metas: Vec<(Ustr, String)>,
    pub body: Body,
    pub layout: Layout,
    pub trivial: bool,
}

impl TypeNode {
    fn new(parent: Option<TypeId>, name: Option<Ustr>) -> Self {
        TypeNode {
            name,
            parent,
            nested: Vec::new(),
            metas: Vec::new(),
            body: Body::Simple(Simple {
                kind: SimpleKind::Void,
            }),
            layout: Layout::ZERO,
            trivial: false,
        }
    }

    /// Shift all node ids by `base`; used when a subtree is copied between
    /// arenas.
    fn remap(&mut self, base: u32) {
        let shift = |id: &mut TypeId| id.0 += base;
        if let Some(p) = &mut self.parent {
            shift(p);
        }
        for n in &mut self.nested {
            shift(n);
        }
        match &mut self.body {
            Body::Complex(c) => {
                for f in &mut c.fields {
                    shift(&mut f.ty);
                }
            }
            Body::Sequence(s) => shift(&mut s.item),
            Body::TypedPointer(p) => shift(&mut p.pointee),
            Body::RefByValue(r) => shift(&mut r.target),
            Body::Simple(_) | Body::Text(_) => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TypeGraph {
    nodes: Vec<TypeNode>,
}

impl TypeGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: TypeId) -> &mut TypeNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeNode> {
        self.nodes.iter()
    }

    /// Follow by-value references to the node they resolve to.
    pub fn resolve_id(&self, mut id: TypeId) -> TypeId {
        loop {
            match &self.node(id).body {
                Body::RefByValue(r) => id = r.target,
                _ => return id,
            }
        }
    }
}

/// A named pool of parsed types, used as the shared reference scope of
/// interface and message descriptors.
#[derive(Debug, Default)]
pub struct TypePool {
    types: Vec<DynType>,
}

impl TypePool {
    pub fn new() -> Self {
        TypePool::default()
    }

    pub fn add(&mut self, ty: DynType) {
        self.types.push(ty);
    }

    pub fn find(&self, name: &str) -> Option<&DynType> {
        self.types.iter().find(|t| t.name() == Some(name))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynType> {
        self.types.iter()
    }
}

/// An owned, parsed type graph.
#[derive(Debug, Clone)]
pub struct DynType {
    pub(crate) graph: TypeGraph,
    pub(crate) root: TypeId,
}

impl DynType {
    /// Parse a descriptor. The whole input must be consumed.
    pub fn parse(descriptor: &str) -> Result<Self> {
        Self::parse_full(descriptor, None, None)
    }

    /// Parse a descriptor, giving the root type a name (making it usable as
    /// a reference target).
    pub fn parse_named(descriptor: &str, name: &str) -> Result<Self> {
        Self::parse_full(descriptor, Some(name), None)
    }

    /// Parse a descriptor that may refer to named types in `pool`.
    pub fn parse_with_pool(descriptor: &str, name: Option<&str>, pool: &TypePool) -> Result<Self> {
        Self::parse_full(descriptor, name, Some(pool))
    }

    fn parse_full(descriptor: &str, name: Option<&str>, pool: Option<&TypePool>) -> Result<Self> {
        let mut sc = Scanner::new(descriptor);
        let ty = Self::parse_scanner(&mut sc, name, pool)?;
        if !sc.at_end() {
            return Err(DfiError::parse(format!(
                "unexpected trailing input at position {} in type descriptor",
                sc.pos()
            )));
        }
        Ok(ty)
    }

    /// Parse one type production from an already-open scanner, leaving the
    /// rest of the input untouched.
    pub(crate) fn parse_scanner(
        sc: &mut Scanner<'_>,
        name: Option<&str>,
        pool: Option<&TypePool>,
    ) -> Result<Self> {
        let mut parser = Parser {
            sc,
            graph: TypeGraph::default(),
            pool,
            imported: Vec::new(),
        };
        let root = parser.parse_type(None, name.map(ustr))?;
        let mut graph = parser.graph;
        layout::finalize(&mut graph)?;
        Ok(DynType { graph, root })
    }

    /// View of the root node.
    pub fn root(&self) -> TypeView<'_> {
        TypeView {
            graph: &self.graph,
            id: self.root,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.graph.node(self.root).name.as_ref().map(|n| n.as_str())
    }

    pub fn descriptor(&self) -> char {
        self.root().descriptor_char()
    }

    /// Size of an instance image of this type.
    pub fn size(&self) -> usize {
        self.root().size()
    }

    pub fn alignment(&self) -> usize {
        self.root().alignment()
    }

    /// Whether instances can be bit-copied and need no recursive free.
    pub fn is_trivial(&self) -> bool {
        self.root().is_trivial()
    }
}

/// A borrowed view of one node in a type graph.
#[derive(Debug, Clone, Copy)]
pub struct TypeView<'g> {
    pub(crate) graph: &'g TypeGraph,
    pub(crate) id: TypeId,
}

impl<'g> TypeView<'g> {
    pub(crate) fn node(&self) -> &'g TypeNode {
        self.graph.node(self.id)
    }

    pub(crate) fn at(&self, id: TypeId) -> TypeView<'g> {
        TypeView {
            graph: self.graph,
            id,
        }
    }

    pub fn descriptor(&self) -> u8 {
        self.node().body.descriptor()
    }

    pub fn descriptor_char(&self) -> char {
        self.descriptor() as char
    }

    pub fn class(&self) -> TypeClass {
        self.node().body.class()
    }

    pub fn name(&self) -> Option<&'g str> {
        self.node().name.as_ref().map(|n| n.as_str())
    }

    pub fn size(&self) -> usize {
        self.resolved().node().layout.size
    }

    pub fn alignment(&self) -> usize {
        self.resolved().node().layout.align
    }

    pub fn is_trivial(&self) -> bool {
        self.resolved().node().trivial
    }

    pub fn simple_kind(&self) -> Option<SimpleKind> {
        match &self.node().body {
            Body::Simple(s) => Some(s.kind),
            _ => None,
        }
    }

    /// Follow by-value references to the type they resolve to.
    pub fn resolved(&self) -> TypeView<'g> {
        self.at(self.graph.resolve_id(self.id))
    }

    /// Value of a meta-property, if present.
    pub fn meta_value(&self, name: &str) -> Option<&'g str> {
        self.node()
            .metas
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Ordered meta-properties (`#name=value;`). For enum types this is the
    /// symbol table in declaration order.
    pub fn metas(&self) -> impl Iterator<Item = (&'g str, &'g str)> {
        self.node()
            .metas
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    // ─── Complex types ──────────────────────────────────────────────────

    /// Number of fields; 0 for non-record types.
    pub fn field_count(&self) -> usize {
        match &self.node().body {
            Body::Complex(c) => c.fields.len(),
            _ => 0,
        }
    }

    /// Index of a named field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        match &self.node().body {
            Body::Complex(c) => c
                .fields
                .iter()
                .position(|f| f.name.is_some_and(|n| n.as_str() == name)),
            _ => None,
        }
    }

    pub fn field_name_at(&self, index: usize) -> Option<&'g str> {
        match &self.node().body {
            Body::Complex(c) => c.fields.get(index)?.name.as_ref().map(|n| n.as_str()),
            _ => None,
        }
    }

    pub fn field_type_at(&self, index: usize) -> Result<TypeView<'g>> {
        match &self.node().body {
            Body::Complex(c) => c
                .fields
                .get(index)
                .map(|f| self.at(f.ty))
                .ok_or_else(|| {
                    DfiError::illegal_argument(format!("field index {index} out of bounds"))
                }),
            _ => Err(DfiError::illegal_argument(
                "field access on a non-record type",
            )),
        }
    }

    /// Platform offset of a field inside the record image.
    pub fn field_offset_at(&self, index: usize) -> Result<usize> {
        match &self.node().body {
            Body::Complex(c) => c.offsets.get(index).copied().ok_or_else(|| {
                DfiError::illegal_argument(format!("field index {index} out of bounds"))
            }),
            _ => Err(DfiError::illegal_argument(
                "field access on a non-record type",
            )),
        }
    }

    // ─── Sequences and pointers ─────────────────────────────────────────

    /// Element type of a sequence.
    pub fn item_type(&self) -> Result<TypeView<'g>> {
        match &self.node().body {
            Body::Sequence(s) => Ok(self.at(s.item)),
            _ => Err(DfiError::illegal_argument(
                "item type requested on a non-sequence type",
            )),
        }
    }

    /// Pointee type of a typed pointer.
    pub fn pointee_type(&self) -> Result<TypeView<'g>> {
        match &self.node().body {
            Body::TypedPointer(p) => Ok(self.at(p.pointee)),
            _ => Err(DfiError::illegal_argument(
                "pointee type requested on a non-pointer type",
            )),
        }
    }
}

struct Parser<'a, 'i> {
    sc: &'a mut Scanner<'i>,
    graph: TypeGraph,
    pool: Option<&'a TypePool>,
    /// Pool types already copied into this graph, by name.
    imported: Vec<(Ustr, TypeId)>,
}

impl<'a, 'i> Parser<'a, 'i> {
    fn parse_type(&mut self, parent: Option<TypeId>, name: Option<Ustr>) -> Result<TypeId> {
        let id = self.graph.push(TypeNode::new(parent, name));
        let body = self.parse_any(id)?;
        self.graph.node_mut(id).body = body;
        Ok(id)
    }

    fn parse_any(&mut self, id: TypeId) -> Result<Body> {
        let c = self
            .sc
            .next()
            .ok_or_else(|| DfiError::parse("unexpected end of type descriptor"))?;
        match c {
            b'T' => {
                self.parse_nested(id)?;
                self.parse_any(id)
            }
            b'#' => {
                self.parse_meta(id)?;
                self.parse_any(id)
            }
            b'L' => {
                // Typed pointer to a named type.
                let target = self.parse_ref_target(id)?;
                let pointee = self.graph.push(TypeNode {
                    body: Body::RefByValue(RefByValue { target }),
                    ..TypeNode::new(Some(id), None)
                });
                Ok(Body::TypedPointer(TypedPointer { pointee }))
            }
            b'l' => {
                let target = self.parse_ref_target(id)?;
                Ok(Body::RefByValue(RefByValue { target }))
            }
            b'{' => self.parse_complex(id),
            b'[' => {
                let item = self.parse_type(Some(id), None)?;
                Ok(Body::Sequence(Sequence { item }))
            }
            b'*' => {
                let pointee = self.parse_type(Some(id), None)?;
                Ok(Body::TypedPointer(TypedPointer { pointee }))
            }
            b't' => Ok(Body::Text(Text)),
            c => {
                let kind = SimpleKind::try_from(c).map_err(|_| {
                    DfiError::parse(format!("unsupported descriptor '{}'", c as char))
                })?;
                Ok(Body::Simple(Simple { kind }))
            }
        }
    }

    fn parse_nested(&mut self, id: TypeId) -> Result<()> {
        let name = self.sc.parse_name()?;
        self.sc.eat(b'=')?;
        let child = self.parse_type(Some(id), Some(ustr(&name)))?;
        self.sc.eat(b';')?;
        self.graph.node_mut(id).nested.push(child);
        Ok(())
    }

    fn parse_meta(&mut self, id: TypeId) -> Result<()> {
        let name = self.sc.parse_name()?;
        self.sc.eat(b'=')?;
        let value = self.sc.parse_name()?;
        self.sc.eat(b';')?;
        self.graph.node_mut(id).metas.push((ustr(&name), value));
        Ok(())
    }

    fn parse_complex(&mut self, id: TypeId) -> Result<Body> {
        let mut fields = Vec::new();
        let mut c = self
            .sc
            .next()
            .ok_or_else(|| DfiError::parse("unexpected end of record descriptor"))?;
        while c != b' ' && c != b'}' {
            self.sc.unread();
            let ty = self.parse_type(Some(id), None)?;
            fields.push(Field { name: None, ty });
            c = self
                .sc
                .next()
                .ok_or_else(|| DfiError::parse("unexpected end of record descriptor"))?;
        }
        // Names apply to the leading fields; trailing fields may stay
        // unnamed.
        let mut index = 0;
        while c == b' ' && index < fields.len() {
            let name = self.sc.parse_name()?;
            fields[index].name = Some(ustr(&name));
            index += 1;
            c = self
                .sc
                .next()
                .ok_or_else(|| DfiError::parse("unexpected end of record descriptor"))?;
        }
        if c != b'}' {
            return Err(DfiError::parse("error parsing record type, expected '}'"));
        }
        Ok(Body::Complex(Complex {
            fields,
            offsets: Vec::new(),
        }))
    }

    fn parse_ref_target(&mut self, id: TypeId) -> Result<TypeId> {
        let name = self.sc.parse_name()?;
        let target = self
            .resolve(id, &name)
            .ok_or_else(|| DfiError::parse(format!("cannot find type '{name}'")))?;
        self.sc.eat(b';')?;
        Ok(target)
    }

    /// Resolve a reference name by walking the lexical scope chain: the
    /// current type's own name, the external pool (at the outermost level),
    /// then the nested definitions, repeated up through the parents.
    fn resolve(&mut self, from: TypeId, name: &str) -> Option<TypeId> {
        let mut cur = Some(from);
        while let Some(c) = cur {
            if self
                .graph
                .node(c)
                .name
                .is_some_and(|n| n.as_str() == name)
            {
                return Some(c);
            }
            if self.graph.node(c).parent.is_none() {
                if let Some(found) = self.import_pool(name) {
                    return Some(found);
                }
            }
            let node = self.graph.node(c);
            for &nested in &node.nested {
                if self
                    .graph
                    .node(nested)
                    .name
                    .is_some_and(|n| n.as_str() == name)
                {
                    return Some(nested);
                }
            }
            cur = self.graph.node(c).parent;
        }
        None
    }

    /// Materialize a pool type in this graph by copying its subtree. Pool
    /// types are closed when consulted, so the copy is semantically
    /// equivalent to sharing.
    fn import_pool(&mut self, name: &str) -> Option<TypeId> {
        if let Some((_, id)) = self.imported.iter().find(|(n, _)| n.as_str() == name) {
            return Some(*id);
        }
        let src = self.pool?.find(name)?;
        let base = self.graph.len() as u32;
        for node in src.graph.iter() {
            let mut copy = node.clone();
            copy.remap(base);
            self.graph.push(copy);
        }
        let id = TypeId(src.root.0 + base);
        self.imported.push((ustr(name), id));
        Some(id)
    }
}
