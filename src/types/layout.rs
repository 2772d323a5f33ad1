//! Platform layout computation for type graphs.
//!
//! Aggregate sizes and field offsets follow the System-V struct rules: each
//! field is placed at its alignment, the struct alignment is the maximum
//! field alignment, and the struct size is rounded up to that alignment.
//! This matches what libffi computes for the same aggregates, so images
//! produced here are valid call arguments and return buffers.

use std::ffi::c_void;
use std::mem;
use std::os::raw::c_int;

use super::instance::SeqHeader;
use super::{Body, SimpleKind, TypeGraph, TypeId};
use crate::error::{DfiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    pub size: usize,
    pub align: usize,
}

impl Layout {
    pub const ZERO: Layout = Layout { size: 0, align: 1 };
}

pub(crate) fn pointer_layout() -> Layout {
    Layout {
        size: mem::size_of::<*const c_void>(),
        align: mem::align_of::<*const c_void>(),
    }
}

fn sequence_layout() -> Layout {
    Layout {
        size: mem::size_of::<SeqHeader>(),
        align: mem::align_of::<SeqHeader>(),
    }
}

fn simple_layout(kind: SimpleKind) -> Layout {
    match kind {
        SimpleKind::Bool | SimpleKind::Int8 | SimpleKind::UInt8 => Layout { size: 1, align: 1 },
        SimpleKind::Int16 | SimpleKind::UInt16 => Layout { size: 2, align: 2 },
        SimpleKind::Int32 | SimpleKind::UInt32 | SimpleKind::Enum => Layout { size: 4, align: 4 },
        SimpleKind::Int64 | SimpleKind::UInt64 => Layout {
            size: 8,
            align: mem::align_of::<i64>(),
        },
        SimpleKind::Float => Layout {
            size: 4,
            align: mem::align_of::<f32>(),
        },
        SimpleKind::Double => Layout {
            size: 8,
            align: mem::align_of::<f64>(),
        },
        SimpleKind::NativeInt => Layout {
            size: mem::size_of::<c_int>(),
            align: mem::align_of::<c_int>(),
        },
        SimpleKind::Pointer => pointer_layout(),
        SimpleKind::Void => Layout::ZERO,
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Compute layouts, record field offsets and trivial flags for every node in
/// the graph. Rejects by-value reference cycles, which would have infinite
/// size.
pub(crate) fn finalize(graph: &mut TypeGraph) -> Result<()> {
    let n = graph.len();
    let mut layouts = vec![Layout::ZERO; n];
    let mut offsets: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut state = vec![VisitState::Pending; n];
    for i in 0..n {
        compute_layout(
            graph,
            TypeId(i as u32),
            &mut layouts,
            &mut offsets,
            &mut state,
        )?;
    }

    let mut trivial = vec![false; n];
    let mut trivial_done = vec![false; n];
    for i in 0..n {
        compute_trivial(graph, TypeId(i as u32), &mut trivial, &mut trivial_done);
    }

    for i in 0..n {
        let node = graph.node_mut(TypeId(i as u32));
        node.layout = layouts[i];
        node.trivial = trivial[i];
        if let Body::Complex(c) = &mut node.body {
            c.offsets = mem::take(&mut offsets[i]);
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Pending,
    Visiting,
    Done,
}

fn compute_layout(
    graph: &TypeGraph,
    id: TypeId,
    layouts: &mut Vec<Layout>,
    offsets: &mut Vec<Vec<usize>>,
    state: &mut Vec<VisitState>,
) -> Result<Layout> {
    let i = id.0 as usize;
    match state[i] {
        VisitState::Done => return Ok(layouts[i]),
        VisitState::Visiting => {
            return Err(DfiError::parse(
                "invalid recursive by-value reference in type",
            ))
        }
        VisitState::Pending => {}
    }
    state[i] = VisitState::Visiting;

    let layout = match &graph.node(id).body {
        Body::Simple(s) => simple_layout(s.kind),
        Body::Text(_) | Body::TypedPointer(_) => pointer_layout(),
        Body::Sequence(_) => sequence_layout(),
        Body::Complex(c) => {
            let mut offs = Vec::with_capacity(c.fields.len());
            let mut offset = 0usize;
            let mut max_align = 1usize;
            for field in &c.fields {
                let fl = compute_layout(graph, field.ty, layouts, offsets, state)?;
                offset = align_up(offset, fl.align);
                offs.push(offset);
                offset += fl.size;
                max_align = max_align.max(fl.align);
            }
            let size = align_up(offset, max_align);
            offsets[i] = offs;
            Layout {
                size,
                align: max_align,
            }
        }
        Body::RefByValue(r) => compute_layout(graph, r.target, layouts, offsets, state)?,
    };

    state[i] = VisitState::Done;
    layouts[i] = layout;
    Ok(layout)
}

fn compute_trivial(
    graph: &TypeGraph,
    id: TypeId,
    memo: &mut Vec<bool>,
    done: &mut Vec<bool>,
) -> bool {
    let i = id.0 as usize;
    if done[i] {
        return memo[i];
    }
    let trivial = match &graph.node(id).body {
        Body::Simple(s) => s.kind != SimpleKind::Pointer,
        Body::Text(_) | Body::Sequence(_) | Body::TypedPointer(_) => false,
        Body::Complex(c) => c
            .fields
            .iter()
            .all(|f| compute_trivial(graph, f.ty, memo, done)),
        Body::RefByValue(r) => compute_trivial(graph, r.target, memo, done),
    };
    memo[i] = trivial;
    done[i] = true;
    trivial
}

#[cfg(test)]
mod tests {
    use crate::types::DynType;
    use std::mem;

    #[test]
    fn scalar_layouts_match_the_platform() {
        assert_eq!(DynType::parse("I").unwrap().size(), 4);
        assert_eq!(DynType::parse("J").unwrap().size(), 8);
        assert_eq!(DynType::parse("D").unwrap().alignment(), mem::align_of::<f64>());
        assert_eq!(
            DynType::parse("t").unwrap().size(),
            mem::size_of::<*const u8>()
        );
        assert_eq!(
            DynType::parse("N").unwrap().size(),
            mem::size_of::<std::os::raw::c_int>()
        );
    }

    #[test]
    fn record_layout_matches_repr_c() {
        #[repr(C)]
        struct Mixed {
            a: f64,
            b: i64,
            c: i32,
            d: i16,
            e: f32,
        }
        let t = DynType::parse("{DJISF a b c d e}").unwrap();
        assert_eq!(t.size(), mem::size_of::<Mixed>());
        assert_eq!(t.alignment(), mem::align_of::<Mixed>());
        let root = t.root();
        assert_eq!(root.field_offset_at(0).unwrap(), mem::offset_of!(Mixed, a));
        assert_eq!(root.field_offset_at(1).unwrap(), mem::offset_of!(Mixed, b));
        assert_eq!(root.field_offset_at(2).unwrap(), mem::offset_of!(Mixed, c));
        assert_eq!(root.field_offset_at(3).unwrap(), mem::offset_of!(Mixed, d));
        assert_eq!(root.field_offset_at(4).unwrap(), mem::offset_of!(Mixed, e));
    }

    #[test]
    fn packed_tail_padding_matches_repr_c() {
        #[repr(C)]
        struct Tail {
            a: u8,
            b: i32,
            c: u8,
        }
        let t = DynType::parse("{bIb a b c}").unwrap();
        assert_eq!(t.size(), mem::size_of::<Tail>());
        let root = t.root();
        assert_eq!(root.field_offset_at(1).unwrap(), mem::offset_of!(Tail, b));
        assert_eq!(root.field_offset_at(2).unwrap(), mem::offset_of!(Tail, c));
    }

    #[test]
    fn sequence_header_layout() {
        #[repr(C)]
        struct Seq {
            cap: u32,
            len: u32,
            buf: *mut f64,
        }
        let t = DynType::parse("[D").unwrap();
        assert_eq!(t.size(), mem::size_of::<Seq>());
        assert_eq!(t.alignment(), mem::align_of::<Seq>());
    }

    #[test]
    fn nested_record_layout() {
        #[repr(C)]
        struct Inner {
            a: i32,
        }
        #[repr(C)]
        struct Outer {
            c: Inner,
            d: Inner,
        }
        let t = DynType::parse("{{I a}{I b} c d}").unwrap();
        assert_eq!(t.size(), mem::size_of::<Outer>());
        assert_eq!(
            t.root().field_offset_at(1).unwrap(),
            mem::offset_of!(Outer, d)
        );
    }
}
