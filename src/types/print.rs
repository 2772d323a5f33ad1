//! Diagnostic tree printing for type graphs.

use std::fmt;

use super::{Body, DynType, TypeView};

impl fmt::Display for DynType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Named nested definitions first, then the root tree.
        let root = self.root();
        for (i, node) in self.graph.iter().enumerate() {
            if i as u32 == self.root.0 || node.name.is_none() {
                continue;
            }
            let view = TypeView {
                graph: &self.graph,
                id: super::TypeId(i as u32),
            };
            print_named(f, view)?;
        }
        writeln!(f, "main type:")?;
        print_any(f, "root", root, 0)
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "\t")?;
    }
    Ok(())
}

fn print_named(f: &mut fmt::Formatter<'_>, view: TypeView<'_>) -> fmt::Result {
    let name = view.name().unwrap_or("(unnamed)");
    match &view.node().body {
        Body::Complex(c) => {
            writeln!(
                f,
                "type '{}': complex type, size is {}, alignment is {}, descriptor is '{}'. fields:",
                name,
                view.size(),
                view.alignment(),
                view.descriptor_char()
            )?;
            for field in &c.fields {
                let fname = field.name.as_ref().map(|n| n.as_str()).unwrap_or("(unnamed)");
                print_any(f, fname, view.at(field.ty), 2)?;
            }
            writeln!(f, "}}")
        }
        _ => writeln!(
            f,
            "type '{}': simple type, size is {}, alignment is {}, descriptor is '{}'",
            name,
            view.size(),
            view.alignment(),
            view.descriptor_char()
        ),
    }
}

fn print_any(f: &mut fmt::Formatter<'_>, name: &str, view: TypeView<'_>, depth: usize) -> fmt::Result {
    let real = view.resolved();
    match &real.node().body {
        Body::Complex(c) => {
            if let Some(type_name) = real.name() {
                indent(f, depth)?;
                writeln!(
                    f,
                    "{}: complex type ('{}'), size is {}, alignment is {}, descriptor is '{}'.",
                    name,
                    type_name,
                    real.size(),
                    real.alignment(),
                    real.descriptor_char()
                )
            } else {
                indent(f, depth)?;
                writeln!(
                    f,
                    "{}: complex type (anon), size is {}, alignment is {}, descriptor is '{}'. fields:",
                    name,
                    real.size(),
                    real.alignment(),
                    real.descriptor_char()
                )?;
                for field in &c.fields {
                    let fname = field.name.as_ref().map(|n| n.as_str()).unwrap_or("(unnamed)");
                    print_any(f, fname, real.at(field.ty), depth + 1)?;
                }
                indent(f, depth)?;
                writeln!(f, "}}")
            }
        }
        Body::Sequence(s) => {
            indent(f, depth)?;
            writeln!(
                f,
                "{}: sequence, size is {}, alignment is {}, descriptor is '{}'. element:",
                name,
                real.size(),
                real.alignment(),
                real.descriptor_char()
            )?;
            print_any(f, "item", real.at(s.item), depth + 1)
        }
        Body::TypedPointer(p) => {
            indent(f, depth)?;
            writeln!(
                f,
                "{}: typed pointer, size is {}, alignment is {}, points to ->",
                name,
                real.size(),
                real.alignment()
            )?;
            let sub = format!("*{name}");
            print_any(f, &sub, real.at(p.pointee), depth + 1)
        }
        Body::Text(_) => {
            indent(f, depth)?;
            writeln!(
                f,
                "{}: text type, size is {}, alignment is {}, descriptor is '{}'.",
                name,
                real.size(),
                real.alignment(),
                real.descriptor_char()
            )
        }
        Body::Simple(s) if s.kind == super::SimpleKind::Enum => {
            indent(f, depth)?;
            write!(
                f,
                "{}: enum type, size is {}, alignment is {}, descriptor is '{}'. values:",
                name,
                real.size(),
                real.alignment(),
                real.descriptor_char()
            )?;
            for (symbol, value) in real.metas() {
                write!(f, " (\"{symbol}\":\"{value}\")")?;
            }
            writeln!(f)
        }
        Body::Simple(_) => {
            indent(f, depth)?;
            writeln!(
                f,
                "{}: simple type, size is {}, alignment is {}, descriptor is '{}'.",
                name,
                real.size(),
                real.alignment(),
                real.descriptor_char()
            )
        }
        // resolved() never yields a reference node
        Body::RefByValue(_) => Ok(()),
    }
}
