//! Shared scaffolding for section-based descriptor files.
//!
//! Interface and message descriptors are line oriented: `:name\n` starts a
//! section, `header` and `annotations` hold name/value pairs, `types` holds
//! named type definitions shared by the rest of the file, and any other
//! section is delegated to the concrete parser. A line holding only `:`
//! terminates the descriptor.

use crate::error::{DfiError, Result};
use crate::map::StringMap;
use crate::scanner::Scanner;
use crate::types::{DynType, TypePool};
use crate::version::Version;

#[derive(Debug)]
pub(crate) struct DescriptorBase {
    pub header: StringMap<String>,
    pub annotations: StringMap<String>,
    pub types: TypePool,
    pub version: Version,
}

impl DescriptorBase {
    fn new() -> Self {
        DescriptorBase {
            header: StringMap::new(),
            annotations: StringMap::new(),
            types: TypePool::new(),
            version: Version::default(),
        }
    }

    pub fn header_entry(&self, name: &str) -> Option<&str> {
        self.header.get(name).map(String::as_str)
    }

    pub fn annotation_entry(&self, name: &str) -> Option<&str> {
        self.annotations.get(name).map(String::as_str)
    }
}

/// Parse all sections of a descriptor, delegating unknown section names to
/// `custom`. Validates the required header entries and the version.
pub(crate) fn parse_sections(
    sc: &mut Scanner<'_>,
    custom: &mut dyn FnMut(&mut DescriptorBase, &str, &mut Scanner<'_>) -> Result<()>,
) -> Result<DescriptorBase> {
    let mut base = DescriptorBase::new();
    loop {
        match sc.peek() {
            Some(b':') => {
                sc.next();
                // A bare ':' line ends the descriptor.
                match sc.peek() {
                    None => break,
                    Some(b'\n') => {
                        sc.next();
                        break;
                    }
                    Some(_) => {}
                }
                let section = sc.parse_name()?;
                sc.eat(b'\n')?;
                match section.as_str() {
                    "header" => sc.parse_name_value_section(&mut base.header)?,
                    "annotations" => sc.parse_name_value_section(&mut base.annotations)?,
                    "types" => parse_types_section(sc, &mut base.types)?,
                    other => custom(&mut base, other, sc)?,
                }
            }
            None => break,
            Some(_) => {
                return Err(DfiError::parse("descriptor section must start with ':'"));
            }
        }
    }

    for required in ["type", "name", "version"] {
        if base.header_entry(required).is_none() {
            return Err(DfiError::parse(format!(
                "descriptor header misses a '{required}' entry"
            )));
        }
    }
    let version_str = base.header_entry("version").unwrap_or_default().to_string();
    base.version = version_str.parse().map_err(|_| {
        DfiError::parse(format!("invalid version '{version_str}' in descriptor header"))
    })?;
    Ok(base)
}

/// Parse `Name=<Type>;\n` lines into the shared type pool. Later lines may
/// reference earlier ones.
fn parse_types_section(sc: &mut Scanner<'_>, types: &mut TypePool) -> Result<()> {
    loop {
        match sc.peek() {
            None | Some(b':') => return Ok(()),
            Some(_) => {}
        }
        let name = sc.parse_name()?;
        sc.eat(b'=')?;
        let ty = DynType::parse_scanner(sc, Some(&name), Some(&*types))?;
        if sc.peek() == Some(b';') {
            sc.next();
        }
        sc.eat(b'\n')?;
        types.add(ty);
    }
}
