//! Message descriptors: a single named payload type with header metadata.
//!
//! Used by pub/sub style serializers, where each wire message is described
//! by one descriptor file.

use crate::descriptor::{self, DescriptorBase};
use crate::error::{DfiError, Result};
use crate::scanner::Scanner;
use crate::types::{DynType, TypePool};
use crate::version::Version;

/// A parsed message descriptor.
pub struct DynMessage {
    base: DescriptorBase,
    name: String,
    version_string: String,
    msg_type: DynType,
}

impl DynMessage {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut sc = Scanner::new(descriptor);
        let mut msg_type: Option<DynType> = None;
        let base = descriptor::parse_sections(&mut sc, &mut |base, section, sc| {
            if section != "message" {
                return Err(DfiError::parse(format!("unsupported section '{section}'")));
            }
            let name = base
                .header_entry("name")
                .ok_or_else(|| {
                    DfiError::parse("message section requires a preceding header name entry")
                })?
                .to_string();
            let ty = DynType::parse_scanner(sc, Some(&name), Some(&base.types))?;
            if sc.peek() == Some(b';') {
                sc.next();
            }
            sc.eat(b'\n')?;
            msg_type = Some(ty);
            Ok(())
        })?;
        let msg_type = msg_type
            .ok_or_else(|| DfiError::parse("message descriptor misses a message section"))?;
        let name = base.header_entry("name").unwrap_or_default().to_string();
        let version_string = base
            .header_entry("version")
            .unwrap_or_default()
            .to_string();
        Ok(DynMessage {
            base,
            name,
            version_string,
            msg_type,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.base.version
    }

    pub fn version_string(&self) -> &str {
        &self.version_string
    }

    pub fn header_entry(&self, name: &str) -> Option<&str> {
        self.base.header_entry(name)
    }

    pub fn annotation_entry(&self, name: &str) -> Option<&str> {
        self.base.annotation_entry(name)
    }

    pub fn types(&self) -> &TypePool {
        &self.base.types
    }

    /// The payload type, named after the message.
    pub fn message_type(&self) -> &DynType {
        &self.msg_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
:header
type=message
name=poi
version=1.0.0
:annotations
classification=geo
:types
location={DD lat lon};
:message
{llocation;t position description}
:
";

    #[test]
    fn parses_message_descriptor() {
        let msg = DynMessage::parse(EXAMPLE).unwrap();
        assert_eq!(msg.name(), "poi");
        assert_eq!(msg.version_string(), "1.0.0");
        assert_eq!(msg.version(), &Version::new(1, 0, 0, ""));
        assert_eq!(msg.annotation_entry("classification"), Some("geo"));
        let ty = msg.message_type();
        assert_eq!(ty.name(), Some("poi"));
        assert_eq!(ty.root().field_index("description"), Some(1));
        let pos = ty.root().field_type_at(0).unwrap().resolved();
        assert_eq!(pos.name(), Some("location"));
        assert_eq!(pos.field_count(), 2);
    }

    #[test]
    fn message_section_is_required() {
        let missing = "\
:header
type=message
name=poi
version=1.0.0
:
";
        assert!(DynMessage::parse(missing).is_err());
    }
}
