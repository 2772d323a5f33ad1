//! Interface descriptors: named method collections over a shared type pool.

use crate::descriptor::{self, DescriptorBase};
use crate::error::{DfiError, Result};
use crate::function::DynFunction;
use crate::map::StringMap;
use crate::scanner::Scanner;
use crate::types::TypePool;
use crate::version::Version;

/// One interface method: its verbatim id, source-order index and parsed
/// function.
#[derive(Debug)]
pub struct Method {
    index: usize,
    id: String,
    func: DynFunction,
}

impl Method {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The raw method identifier as it appeared in the descriptor.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn function(&self) -> &DynFunction {
        &self.func
    }

    pub fn function_mut(&mut self) -> &mut DynFunction {
        &mut self.func
    }
}

/// A parsed interface descriptor.
#[derive(Debug)]
pub struct DynInterface {
    base: DescriptorBase,
    name: String,
    version_string: String,
    methods: Vec<Method>,
    by_id: StringMap<usize>,
}

/// Extra characters allowed in a method id (service-ID notation).
const METHOD_ID_EXTRA_CHARS: &[u8] = b".();[{}/";

impl DynInterface {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut sc = Scanner::new(descriptor);
        let mut methods: Vec<Method> = Vec::new();
        let base = descriptor::parse_sections(&mut sc, &mut |base, section, sc| {
            if section != "methods" {
                return Err(DfiError::parse(format!("unsupported section '{section}'")));
            }
            parse_methods(base, sc, &mut methods)
        })?;

        for method in &methods {
            let ret = method.func.return_type().descriptor();
            if ret != 'N' {
                return Err(DfiError::parse(format!(
                    "only methods with a return type 'N' (native int) are supported, got '{ret}'"
                )));
            }
        }

        let mut by_id = StringMap::new();
        for method in &methods {
            by_id.put(&method.id, method.index);
        }
        let name = base
            .header_entry("name")
            .unwrap_or_default()
            .to_string();
        let version_string = base
            .header_entry("version")
            .unwrap_or_default()
            .to_string();
        Ok(DynInterface {
            base,
            name,
            version_string,
            methods,
            by_id,
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

    /// The shared type pool of the `types` section.
    pub fn types(&self) -> &TypePool {
        &self.base.types
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Look a method up by its verbatim id.
    pub fn find_method(&self, id: &str) -> Option<&Method> {
        let index = *self.by_id.get(id)?;
        self.methods.get(index)
    }
}

fn parse_methods(
    base: &mut DescriptorBase,
    sc: &mut Scanner<'_>,
    methods: &mut Vec<Method>,
) -> Result<()> {
    loop {
        match sc.peek() {
            None | Some(b':') => return Ok(()),
            Some(_) => {}
        }
        let id = sc.parse_name_with(METHOD_ID_EXTRA_CHARS)?;
        sc.eat(b'=')?;
        let func = DynFunction::parse_scanner(sc, Some(&base.types))?;
        sc.eat(b'\n')?;
        methods.push(Method {
            index: methods.len(),
            id,
            func,
        });
    }
}
