//! Process-wide engine state.

use once_cell::sync::Lazy;
use xform_xpath1::FunctionRegistry;
use xform_xpath1::functions::{EXSLT_COMMON, EXSLT_MATH, EXSLT_STRINGS};

static ENGINE: Lazy<Engine> = Lazy::new(|| {
    let functions = FunctionRegistry::global();
    log::debug!("engine initialised with {} XPath functions", functions.len());
    Engine { functions }
});

/// State shared by every operation in the process. It is created on first use
/// and never torn down.
#[derive(Debug)]
pub struct Engine {
    functions: &'static FunctionRegistry,
}

impl Engine {
    pub fn global() -> &'static Engine {
        &ENGINE
    }

    /// The XPath functions stylesheets may call, including the EXSLT extensions.
    pub fn functions(&self) -> &'static FunctionRegistry {
        self.functions
    }

    /// Whether a function with this expanded name accepts `arity` arguments.
    pub fn has_function(&self, namespace: Option<&str>, name: &str, arity: usize) -> bool {
        self.functions.check_call(namespace, name, arity).is_ok()
    }

    /// Namespaces of the registered extension function libraries.
    pub fn extension_namespaces(&self) -> [&'static str; 3] {
        [EXSLT_COMMON, EXSLT_MATH, EXSLT_STRINGS]
    }

    /// The XSLT version implemented.
    pub fn xslt_version(&self) -> &'static str {
        "1.0"
    }
}
