//! `xsl:include` and `xsl:import`: compiling other stylesheet modules in place.
//!
//! A module's declarations are compiled into the same [`CompilerBuilder`] as
//! the module that refers to it. Imported modules finish with a lower import
//! precedence than everything compiled after them, because every `xsl:import`
//! comes before the other declarations of its module.

use crate::compiler::{CompilerBuilder, ModuleFrame};
use crate::error::XsltError;
use crate::parser::{ElementEvent, parse_stylesheet_content};
use std::fs;
use std::path::{Path, PathBuf};
use xform_dom::parse_xml;

impl CompilerBuilder {
    /// Records that the current module has a declaration, and rejects an
    /// `xsl:import` that follows one.
    pub(crate) fn check_declaration_order(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let is_import = event.name.local == "import";
        let Some(module) = self.modules.last_mut() else {
            return Ok(());
        };
        if is_import && module.declared {
            return Err(XsltError::structure(
                event.display_name(),
                "must come before the other top-level elements",
            ));
        }
        if !is_import {
            module.declared = true;
        }
        Ok(())
    }

    pub(crate) fn handle_module(
        &mut self,
        event: &ElementEvent,
        import: bool,
    ) -> Result<(), XsltError> {
        let href = Self::required(event, "href")?;
        let path = self.resolve_href(href)?;
        let canonical = fs::canonicalize(&path).map_err(|e| module_error(href, &path, e))?;
        if self
            .modules
            .iter()
            .any(|m| m.path.as_deref() == Some(canonical.as_path()))
        {
            return Err(XsltError::Module {
                href: href.to_string(),
                message: "the module refers back to itself".to_string(),
            });
        }
        let text = fs::read_to_string(&canonical).map_err(|e| module_error(href, &path, e))?;
        let tree = parse_xml(&text)?;
        log::debug!(
            "{} {}",
            if import { "importing" } else { "including" },
            canonical.display()
        );

        let forwards_compatible = self.forwards_compatible;
        let excluded = self.excluded_namespaces.clone();
        let open = std::mem::take(&mut self.open);
        self.modules.push(ModuleFrame {
            base: canonical.parent().map(Path::to_path_buf).unwrap_or_default(),
            path: Some(canonical),
            declared: false,
        });
        self.module_root_pending = true;
        let result = parse_stylesheet_content(&tree, self);
        self.module_root_pending = false;
        self.modules.pop();
        self.open = open;
        self.forwards_compatible = forwards_compatible;
        self.excluded_namespaces = excluded;
        result?;

        if import {
            self.precedence += 1;
        }
        Ok(())
    }

    /// Local files only: a plain path or a `file://` URL, relative to the
    /// module that refers to it.
    fn resolve_href(&self, href: &str) -> Result<PathBuf, XsltError> {
        let trimmed = href.trim();
        let local = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        if local.is_empty() || local.contains("://") {
            return Err(XsltError::Module {
                href: href.to_string(),
                message: "only local files can be loaded".to_string(),
            });
        }
        let path = Path::new(local);
        Ok(match self.modules.last() {
            Some(module) if path.is_relative() => module.base.join(path),
            _ => path.to_path_buf(),
        })
    }
}

fn module_error(href: &str, path: &Path, error: std::io::Error) -> XsltError {
    XsltError::Module {
        href: href.to_string(),
        message: format!("{}: {}", path.display(), error),
    }
}
