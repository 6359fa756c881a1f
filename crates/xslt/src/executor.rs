//! The XSLT executor. It walks the source tree, selects template rules and writes
//! the result into an [`OutputBuilder`].
//!
//! The executor is generic over [`DataSourceNode`], so it runs against any tree the
//! XPath engine can navigate. Individual instructions are implemented as free
//! functions in `executor_handlers`.

use crate::ast::{
    AttributeValueTemplate, AvtPart, CompiledStylesheet, PreparsedTemplate, VariableValue,
    XsltInstruction,
};
use crate::error::ExecutionError;
use crate::executor_handlers::{
    apply_templates, call_template, control_flow, copy, for_each, literals, number, variables,
};
use crate::output::OutputBuilder;
use crate::pattern::PatternContext;
use crate::result_tree::{ResultFragment, ResultTreeBuilder};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use xform_dom::Name;
use xform_xpath1::{
    DataSourceNode, EvaluationContext, Expression, FunctionRegistry, KeyIndexes, NodeType,
    VariableResolver, XPathError, XPathValue,
};

/// Maximum nesting of template invocations before execution is aborted.
pub const MAX_DEPTH: usize = 1000;

/// The context node with its position and size in the current node list.
#[derive(Debug, Clone, Copy)]
pub struct Focus<N> {
    pub node: N,
    pub position: usize,
    pub size: usize,
}

impl<N> Focus<N> {
    pub fn single(node: N) -> Self {
        Focus {
            node,
            position: 1,
            size: 1,
        }
    }
}

/// A bound variable. Content-valued variables keep the fragment next to its
/// string value so `xsl:copy-of` can reproduce the markup.
#[derive(Debug, Clone)]
pub struct Binding<N> {
    pub value: XPathValue<N>,
    pub fragment: Option<Rc<ResultFragment>>,
}

impl<N> Binding<N> {
    pub fn value(value: XPathValue<N>) -> Self {
        Binding {
            value,
            fragment: None,
        }
    }
}

/// The variables visible to an expression: the current template's locals, innermost
/// last, then the globals.
struct Scope<'e, N> {
    locals: &'e [(String, Binding<N>)],
    globals: &'e HashMap<String, Binding<N>>,
}

impl<'e, N> Scope<'e, N> {
    fn lookup(&self, name: &str) -> Option<&'e Binding<N>> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
            .or_else(|| self.globals.get(name))
    }
}

impl<N: Clone> VariableResolver<N> for Scope<'_, N> {
    fn resolve(&self, name: &str) -> Option<XPathValue<N>> {
        self.lookup(name).map(|b| b.value.clone())
    }
}

pub struct TemplateExecutor<'s, 'a, N: DataSourceNode<'a>> {
    pub(crate) stylesheet: &'s CompiledStylesheet,
    pub(crate) root: N,
    globals: HashMap<String, Binding<N>>,
    locals: Vec<(String, Binding<N>)>,
    /// Start of the current template's variables in `locals`.
    frame_base: usize,
    key_indexes: KeyIndexes<N>,
    depth: usize,
    /// Mode of the rule being instantiated, used by `xsl:apply-imports`.
    pub(crate) current_mode: Option<&'s str>,
    /// Import precedence of the rule being instantiated, used by `xsl:apply-imports`.
    pub(crate) current_precedence: Option<usize>,
    _marker: PhantomData<&'a ()>,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> TemplateExecutor<'s, 'a, N> {
    /// Creates an executor for one transformation and builds the `xsl:key` indexes.
    pub fn new(stylesheet: &'s CompiledStylesheet, root: N) -> Result<Self, ExecutionError> {
        let mut executor = Self {
            stylesheet,
            root,
            globals: HashMap::new(),
            locals: Vec::new(),
            frame_base: 0,
            key_indexes: KeyIndexes::new(),
            depth: 0,
            current_mode: None,
            current_precedence: None,
            _marker: PhantomData,
        };
        if !stylesheet.keys.is_empty() {
            executor.key_indexes = executor.build_key_indexes()?;
        }
        Ok(executor)
    }

    fn build_key_indexes(&self) -> Result<KeyIndexes<N>, ExecutionError> {
        let mut indexes = KeyIndexes::new();
        for node in document_nodes(self.root) {
            for key in &self.stylesheet.keys {
                if !key.pattern.matches(node, self)? {
                    continue;
                }
                let values = match self.evaluate(&key.use_expr, Focus::single(node))? {
                    XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.string_value()).collect(),
                    other => vec![other.to_string()],
                };
                let index: &mut HashMap<String, Vec<N>> =
                    indexes.entry(key.name.clone()).or_default();
                for value in values {
                    let entry = index.entry(value).or_default();
                    if entry.last() != Some(&node) {
                        entry.push(node);
                    }
                }
            }
        }
        log::trace!("built {} key indexes", indexes.len());
        Ok(indexes)
    }

    /// Binds top-level parameters and variables. Values in `params` override the
    /// defaults of matching `xsl:param`s; other names are ignored. Globals may refer
    /// to globals declared later in the stylesheet.
    pub fn initialize_globals(
        &mut self,
        mut params: HashMap<String, XPathValue<N>>,
    ) -> Result<(), ExecutionError> {
        let stylesheet = self.stylesheet;
        let focus = Focus::single(self.root);
        let mut pending: Vec<_> = stylesheet.globals.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut last_error = None;
            for global in pending {
                if global.is_param
                    && let Some(value) = params.remove(&global.name)
                {
                    self.globals.insert(global.name.clone(), Binding::value(value));
                    continue;
                }
                match self.binding_value(&global.value, focus) {
                    Ok(binding) => {
                        self.globals.insert(global.name.clone(), binding);
                    }
                    Err(ExecutionError::XPath(XPathError::UnknownVariable(name)))
                        if name != global.name
                            && !self.globals.contains_key(&name)
                            && stylesheet.globals.iter().any(|g| g.name == name) =>
                    {
                        last_error = Some(ExecutionError::XPath(XPathError::UnknownVariable(name)));
                        deferred.push(global);
                    }
                    Err(e) => return Err(e),
                }
            }
            if deferred.len() == before
                && let Some(e) = last_error
            {
                // Every remaining global waits on another one: a circular definition.
                return Err(e);
            }
            pending = deferred;
        }
        for name in params.keys() {
            log::debug!("ignoring parameter '{}': no matching xsl:param", name);
        }
        Ok(())
    }

    /// Applies templates to the root node and returns the finished result tree.
    pub fn run(&mut self) -> Result<ResultFragment, ExecutionError> {
        let mut builder = ResultTreeBuilder::new();
        let root = self.root;
        self.apply_templates_to_nodes(&[root], None, &[], &mut builder)?;
        Ok(builder.finish())
    }

    // --- Expression evaluation ---

    fn scope(&self) -> Scope<'_, N> {
        Scope {
            locals: &self.locals[self.frame_base..],
            globals: &self.globals,
        }
    }

    /// Evaluates an expression with `focus` as the context.
    pub fn evaluate_xpath(
        &self,
        expr: &Expression,
        focus: Focus<N>,
    ) -> Result<XPathValue<N>, XPathError> {
        let scope = self.scope();
        let e_ctx = EvaluationContext::new(
            focus.node,
            self.root,
            FunctionRegistry::global(),
            &scope,
            &self.stylesheet.namespaces,
            &self.key_indexes,
        )
        .with_focus(focus.node, focus.position, focus.size)
        .with_decimal_formats(&self.stylesheet.decimal_formats);
        xform_xpath1::evaluate(expr, &e_ctx)
    }

    pub(crate) fn evaluate(
        &self,
        expr: &Expression,
        focus: Focus<N>,
    ) -> Result<XPathValue<N>, ExecutionError> {
        Ok(self.evaluate_xpath(expr, focus)?)
    }

    pub(crate) fn evaluate_string(
        &self,
        expr: &Expression,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        Ok(self.evaluate(expr, focus)?.to_string())
    }

    pub(crate) fn evaluate_bool(
        &self,
        expr: &Expression,
        focus: Focus<N>,
    ) -> Result<bool, ExecutionError> {
        Ok(self.evaluate(expr, focus)?.to_bool())
    }

    pub(crate) fn select_nodes(
        &self,
        expr: &Expression,
        focus: Focus<N>,
        what: &str,
    ) -> Result<Vec<N>, ExecutionError> {
        Ok(self.evaluate(expr, focus)?.into_nodes(what)?)
    }

    pub(crate) fn evaluate_avt(
        &self,
        avt: &AttributeValueTemplate,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        let mut out = String::new();
        for part in &avt.0 {
            match part {
                AvtPart::Static(s) => out.push_str(s),
                AvtPart::Dynamic(expr) => out.push_str(&self.evaluate_string(expr, focus)?),
            }
        }
        Ok(out)
    }

    // --- Variables ---

    pub(crate) fn push_variable(&mut self, name: String, binding: Binding<N>) {
        self.locals.push((name, binding));
    }

    /// The fragment behind a content-valued variable, if `name` is one.
    pub(crate) fn variable_fragment(&self, name: &str) -> Option<Rc<ResultFragment>> {
        self.scope().lookup(name).and_then(|b| b.fragment.clone())
    }

    /// Computes the value of a variable, parameter or `xsl:with-param`.
    pub(crate) fn binding_value(
        &mut self,
        value: &'s VariableValue,
        focus: Focus<N>,
    ) -> Result<Binding<N>, ExecutionError> {
        match value {
            VariableValue::Select(expr) => Ok(Binding::value(self.evaluate(expr, focus)?)),
            VariableValue::Content(body) => {
                let fragment = self.instantiate_to_fragment(body, focus)?;
                Ok(Binding {
                    value: XPathValue::String(fragment.string_value()),
                    fragment: Some(Rc::new(fragment)),
                })
            }
            VariableValue::Empty => Ok(Binding::value(XPathValue::String(String::new()))),
        }
    }

    // --- Template instantiation ---

    /// Runs a sequence of instructions. Variables bound inside go out of scope at
    /// the end of the sequence.
    pub(crate) fn execute_template(
        &mut self,
        body: &'s PreparsedTemplate,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let mark = self.locals.len();
        let mut result = Ok(());
        for instruction in &body.0 {
            result = self.execute_instruction(instruction, focus, builder);
            if result.is_err() {
                break;
            }
        }
        self.locals.truncate(mark);
        result
    }

    pub(crate) fn instantiate_to_fragment(
        &mut self,
        body: &'s PreparsedTemplate,
        focus: Focus<N>,
    ) -> Result<ResultFragment, ExecutionError> {
        let mut builder = ResultTreeBuilder::new();
        self.execute_template(body, focus, &mut builder)?;
        Ok(builder.finish())
    }

    /// The string value of instantiated content, as attributes, comments and
    /// messages use it.
    pub(crate) fn instantiate_to_string(
        &mut self,
        body: &'s PreparsedTemplate,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        Ok(self.instantiate_to_fragment(body, focus)?.string_value())
    }

    fn execute_instruction(
        &mut self,
        instruction: &'s XsltInstruction,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match instruction {
            XsltInstruction::Text {
                text,
                disable_escaping,
            } => {
                builder.add_text(text, *disable_escaping);
                Ok(())
            }
            XsltInstruction::LiteralElement {
                name,
                namespaces,
                attributes,
                use_attribute_sets,
                body,
            } => literals::handle_literal_element(
                self,
                name,
                namespaces,
                attributes,
                use_attribute_sets,
                body,
                focus,
                builder,
            ),
            XsltInstruction::ApplyTemplates {
                select,
                mode,
                sort_keys,
                params,
            } => apply_templates::handle_apply_templates(
                self,
                select.as_ref(),
                mode.as_deref(),
                sort_keys,
                params,
                focus,
                builder,
            ),
            XsltInstruction::ApplyImports => {
                apply_templates::handle_apply_imports(self, focus, builder)
            }
            XsltInstruction::CallTemplate { name, params } => {
                call_template::handle_call_template(self, name, params, focus, builder)
            }
            XsltInstruction::ForEach {
                select,
                sort_keys,
                body,
            } => for_each::handle_for_each(self, select, sort_keys, body, focus, builder),
            XsltInstruction::If { test, body } => {
                control_flow::handle_if(self, test, body, focus, builder)
            }
            XsltInstruction::Choose { whens, otherwise } => {
                control_flow::handle_choose(self, whens, otherwise.as_ref(), focus, builder)
            }
            XsltInstruction::ValueOf {
                select,
                disable_escaping,
            } => {
                let text = self.evaluate_string(select, focus)?;
                builder.add_text(&text, *disable_escaping);
                Ok(())
            }
            XsltInstruction::Copy {
                use_attribute_sets,
                body,
            } => copy::handle_copy(self, use_attribute_sets, body, focus, builder),
            XsltInstruction::CopyOf { select } => {
                copy::handle_copy_of(self, select, focus, builder)
            }
            XsltInstruction::Element {
                name,
                use_attribute_sets,
                body,
            } => literals::handle_element(self, name, use_attribute_sets, body, focus, builder),
            XsltInstruction::Attribute { name, body } => {
                literals::handle_attribute(self, name, body, focus, builder)
            }
            XsltInstruction::Comment { body } => {
                literals::handle_comment(self, body, focus, builder)
            }
            XsltInstruction::ProcessingInstruction { name, body } => {
                literals::handle_processing_instruction(self, name, body, focus, builder)
            }
            XsltInstruction::Variable { name, value } => {
                variables::handle_variable(self, name, value, focus)
            }
            XsltInstruction::Number(instruction) => {
                number::handle_number(self, instruction, focus, builder)
            }
            XsltInstruction::Message { body, terminate } => {
                control_flow::handle_message(self, body, *terminate, focus)
            }
        }
    }

    // --- Rule selection ---

    pub(crate) fn apply_templates_to_nodes(
        &mut self,
        nodes: &[N],
        mode: Option<&'s str>,
        params: &[(String, Binding<N>)],
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            match self.find_template(node, mode, None)? {
                Some(index) => self.invoke_rule(index, focus, params, mode, builder)?,
                None => self.apply_built_in(focus, mode, builder)?,
            }
        }
        Ok(())
    }

    /// The template rule with the best match for `node` in `mode`, considering
    /// only rules below the import precedence `below` when it is given.
    pub(crate) fn find_template(
        &self,
        node: N,
        mode: Option<&str>,
        below: Option<usize>,
    ) -> Result<Option<usize>, ExecutionError> {
        let Some(rules) = self.stylesheet.rules.get(&mode.map(str::to_string)) else {
            return Ok(None);
        };
        let candidates = rules
            .iter()
            .filter(|rule| below.is_none_or(|limit| rule.precedence < limit));
        for rule in candidates {
            if rule.pattern.matches(node, self)? {
                log::trace!("node {:?} matched '{}'", node, rule.pattern);
                return Ok(Some(rule.template));
            }
        }
        Ok(None)
    }

    /// Instantiates a template chosen by rule selection, making it the current rule.
    pub(crate) fn invoke_rule(
        &mut self,
        index: usize,
        focus: Focus<N>,
        params: &[(String, Binding<N>)],
        mode: Option<&'s str>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let saved = self.current_precedence;
        self.current_precedence = self.stylesheet.templates.get(index).map(|t| t.precedence);
        let result = self.invoke_template(index, focus, params, mode, builder);
        self.current_precedence = saved;
        result
    }

    /// Instantiates the template at `index` in a fresh variable frame.
    pub(crate) fn invoke_template(
        &mut self,
        index: usize,
        focus: Focus<N>,
        params: &[(String, Binding<N>)],
        mode: Option<&'s str>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExecutionError::RecursionLimit(MAX_DEPTH));
        }
        let stylesheet = self.stylesheet;
        let template = stylesheet.templates.get(index).ok_or_else(|| {
            ExecutionError::Runtime(format!("no template at index {}", index))
        })?;

        let saved_base = self.frame_base;
        let saved_mode = self.current_mode;
        let mark = self.locals.len();
        self.frame_base = mark;
        self.current_mode = mode;
        self.depth += 1;

        let mut result = Ok(());
        for param in &template.params {
            let binding = match params.iter().rev().find(|(name, _)| *name == param.name) {
                Some((_, passed)) => Ok(passed.clone()),
                None => self.binding_value(&param.default, focus),
            };
            match binding {
                Ok(binding) => self.push_variable(param.name.clone(), binding),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.execute_template(&template.body, focus, builder);
        }

        self.depth -= 1;
        self.current_mode = saved_mode;
        self.locals.truncate(mark);
        self.frame_base = saved_base;
        result
    }

    /// The built-in template rules: recurse into roots and elements, copy the text
    /// of text and attribute nodes, ignore everything else.
    pub(crate) fn apply_built_in(
        &mut self,
        focus: Focus<N>,
        mode: Option<&'s str>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match focus.node.node_type() {
            NodeType::Root | NodeType::Element => {
                let children: Vec<N> = focus.node.children().collect();
                self.apply_templates_to_nodes(&children, mode, &[], builder)
            }
            NodeType::Text | NodeType::Attribute => {
                builder.add_text(&focus.node.string_value(), false);
                Ok(())
            }
            NodeType::Comment | NodeType::ProcessingInstruction => Ok(()),
        }
    }
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> PatternContext<'a, N> for TemplateExecutor<'s, 'a, N> {
    fn root(&self) -> N {
        self.root
    }

    fn predicate(
        &self,
        predicate: &Expression,
        node: N,
        position: usize,
        size: usize,
    ) -> Result<bool, XPathError> {
        let focus = Focus {
            node,
            position,
            size,
        };
        Ok(match self.evaluate_xpath(predicate, focus)? {
            XPathValue::Number(n) => n == position as f64,
            other => other.to_bool(),
        })
    }

    fn select(&self, expr: &Expression, context: N) -> Result<Vec<N>, XPathError> {
        self.evaluate_xpath(expr, Focus::single(context))?
            .into_nodes("a pattern anchor")
    }
}

/// Every node of the document in document order, attributes directly after
/// their element.
pub(crate) fn document_nodes<'a, N: DataSourceNode<'a> + 'a>(root: N) -> Vec<N> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        out.push(node);
        out.extend(node.attributes());
        let children: Vec<N> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

/// The name of an element, attribute or processing instruction as a result-tree name.
pub(crate) fn node_name<'a, N: DataSourceNode<'a>>(node: &N) -> Option<Name> {
    node.name().map(|q| Name {
        prefix: q.prefix.map(str::to_string),
        local: q.local_part.to_string(),
        namespace: node.namespace_uri().map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use xform_dom::parse_xml;

    fn run(xslt: &str, xml: &str) -> ResultFragment {
        let stylesheet = compile(&parse_xml(xslt).unwrap()).unwrap();
        let source = parse_xml(xml).unwrap();
        let root = source.root();
        let mut executor = TemplateExecutor::new(&stylesheet, root).unwrap();
        executor.initialize_globals(HashMap::new()).unwrap();
        executor.run().unwrap()
    }

    const XSL: &str = r#"xmlns:xsl="http://www.w3.org/1999/XSL/Transform" version="1.0""#;

    #[test]
    fn test_built_in_rules_copy_text() {
        let xslt = format!("<xsl:stylesheet {}/>", XSL);
        let fragment = run(&xslt, "<a>one<b>two</b><!--c--></a>");
        assert_eq!(fragment.string_value(), "onetwo");
    }

    #[test]
    fn test_higher_priority_rule_wins() {
        let xslt = format!(
            r#"<xsl:stylesheet {}>
                <xsl:template match="item">generic;</xsl:template>
                <xsl:template match="item[@special]">special;</xsl:template>
                <xsl:template match="/"><xsl:apply-templates select="//item"/></xsl:template>
            </xsl:stylesheet>"#,
            XSL
        );
        let fragment = run(&xslt, r#"<r><item/><item special="1"/></r>"#);
        assert_eq!(fragment.string_value(), "generic;special;");
    }

    #[test]
    fn test_called_template_does_not_see_caller_locals() {
        let xslt = format!(
            r#"<xsl:stylesheet {}>
                <xsl:template match="/">
                    <xsl:variable name="x" select="'caller'"/>
                    <xsl:call-template name="t"/>
                </xsl:template>
                <xsl:template name="t"><xsl:value-of select="$x"/></xsl:template>
            </xsl:stylesheet>"#,
            XSL
        );
        let stylesheet = compile(&parse_xml(&xslt).unwrap()).unwrap();
        let source = parse_xml("<r/>").unwrap();
        let mut executor = TemplateExecutor::new(&stylesheet, source.root()).unwrap();
        executor.initialize_globals(HashMap::new()).unwrap();
        let err = executor.run().unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::XPath(XPathError::UnknownVariable(ref v)) if v == "x"
        ));
    }

    #[test]
    fn test_globals_may_refer_forward() {
        let xslt = format!(
            r#"<xsl:stylesheet {}>
                <xsl:variable name="a" select="concat($b, '!')"/>
                <xsl:variable name="b" select="'hi'"/>
                <xsl:template match="/"><xsl:value-of select="$a"/></xsl:template>
            </xsl:stylesheet>"#,
            XSL
        );
        assert_eq!(run(&xslt, "<r/>").string_value(), "hi!");
    }

    #[test]
    fn test_runaway_recursion_is_stopped() {
        let xslt = format!(
            r#"<xsl:stylesheet {}>
                <xsl:template match="/"><xsl:call-template name="loop"/></xsl:template>
                <xsl:template name="loop"><xsl:call-template name="loop"/></xsl:template>
            </xsl:stylesheet>"#,
            XSL
        );
        let stylesheet = compile(&parse_xml(&xslt).unwrap()).unwrap();
        let source = parse_xml("<r/>").unwrap();
        let outcome = std::thread::scope(|s| {
            std::thread::Builder::new()
                .stack_size(64 * 1024 * 1024)
                .spawn_scoped(s, || {
                    let mut executor = TemplateExecutor::new(&stylesheet, source.root()).unwrap();
                    executor.initialize_globals(HashMap::new()).unwrap();
                    executor.run().map(|_| ())
                })
                .unwrap()
                .join()
                .unwrap()
        });
        assert!(matches!(outcome, Err(ExecutionError::RecursionLimit(MAX_DEPTH))));
    }
}
