//! An owned element tree built by the html5ever tree builder.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use html5ever::driver::ParseOpts;
use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{Attribute, QualName};

/// Deepest element nesting kept in the tree, the document root counting as one.
///
/// Elements nested further are unwrapped: their children join the deepest
/// kept ancestor.
pub const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lowercase tag name.
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|c| c == class))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First descendant (depth-first, self included) with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        if self.name == name {
            return Some(self);
        }
        self.child_elements().find_map(|child| child.find(name))
    }

    /// Every descendant element, depth-first, self included.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        let mut i = 0;
        while i < out.len() {
            let element = out[i];
            out.extend(element.child_elements());
            i += 1;
        }
        out
    }

    /// Concatenated text of all descendants, untouched.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(&element.children, out),
        }
    }
}

/// Parse an HTML document or fragment into a synthetic `#document` root.
///
/// Tree construction follows HTML5, so any input yields `html`, `head` and
/// `body` elements and malformed markup is recovered from rather than rejected.
pub fn parse(html: &str) -> Element {
    let sink = Sink {
        document: SinkNode::new(SinkKind::Document),
        unnamed: QualName::new(None, html5ever::ns!(), html5ever::local_name!("")),
    };
    let document = parse_document(sink, ParseOpts::default())
        .from_utf8()
        .one(html.as_bytes());
    into_element(&document)
}

/// An element being filled and the nodes still to read into it, last first.
struct Frame {
    element: Element,
    pending: Vec<Handle>,
}

/// Move the builder's tree into owned elements without recursing.
fn into_element(document: &Handle) -> Element {
    let mut stack = vec![Frame {
        element: Element::new("#document"),
        pending: take_children(document),
    }];

    loop {
        let depth = stack.len();
        let Some(frame) = stack.last_mut() else {
            return Element::new("#document");
        };
        let Some(node) = frame.pending.pop() else {
            let Some(done) = stack.pop() else {
                return Element::new("#document");
            };
            match stack.last_mut() {
                Some(parent) => parent.element.children.push(Node::Element(done.element)),
                None => return done.element,
            }
            continue;
        };

        match &node.kind {
            SinkKind::Text(text) => frame.element.push_text(&text.borrow()),
            SinkKind::Element { .. } if depth >= MAX_DEPTH => {
                frame.pending.extend(take_children(&node));
            }
            SinkKind::Element { name, attrs } => {
                let mut element = Element::new(name.local.to_string());
                element.attrs = attrs
                    .borrow()
                    .iter()
                    .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                    .collect();
                stack.push(Frame {
                    element,
                    pending: take_children(&node),
                });
            }
            // Comments and processing instructions
            SinkKind::Document | SinkKind::Other => {}
        }
    }
}

/// Detach a node's children, returned last first.
fn take_children(node: &Handle) -> Vec<Handle> {
    let mut children = std::mem::take(&mut *node.children.borrow_mut());
    children.reverse();
    children
}

type Handle = Rc<SinkNode>;

struct SinkNode {
    kind: SinkKind,
    parent: RefCell<Weak<SinkNode>>,
    children: RefCell<Vec<Handle>>,
}

enum SinkKind {
    Document,
    Element {
        name: QualName,
        attrs: RefCell<Vec<Attribute>>,
    },
    Text(RefCell<String>),
    Other,
}

impl SinkNode {
    fn new(kind: SinkKind) -> Handle {
        Rc::new(Self {
            kind,
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
        })
    }

    fn text(text: &str) -> Handle {
        Self::new(SinkKind::Text(RefCell::new(text.to_string())))
    }
}

fn detach(node: &Handle) {
    let parent = node.parent.replace(Weak::new()).upgrade();
    if let Some(parent) = parent {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
}

fn append_child(parent: &Handle, child: NodeOrText<Handle>) {
    let node = match child {
        NodeOrText::AppendNode(node) => {
            detach(&node);
            node
        }
        NodeOrText::AppendText(text) => {
            {
                let children = parent.children.borrow();
                if let Some(SinkKind::Text(last)) = children.last().map(|last| &last.kind) {
                    last.borrow_mut().push_str(&text);
                    return;
                }
            }
            SinkNode::text(&text)
        }
    };
    *node.parent.borrow_mut() = Rc::downgrade(parent);
    parent.children.borrow_mut().push(node);
}

fn insert_before(sibling: &Handle, child: NodeOrText<Handle>) {
    let parent = sibling.parent.borrow().upgrade();
    let Some(parent) = parent else {
        return;
    };
    let node = match child {
        NodeOrText::AppendNode(node) => {
            detach(&node);
            node
        }
        NodeOrText::AppendText(text) => {
            {
                let children = parent.children.borrow();
                let previous = children
                    .iter()
                    .position(|child| Rc::ptr_eq(child, sibling))
                    .and_then(|pos| pos.checked_sub(1))
                    .and_then(|pos| children.get(pos));
                if let Some(SinkKind::Text(previous)) = previous.map(|node| &node.kind) {
                    previous.borrow_mut().push_str(&text);
                    return;
                }
            }
            SinkNode::text(&text)
        }
    };
    *node.parent.borrow_mut() = Rc::downgrade(&parent);
    let mut children = parent.children.borrow_mut();
    let pos = children
        .iter()
        .position(|child| Rc::ptr_eq(child, sibling))
        .unwrap_or(children.len());
    children.insert(pos, node);
}

/// Tree builder target. Parse errors are recovered from the way browsers do.
struct Sink {
    document: Handle,
    unnamed: QualName,
}

impl TreeSink for Sink {
    type Handle = Handle;
    type Output = Handle;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Handle {
        self.document
    }

    fn parse_error(&self, msg: Cow<'static, str>) {
        log::trace!("html: {msg}");
    }

    fn get_document(&self) -> Handle {
        self.document.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Handle) -> &'a QualName {
        match &target.kind {
            SinkKind::Element { name, .. } => name,
            _ => &self.unnamed,
        }
    }

    fn create_element(&self, name: QualName, attrs: Vec<Attribute>, _flags: ElementFlags) -> Handle {
        SinkNode::new(SinkKind::Element {
            name,
            attrs: RefCell::new(attrs),
        })
    }

    fn create_comment(&self, _text: StrTendril) -> Handle {
        SinkNode::new(SinkKind::Other)
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Handle {
        SinkNode::new(SinkKind::Other)
    }

    fn append(&self, parent: &Handle, child: NodeOrText<Handle>) {
        append_child(parent, child);
    }

    fn append_based_on_parent_node(
        &self,
        element: &Handle,
        prev_element: &Handle,
        child: NodeOrText<Handle>,
    ) {
        let attached = element.parent.borrow().upgrade().is_some();
        if attached {
            insert_before(element, child);
        } else {
            append_child(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &Handle) -> Handle {
        // Template content stays inline
        target.clone()
    }

    fn same_node(&self, x: &Handle, y: &Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &Handle, new_node: NodeOrText<Handle>) {
        insert_before(sibling, new_node);
    }

    fn add_attrs_if_missing(&self, target: &Handle, attrs: Vec<Attribute>) {
        if let SinkKind::Element {
            attrs: existing, ..
        } = &target.kind
        {
            let mut existing = existing.borrow_mut();
            for attr in attrs {
                if !existing.iter().any(|a| a.name == attr.name) {
                    existing.push(attr);
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Handle) {
        detach(target);
    }

    fn reparent_children(&self, node: &Handle, new_parent: &Handle) {
        let children = std::mem::take(&mut *node.children.borrow_mut());
        for child in children {
            *child.parent.borrow_mut() = Rc::downgrade(new_parent);
            new_parent.children.borrow_mut().push(child);
        }
    }
}
