//! Evaluation of parsed source files into a [`Value`].
//!
//! Every field is a vertex holding the conjuncts (expressions plus the scope
//! they were written in) that contribute to it. Vertices are expanded lazily:
//! struct literals create child vertices, `&` splits into more conjuncts, and
//! references copy the conjuncts of the vertex they name, so
//! `values: #Config & {...}` re-evaluates the body of `#Config` in the scope
//! of `values`. Leaf expressions are evaluated last and unified with the
//! struct built from the children.
//!
//! Conjuncts copied from a definition carry a closedness group. A field of a
//! vertex is allowed only if every group present on that vertex declares it,
//! matches it with a pattern, or was opened with `...`.

use std::collections::HashSet;
use std::rc::Rc;

use tessera_common::error::{Result, TesseraError};

use crate::parser::ast::{
    BinaryOp, Clause, Comprehension, Decl, Expr, Label, ListElem, SourceFile, StrPart, UnaryOp,
};
use crate::selector::Selector;
use crate::value::{
    Disjunct, Field, FieldKind, Kinds, Pattern, StructValue, Value, compare, regex_match,
    scalar_equal,
};

type VertexId = usize;
type GroupId = u32;

const ROOT: VertexId = 0;

#[derive(Clone, Copy)]
enum Source<'a> {
    Expr(&'a Expr),
    File(&'a [Decl]),
    Body(&'a [Decl]),
}

#[derive(Clone)]
struct Conjunct<'a> {
    source: Source<'a>,
    env: Rc<Env<'a>>,
    closed: Option<GroupId>,
    /// Group reserved for the struct literal an embedding is written in.
    embed: Option<GroupId>,
    /// Split off another conjunct or copied through a reference; references
    /// copy only the conjuncts a vertex declares itself.
    derived: bool,
}

#[derive(Clone)]
enum Binding {
    Vertex(VertexId),
    Value(Value),
}

enum Frame<'a> {
    Package(VertexId),
    Struct {
        vertex: VertexId,
        decls: &'a [Decl],
    },
    Bindings(Vec<(String, Binding)>),
}

struct Env<'a> {
    frame: Frame<'a>,
    parent: Option<Rc<Env<'a>>>,
    file: usize,
}

impl<'a> Env<'a> {
    fn child(parent: &Rc<Self>, frame: Frame<'a>) -> Rc<Self> {
        Rc::new(Self {
            frame,
            file: parent.file,
            parent: Some(Rc::clone(parent)),
        })
    }
}

enum Resolved {
    Vertex(VertexId),
    Value(Value),
}

enum Expansion {
    Fresh,
    Expanding,
    Done,
}

enum Evaluation {
    Pending,
    Running,
    Done(Value),
    Failed { path: String, message: String },
}

struct ArcRef {
    label: String,
    kind: FieldKind,
    vertex: VertexId,
}

struct PatternDecl<'a> {
    label: &'a Expr,
    value: &'a Expr,
    env: Rc<Env<'a>>,
    closed: Option<GroupId>,
    label_value: Option<Value>,
}

#[derive(Clone)]
struct PendingComprehension<'a> {
    comprehension: &'a Comprehension,
    env: Rc<Env<'a>>,
    closed: Option<GroupId>,
    embed: Option<GroupId>,
}

#[derive(Clone)]
struct ClosedGroup<'a> {
    id: GroupId,
    labels: HashSet<String>,
    patterns: Vec<(&'a Expr, Rc<Env<'a>>)>,
    open: bool,
    /// Reserved groups only close a vertex once a definition is embedded.
    active: bool,
}

enum ClauseOutcome<'a> {
    Envs(Vec<Rc<Env<'a>>>),
    Incomplete(String),
}

struct Vertex<'a> {
    path: Selector,
    in_definition: bool,
    conjuncts: Vec<Conjunct<'a>>,
    processed: usize,
    leaves: Vec<Conjunct<'a>>,
    value_leaves: Vec<(Value, usize)>,
    arcs: Vec<ArcRef>,
    is_struct: bool,
    patterns: Vec<PatternDecl<'a>>,
    applied: HashSet<(usize, VertexId)>,
    comprehensions: Vec<PendingComprehension<'a>>,
    next_comprehension: usize,
    pending: Vec<String>,
    groups: Vec<ClosedGroup<'a>>,
    copied: HashSet<VertexId>,
    expansion: Expansion,
    evaluation: Evaluation,
}

impl Vertex<'_> {
    fn new(path: Selector, in_definition: bool) -> Self {
        Self {
            path,
            in_definition,
            conjuncts: Vec::new(),
            processed: 0,
            leaves: Vec::new(),
            value_leaves: Vec::new(),
            arcs: Vec::new(),
            is_struct: false,
            patterns: Vec::new(),
            applied: HashSet::new(),
            comprehensions: Vec::new(),
            next_comprehension: 0,
            pending: Vec::new(),
            groups: Vec::new(),
            copied: HashSet::new(),
            expansion: Expansion::Fresh,
            evaluation: Evaluation::Pending,
        }
    }

    fn arc(&self, label: &str) -> Option<VertexId> {
        self.arcs.iter().find(|a| a.label == label).map(|a| a.vertex)
    }
}

fn declares(decls: &[Decl], name: &str) -> bool {
    decls
        .iter()
        .any(|d| matches!(d, Decl::Field(f) if f.label.ident() == Some(name)))
}

fn builtin(name: &str) -> Option<Value> {
    let kinds = match name {
        "string" => Kinds::STRING,
        "int" => Kinds::INT,
        "float" => Kinds::FLOAT,
        "number" => Kinds::NUMBER,
        "bool" => Kinds::BOOL,
        _ => return None,
    };
    Some(Value::kind_constraint(kinds))
}

fn label_matches(label: &Value, name: &str) -> bool {
    Value::String(name.to_string())
        .unify(label, &Selector::root())
        .is_ok()
}

/// Splits an error into the path and message needed to report it again.
fn replay(err: &TesseraError) -> (String, String) {
    match err.innermost() {
        TesseraError::Conflict { path, message }
        | TesseraError::Validation { path, message }
        | TesseraError::Lookup { path, message } => (path.clone(), message.clone()),
        other => (String::new(), other.to_string()),
    }
}

/// Evaluates the files of one package into a single value.
///
/// `max_depth` bounds how deeply field evaluations may nest.
///
/// # Errors
///
/// Returns the first conflict, unresolvable reference or structural cycle.
pub fn evaluate_files(files: &[SourceFile], max_depth: usize) -> Result<Value> {
    tracing::debug!(files = files.len(), "evaluating package");
    Evaluator::new(files, max_depth).evaluate(ROOT)
}

/// Lazily evaluates the vertex graph of one package.
struct Evaluator<'a> {
    files: &'a [SourceFile],
    vertices: Vec<Vertex<'a>>,
    next_group: GroupId,
    depth: usize,
    max_depth: usize,
}

impl<'a> Evaluator<'a> {
    fn new(files: &'a [SourceFile], max_depth: usize) -> Self {
        let mut root = Vertex::new(Selector::root(), false);
        for (idx, file) in files.iter().enumerate() {
            root.conjuncts.push(Conjunct {
                source: Source::File(&file.decls),
                env: Rc::new(Env {
                    frame: Frame::Package(ROOT),
                    parent: None,
                    file: idx,
                }),
                closed: None,
                embed: None,
                derived: false,
            });
        }
        Self {
            files,
            vertices: vec![root],
            next_group: 0,
            depth: 0,
            max_depth,
        }
    }

    fn file_name(&self, idx: usize) -> &str {
        self.files.get(idx).map_or("<input>", |f| f.name.as_str())
    }

    fn new_vertex(&mut self, path: Selector, in_definition: bool) -> VertexId {
        self.vertices.push(Vertex::new(path, in_definition));
        self.vertices.len() - 1
    }

    fn new_group(&mut self) -> GroupId {
        self.next_group += 1;
        self.next_group
    }

    fn group_mut(&mut self, v: VertexId, id: GroupId) -> &mut ClosedGroup<'a> {
        let group = self.reserved_mut(v, id);
        group.active = true;
        group
    }

    fn reserved_mut(&mut self, v: VertexId, id: GroupId) -> &mut ClosedGroup<'a> {
        let groups = &mut self.vertices[v].groups;
        let idx = match groups.iter().position(|g| g.id == id) {
            Some(idx) => idx,
            None => {
                groups.push(ClosedGroup {
                    id,
                    labels: HashSet::new(),
                    patterns: Vec::new(),
                    open: false,
                    active: false,
                });
                groups.len() - 1
            }
        };
        &mut groups[idx]
    }

    /// Queues conjuncts right after the one being processed, so fields keep
    /// the order of the conjuncts that declare them.
    fn enqueue(&mut self, v: VertexId, conjuncts: Vec<Conjunct<'a>>) {
        let vertex = &mut self.vertices[v];
        let at = vertex.processed.min(vertex.conjuncts.len());
        let _ = vertex.conjuncts.splice(at..at, conjuncts);
    }

    fn arc(&mut self, v: VertexId, label: &str, kind: FieldKind) -> VertexId {
        if let Some(arc) = self.vertices[v].arcs.iter_mut().find(|a| a.label == label) {
            arc.kind = arc.kind.merge(kind);
            return arc.vertex;
        }
        let path = self.vertices[v].path.child(label);
        let in_definition = self.vertices[v].in_definition || kind == FieldKind::Definition;
        let id = self.new_vertex(path, in_definition);
        self.vertices[v].arcs.push(ArcRef {
            label: label.to_string(),
            kind,
            vertex: id,
        });
        id
    }

    fn push_conjunct(&mut self, v: VertexId, conjunct: Conjunct<'a>) -> Result<()> {
        let vertex = &mut self.vertices[v];
        if !matches!(vertex.evaluation, Evaluation::Pending) {
            return Err(TesseraError::Conflict {
                path: vertex.path.to_string(),
                message: "field modified after it was evaluated".into(),
            });
        }
        if matches!(vertex.expansion, Expansion::Done) {
            vertex.expansion = Expansion::Fresh;
        }
        vertex.conjuncts.push(conjunct);
        Ok(())
    }

    fn expand(&mut self, v: VertexId) -> Result<()> {
        match self.vertices[v].expansion {
            Expansion::Done | Expansion::Expanding => return Ok(()),
            Expansion::Fresh => {}
        }
        self.vertices[v].expansion = Expansion::Expanding;
        let result = self.expand_conjuncts(v);
        self.vertices[v].expansion = Expansion::Done;
        result
    }

    fn expand_conjuncts(&mut self, v: VertexId) -> Result<()> {
        loop {
            while let Some(conjunct) = self.vertices[v]
                .conjuncts
                .get(self.vertices[v].processed)
                .cloned()
            {
                self.vertices[v].processed += 1;
                let file = conjunct.env.file;
                self.process(v, conjunct)
                    .map_err(|e| e.in_file(self.file_name(file)))?;
            }
            self.apply_patterns(v)?;

            let next = self.vertices[v].next_comprehension;
            let Some(pending) = self.vertices[v].comprehensions.get(next).cloned() else {
                return Ok(());
            };
            self.vertices[v].next_comprehension += 1;
            let file = pending.env.file;
            self.run_comprehension(v, pending)
                .map_err(|e| e.in_file(self.file_name(file)))?;
        }
    }

    fn process(&mut self, v: VertexId, conjunct: Conjunct<'a>) -> Result<()> {
        match conjunct.source {
            Source::File(decls) => {
                self.vertices[v].is_struct = true;
                self.add_decls(v, decls, &conjunct.env, conjunct.closed, None)
            }
            Source::Body(decls) => self.process_literal(v, decls, &conjunct),
            Source::Expr(expr) => match expr {
                Expr::Struct(decls) => self.process_literal(v, decls, &conjunct),
                Expr::Unify(lhs, rhs) => {
                    let sides = [lhs, rhs]
                        .into_iter()
                        .map(|side| Conjunct {
                            source: Source::Expr(side),
                            derived: true,
                            ..conjunct.clone()
                        })
                        .collect();
                    self.enqueue(v, sides);
                    Ok(())
                }
                e if e.is_reference() => {
                    let path = self.vertices[v].path.clone();
                    match self.resolve(e, &conjunct.env, &path)? {
                        Resolved::Vertex(w) => {
                            self.copy_from(v, w, conjunct.closed, conjunct.embed);
                            Ok(())
                        }
                        Resolved::Value(value) => {
                            self.vertices[v]
                                .value_leaves
                                .push((value, conjunct.env.file));
                            Ok(())
                        }
                    }
                }
                _ => {
                    self.vertices[v].leaves.push(conjunct);
                    Ok(())
                }
            },
        }
    }

    fn process_literal(
        &mut self,
        v: VertexId,
        decls: &'a [Decl],
        conjunct: &Conjunct<'a>,
    ) -> Result<()> {
        if decls.is_empty() || decls.iter().any(|d| !matches!(d, Decl::Embed(_))) {
            self.vertices[v].is_struct = true;
        }
        if let Some(id) = conjunct.closed {
            let _ = self.group_mut(v, id);
        }
        let env = Env::child(&conjunct.env, Frame::Struct { vertex: v, decls });
        self.add_decls(v, decls, &env, conjunct.closed, None)
    }

    fn copy_from(
        &mut self,
        v: VertexId,
        w: VertexId,
        closed: Option<GroupId>,
        embed: Option<GroupId>,
    ) {
        if w == v || !self.vertices[v].copied.insert(w) {
            return;
        }
        let group = match (closed, embed) {
            (Some(id), _) => Some(id),
            (None, Some(id)) if self.vertices[w].in_definition => Some(id),
            (None, None) if self.vertices[w].in_definition => Some(self.new_group()),
            (None, _) => None,
        };
        let copies: Vec<Conjunct<'a>> = self.vertices[w]
            .conjuncts
            .iter()
            .filter(|c| !c.derived)
            .map(|c| Conjunct {
                closed: c.closed.or(group),
                derived: true,
                ..c.clone()
            })
            .collect();
        self.enqueue(v, copies);
    }

    /// Processes an embedding in place, so that its fields come where it is
    /// written relative to the fields declared next to it.
    fn process_embedded(&mut self, v: VertexId, conjunct: Conjunct<'a>) -> Result<()> {
        let vertex = &self.vertices[v];
        let after = vertex.conjuncts.len() - vertex.processed;
        self.enqueue(v, vec![conjunct]);
        while self.vertices[v].conjuncts.len() - self.vertices[v].processed > after {
            let next = self.vertices[v].conjuncts[self.vertices[v].processed].clone();
            self.vertices[v].processed += 1;
            let file = next.env.file;
            self.process(v, next)
                .map_err(|e| e.in_file(self.file_name(file)))?;
        }
        Ok(())
    }

    /// Adds the declarations of one struct literal to `v`.
    ///
    /// Fields of a literal that embeds a definition stay allowed by it:
    /// they are recorded in a group reserved for the literal, which the
    /// embedded definition closes with. `host` passes that group on to the
    /// bodies of the literal's comprehensions.
    fn add_decls(
        &mut self,
        v: VertexId,
        decls: &'a [Decl],
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        host: Option<GroupId>,
    ) -> Result<()> {
        let embeds = closed.is_none() && decls.iter().any(|d| matches!(d, Decl::Embed(_)));
        let embed = match host {
            Some(id) => Some(id),
            None if embeds => {
                let id = self.new_group();
                let _ = self.reserved_mut(v, id);
                Some(id)
            }
            None => None,
        };
        for decl in decls {
            match decl {
                Decl::Field(field) => {
                    let label = self.label_name(v, &field.label, env, closed)?;
                    let kind = match &field.label {
                        Label::Ident(name) => FieldKind::classify(name, field.optional),
                        _ if field.optional => FieldKind::Optional,
                        _ => FieldKind::Regular,
                    };
                    if let Some(id) = closed {
                        let _ = self.group_mut(v, id).labels.insert(label.clone());
                    }
                    if let Some(id) = embed {
                        let _ = self.reserved_mut(v, id).labels.insert(label.clone());
                    }
                    let arc = self.arc(v, &label, kind);
                    self.push_conjunct(
                        arc,
                        Conjunct {
                            source: Source::Expr(&field.value),
                            env: Rc::clone(env),
                            closed,
                            embed: None,
                            derived: false,
                        },
                    )?;
                }
                Decl::Pattern { label, value } => {
                    if let Some(id) = closed {
                        self.group_mut(v, id).patterns.push((label, Rc::clone(env)));
                    }
                    if let Some(id) = embed {
                        self.reserved_mut(v, id).patterns.push((label, Rc::clone(env)));
                    }
                    self.vertices[v].patterns.push(PatternDecl {
                        label,
                        value,
                        env: Rc::clone(env),
                        closed,
                        label_value: None,
                    });
                }
                Decl::Comprehension(comprehension) => {
                    self.vertices[v].comprehensions.push(PendingComprehension {
                        comprehension,
                        env: Rc::clone(env),
                        closed,
                        embed,
                    });
                }
                Decl::Embed(expr) => self.process_embedded(
                    v,
                    Conjunct {
                        source: Source::Expr(expr),
                        env: Rc::clone(env),
                        closed,
                        embed,
                        derived: true,
                    },
                )?,
                Decl::Ellipsis => {
                    if let Some(id) = closed {
                        self.group_mut(v, id).open = true;
                    }
                    if let Some(id) = embed {
                        self.reserved_mut(v, id).open = true;
                    }
                }
            }
        }
        Ok(())
    }

    fn label_name(
        &mut self,
        v: VertexId,
        label: &'a Label,
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
    ) -> Result<String> {
        match label {
            Label::Ident(name) | Label::Quoted(name) => Ok(name.clone()),
            Label::Interpolated(parts) => {
                let path = self.vertices[v].path.clone();
                match self.interpolate(parts, env, closed, &path)? {
                    Value::String(name) => Ok(name),
                    other => Err(TesseraError::Validation {
                        path: path.to_string(),
                        message: format!("label {other} is not a concrete string"),
                    }),
                }
            }
        }
    }

    fn pattern_label(&mut self, v: VertexId, idx: usize) -> Result<Value> {
        if let Some(value) = &self.vertices[v].patterns[idx].label_value {
            return Ok(value.clone());
        }
        let pattern = &self.vertices[v].patterns[idx];
        let (label, env, closed) = (pattern.label, Rc::clone(&pattern.env), pattern.closed);
        let path = self.vertices[v].path.clone();
        let value = self.eval_expr(label, &env, closed, &path)?;
        self.vertices[v].patterns[idx].label_value = Some(value.clone());
        Ok(value)
    }

    fn apply_patterns(&mut self, v: VertexId) -> Result<()> {
        for idx in 0..self.vertices[v].patterns.len() {
            let label_value = self.pattern_label(v, idx)?;
            let targets: Vec<(String, VertexId)> = self.vertices[v]
                .arcs
                .iter()
                .filter(|a| a.kind.is_data())
                .map(|a| (a.label.clone(), a.vertex))
                .collect();
            for (label, arc) in targets {
                if !self.vertices[v].applied.insert((idx, arc)) {
                    continue;
                }
                if label_matches(&label_value, &label) {
                    let pattern = &self.vertices[v].patterns[idx];
                    let conjunct = Conjunct {
                        source: Source::Expr(pattern.value),
                        env: Rc::clone(&pattern.env),
                        closed: pattern.closed,
                        embed: None,
                        derived: false,
                    };
                    self.push_conjunct(arc, conjunct)?;
                }
            }
        }
        Ok(())
    }

    fn run_comprehension(&mut self, v: VertexId, pending: PendingComprehension<'a>) -> Result<()> {
        let path = self.vertices[v].path.clone();
        let comprehension = pending.comprehension;
        match self.clause_envs(&comprehension.clauses, pending.env, pending.closed, &path)? {
            ClauseOutcome::Incomplete(reason) => {
                tracing::debug!(path = %path, %reason, "comprehension left pending");
                self.vertices[v].pending.push(reason);
            }
            ClauseOutcome::Envs(envs) => {
                for env in envs {
                    let body = Env::child(
                        &env,
                        Frame::Struct {
                            vertex: v,
                            decls: &comprehension.body,
                        },
                    );
                    self.add_decls(v, &comprehension.body, &body, pending.closed, pending.embed)?;
                }
            }
        }
        Ok(())
    }

    fn clause_envs(
        &mut self,
        clauses: &'a [Clause],
        env: Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<ClauseOutcome<'a>> {
        let Some((first, rest)) = clauses.split_first() else {
            return Ok(ClauseOutcome::Envs(vec![env]));
        };
        match first {
            Clause::If(condition) => match self.eval_operand(condition, &env, closed, path)? {
                Value::Bool(true) => self.clause_envs(rest, env, closed, path),
                Value::Bool(false) => Ok(ClauseOutcome::Envs(Vec::new())),
                Value::Incomplete(reason) => Ok(ClauseOutcome::Incomplete(reason)),
                other => Err(TesseraError::Conflict {
                    path: path.to_string(),
                    message: format!("cannot use {other} as condition of if clause"),
                }),
            },
            Clause::For { key, value, source } => {
                let items = match self.iteration_items(source, &env, path)? {
                    Ok(items) => items,
                    Err(reason) => return Ok(ClauseOutcome::Incomplete(reason)),
                };
                let mut envs = Vec::new();
                for (item_key, item) in items {
                    let mut names = Vec::with_capacity(2);
                    if let Some(key) = key {
                        names.push((key.clone(), Binding::Value(item_key)));
                    }
                    names.push((value.clone(), item));
                    let scope = Env::child(&env, Frame::Bindings(names));
                    match self.clause_envs(rest, scope, closed, path)? {
                        ClauseOutcome::Envs(more) => envs.extend(more),
                        incomplete @ ClauseOutcome::Incomplete(_) => return Ok(incomplete),
                    }
                }
                Ok(ClauseOutcome::Envs(envs))
            }
        }
    }

    /// Items a `for` clause iterates, or the reason they are not known yet.
    fn iteration_items(
        &mut self,
        source: &'a Expr,
        env: &Rc<Env<'a>>,
        path: &Selector,
    ) -> Result<std::result::Result<Vec<(Value, Binding)>, String>> {
        let value = match self.resolve(source, env, path)? {
            Resolved::Vertex(w) => {
                self.expand(w)?;
                let vertex = &self.vertices[w];
                if vertex.is_struct && vertex.leaves.is_empty() && vertex.value_leaves.is_empty()
                {
                    return Ok(Ok(vertex
                        .arcs
                        .iter()
                        .filter(|a| a.kind == FieldKind::Regular)
                        .map(|a| (Value::String(a.label.clone()), Binding::Vertex(a.vertex)))
                        .collect()));
                }
                self.evaluate(w)?
            }
            Resolved::Value(value) => value,
        };

        match value.resolved() {
            Value::Struct(s) => Ok(Ok(s
                .regular()
                .map(|(name, v)| (Value::String(name.to_string()), Binding::Value(v.clone())))
                .collect())),
            Value::List(items) => Ok(Ok(items
                .iter()
                .enumerate()
                .map(|(idx, v)| {
                    let idx = i64::try_from(idx).unwrap_or(i64::MAX);
                    (Value::Int(idx), Binding::Value(v.clone()))
                })
                .collect())),
            Value::Incomplete(reason) => Ok(Err(reason.clone())),
            other @ (Value::Top | Value::Constraint(_) | Value::Disjunction(_)) => {
                Ok(Err(format!("cannot range over non-concrete value {other}")))
            }
            other => Err(TesseraError::Conflict {
                path: path.to_string(),
                message: format!("cannot range over {other}"),
            }),
        }
    }

    fn resolve(&mut self, expr: &'a Expr, env: &Rc<Env<'a>>, path: &Selector) -> Result<Resolved> {
        match expr {
            Expr::Ident(name) => self.lookup_ident(name, env, path),
            Expr::Selector(base, field) => {
                let base = self.resolve(base, env, path)?;
                self.select(base, field, path)
            }
            Expr::Index(base, index) => {
                let base = self.resolve(base, env, path)?;
                match self.eval_operand(index, env, None, path)? {
                    Value::String(field) => self.select(base, &field, path),
                    Value::Int(idx) => self.element(base, idx, path),
                    incomplete @ Value::Incomplete(_) => Ok(Resolved::Value(incomplete)),
                    other => Err(TesseraError::Conflict {
                        path: path.to_string(),
                        message: format!("invalid index {other}"),
                    }),
                }
            }
            other => Ok(Resolved::Value(self.eval_expr(other, env, None, path)?)),
        }
    }

    fn lookup_ident(&self, name: &str, env: &Rc<Env<'a>>, path: &Selector) -> Result<Resolved> {
        let mut scope = Some(env);
        while let Some(current) = scope {
            match &current.frame {
                Frame::Bindings(names) => {
                    if let Some((_, binding)) = names.iter().find(|(n, _)| n == name) {
                        return Ok(match binding {
                            Binding::Vertex(id) => Resolved::Vertex(*id),
                            Binding::Value(value) => Resolved::Value(value.clone()),
                        });
                    }
                }
                Frame::Struct { vertex, decls } => {
                    if declares(decls, name) {
                        if let Some(arc) = self.vertices[*vertex].arc(name) {
                            return Ok(Resolved::Vertex(arc));
                        }
                    }
                }
                Frame::Package(root) => {
                    if let Some(arc) = self.vertices[*root].arc(name) {
                        return Ok(Resolved::Vertex(arc));
                    }
                }
            }
            scope = current.parent.as_ref();
        }
        builtin(name)
            .map(Resolved::Value)
            .ok_or_else(|| TesseraError::Conflict {
                path: path.to_string(),
                message: format!("reference \"{name}\" not found"),
            })
    }

    fn select(&mut self, base: Resolved, field: &str, path: &Selector) -> Result<Resolved> {
        let value = match base {
            Resolved::Vertex(w) => {
                self.expand(w)?;
                if let Some(arc) = self.vertices[w].arc(field) {
                    return Ok(Resolved::Vertex(arc));
                }
                self.evaluate(w)?
            }
            Resolved::Value(value) => value,
        };
        match value.resolved() {
            Value::Struct(s) => s
                .get(field)
                .map(|f| Resolved::Value(f.value.clone()))
                .ok_or_else(|| TesseraError::Conflict {
                    path: path.to_string(),
                    message: format!("undefined field: {field}"),
                }),
            incomplete @ Value::Incomplete(_) => Ok(Resolved::Value(incomplete.clone())),
            other @ (Value::Top | Value::Constraint(_) | Value::Disjunction(_)) => {
                Ok(Resolved::Value(Value::Incomplete(format!(
                    "cannot select {field} of non-concrete value {other}"
                ))))
            }
            other => Err(TesseraError::Conflict {
                path: path.to_string(),
                message: format!("cannot select {field} of {other}"),
            }),
        }
    }

    fn element(&mut self, base: Resolved, idx: i64, path: &Selector) -> Result<Resolved> {
        let value = match base {
            Resolved::Vertex(w) => self.evaluate(w)?,
            Resolved::Value(value) => value,
        };
        match value.resolved() {
            Value::List(items) => usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i))
                .map(|item| Resolved::Value(item.clone()))
                .ok_or_else(|| TesseraError::Conflict {
                    path: path.to_string(),
                    message: format!("index {idx} out of range"),
                }),
            incomplete @ Value::Incomplete(_) => Ok(Resolved::Value(incomplete.clone())),
            other => Ok(Resolved::Value(Value::Incomplete(format!(
                "cannot index non-list value {other}"
            )))),
        }
    }

    fn evaluate(&mut self, v: VertexId) -> Result<Value> {
        let path = match &self.vertices[v].evaluation {
            Evaluation::Done(value) => return Ok(value.clone()),
            Evaluation::Failed { path, message } => {
                return Err(TesseraError::Conflict {
                    path: path.clone(),
                    message: message.clone(),
                });
            }
            Evaluation::Running => {
                return Err(TesseraError::Conflict {
                    path: self.vertices[v].path.to_string(),
                    message: "structural cycle".into(),
                });
            }
            Evaluation::Pending => self.vertices[v].path.clone(),
        };
        if self.depth >= self.max_depth {
            return Err(TesseraError::Conflict {
                path: path.to_string(),
                message: format!("structural cycle (nesting deeper than {})", self.max_depth),
            });
        }

        self.depth += 1;
        self.vertices[v].evaluation = Evaluation::Running;
        let result = self.evaluate_vertex(v, &path);
        self.depth -= 1;

        self.vertices[v].evaluation = match &result {
            Ok(value) => Evaluation::Done(value.clone()),
            Err(err) => {
                let (path, message) = replay(err);
                Evaluation::Failed { path, message }
            }
        };
        result
    }

    fn evaluate_vertex(&mut self, v: VertexId, path: &Selector) -> Result<Value> {
        self.expand(v)?;

        let mut value = Value::Top;
        let leaves = self.vertices[v].leaves.clone();
        for leaf in &leaves {
            let Source::Expr(expr) = leaf.source else {
                continue;
            };
            let file = leaf.env.file;
            value = self
                .eval_expr(expr, &leaf.env, leaf.closed, path)
                .and_then(|leaf_value| value.unify(&leaf_value, path))
                .map_err(|e| e.in_file(self.file_name(file)))?;
        }
        let value_leaves = self.vertices[v].value_leaves.clone();
        for (leaf_value, file) in &value_leaves {
            value = value
                .unify(leaf_value, path)
                .map_err(|e| e.in_file(self.file_name(*file)))?;
        }

        if !self.vertices[v].is_struct {
            return Ok(value);
        }

        self.check_closed(v)?;
        let arcs: Vec<(String, FieldKind, VertexId)> = self.vertices[v]
            .arcs
            .iter()
            .map(|a| (a.label.clone(), a.kind, a.vertex))
            .collect();
        let mut fields = Vec::with_capacity(arcs.len());
        for (label, kind, arc) in arcs {
            let child = self.evaluate(arc)?;
            fields.push((label, Field { value: child, kind }));
        }

        let mut patterns = Vec::with_capacity(self.vertices[v].patterns.len());
        for idx in 0..self.vertices[v].patterns.len() {
            let label = self.pattern_label(v, idx)?;
            let pattern = &self.vertices[v].patterns[idx];
            let (expr, env, closed) = (pattern.value, Rc::clone(&pattern.env), pattern.closed);
            let constraint = self.eval_standalone(Source::Expr(expr), &env, closed, path)?;
            patterns.push(Pattern {
                label,
                value: constraint,
            });
        }

        let vertex = &self.vertices[v];
        let strukt = StructValue {
            fields,
            closed: vertex.groups.iter().any(|g| g.active && !g.open),
            patterns,
            pending: vertex.pending.clone(),
        };
        value.unify(&Value::Struct(strukt), path)
    }

    fn check_closed(&mut self, v: VertexId) -> Result<()> {
        let groups: Vec<ClosedGroup<'a>> = self.vertices[v]
            .groups
            .iter()
            .filter(|g| g.active && !g.open)
            .cloned()
            .collect();
        if groups.is_empty() {
            return Ok(());
        }
        let path = self.vertices[v].path.clone();
        let labels: Vec<String> = self.vertices[v]
            .arcs
            .iter()
            .filter(|a| a.kind.is_data())
            .map(|a| a.label.clone())
            .collect();

        for group in groups {
            for label in &labels {
                if group.labels.contains(label) {
                    continue;
                }
                let mut allowed = false;
                for (pattern, env) in &group.patterns {
                    let pattern_value = self.eval_expr(*pattern, env, None, &path)?;
                    if label_matches(&pattern_value, label) {
                        allowed = true;
                        break;
                    }
                }
                if !allowed {
                    return Err(TesseraError::Conflict {
                        path: path.child(label.as_str()).to_string(),
                        message: "field not allowed".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn eval_standalone(
        &mut self,
        source: Source<'a>,
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<Value> {
        let id = self.new_vertex(path.clone(), false);
        self.vertices[id].conjuncts.push(Conjunct {
            source,
            env: Rc::clone(env),
            closed,
            embed: None,
            derived: false,
        });
        self.evaluate(id)
    }

    /// Evaluates a disjunction term or list element in its own vertex.
    fn eval_term(
        &mut self,
        expr: &'a Expr,
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<Value> {
        if expr.is_reference() || matches!(expr, Expr::Struct(_) | Expr::Unify(..)) {
            self.eval_standalone(Source::Expr(expr), env, closed, path)
        } else {
            self.eval_expr(expr, env, closed, path)
        }
    }

    fn eval_expr(
        &mut self,
        expr: &'a Expr,
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<Value> {
        match expr {
            Expr::Top => Ok(Value::Top),
            Expr::Bottom => Err(TesseraError::Conflict {
                path: path.to_string(),
                message: "explicit error (_|_ literal)".into(),
            }),
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Interpolation(parts) => self.interpolate(parts, env, closed, path),
            Expr::Ident(_) | Expr::Selector(..) | Expr::Index(..) => {
                match self.resolve(expr, env, path)? {
                    Resolved::Vertex(w) => self.evaluate(w),
                    Resolved::Value(value) => Ok(value),
                }
            }
            Expr::Struct(_) | Expr::Unify(..) => {
                self.eval_standalone(Source::Expr(expr), env, closed, path)
            }
            Expr::Disjunction(terms) => {
                let mut disjuncts = Vec::with_capacity(terms.len());
                let mut first_error = None;
                for (term, default) in terms {
                    match self.eval_term(term, env, closed, path) {
                        Ok(value) => disjuncts.push(Disjunct {
                            value,
                            default: *default,
                        }),
                        Err(err) => {
                            if first_error.is_none() {
                                first_error = Some(err);
                            }
                        }
                    }
                }
                match (disjuncts.is_empty(), first_error) {
                    (true, Some(err)) => Err(err),
                    _ => Ok(Value::disjunction(disjuncts)),
                }
            }
            Expr::List(elems) => {
                let mut items = Vec::with_capacity(elems.len());
                for elem in elems {
                    match elem {
                        ListElem::Expr(e) => {
                            let item_path = path.index(items.len());
                            items.push(self.eval_term(e, env, closed, &item_path)?);
                        }
                        ListElem::Comprehension(comprehension) => {
                            let envs = match self.clause_envs(
                                &comprehension.clauses,
                                Rc::clone(env),
                                closed,
                                path,
                            )? {
                                ClauseOutcome::Envs(envs) => envs,
                                ClauseOutcome::Incomplete(reason) => {
                                    return Ok(Value::Incomplete(reason));
                                }
                            };
                            for scope in envs {
                                let item_path = path.index(items.len());
                                items.push(self.eval_standalone(
                                    Source::Body(&comprehension.body),
                                    &scope,
                                    closed,
                                    &item_path,
                                )?);
                            }
                        }
                    }
                }
                Ok(Value::List(items))
            }
            Expr::Unary(op, operand) => {
                let value = self.eval_operand(operand, env, closed, path)?;
                if matches!(value, Value::Incomplete(_)) {
                    return Ok(value);
                }
                unary(*op, value, path)
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval_operand(lhs, env, closed, path)?;
                let b = self.eval_operand(rhs, env, closed, path)?;
                match (&a, &b) {
                    (Value::Incomplete(_), _) => Ok(a),
                    (_, Value::Incomplete(_)) => Ok(b),
                    _ => binary(*op, &a, &b, path),
                }
            }
        }
    }

    /// Evaluates an operand, which must be concrete once defaults are applied.
    fn eval_operand(
        &mut self,
        expr: &'a Expr,
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<Value> {
        let value = self.eval_expr(expr, env, closed, path)?;
        let resolved = value.resolved();
        if resolved.kind().is_some() || matches!(resolved, Value::Incomplete(_)) {
            return Ok(resolved.clone());
        }
        Ok(Value::Incomplete(format!("non-concrete value {value}")))
    }

    fn interpolate(
        &mut self,
        parts: &'a [StrPart],
        env: &Rc<Env<'a>>,
        closed: Option<GroupId>,
        path: &Selector,
    ) -> Result<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Lit(text) => out.push_str(text),
                StrPart::Expr(expr) => match self.eval_operand(expr, env, closed, path)? {
                    Value::String(s) => out.push_str(&s),
                    Value::Int(n) => out.push_str(&n.to_string()),
                    Value::Float(f) => out.push_str(&f.to_string()),
                    Value::Bool(b) => out.push_str(&b.to_string()),
                    incomplete @ Value::Incomplete(_) => return Ok(incomplete),
                    other => {
                        return Err(TesseraError::Conflict {
                            path: path.to_string(),
                            message: format!("cannot interpolate {other}"),
                        });
                    }
                },
            }
        }
        Ok(Value::String(out))
    }
}

fn invalid_operands(op: &str, a: &Value, b: &Value, path: &Selector) -> TesseraError {
    TesseraError::Conflict {
        path: path.to_string(),
        message: format!("invalid operands {a} and {b} to '{op}'"),
    }
}

fn unary(op: UnaryOp, value: Value, path: &Selector) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(n)) => {
            n.checked_neg()
                .map(Value::Int)
                .ok_or_else(|| TesseraError::Conflict {
                    path: path.to_string(),
                    message: "integer overflow".into(),
                })
        }
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (
            UnaryOp::Bound(op),
            operand @ (Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)),
        ) => Ok(Value::bound(op, operand)),
        (op, other) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::Bound(b) => b.symbol(),
            };
            Err(TesseraError::Conflict {
                path: path.to_string(),
                message: format!("invalid operand {other} to '{symbol}'"),
            })
        }
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value, path: &Selector) -> Result<Value> {
    let overflow = || TesseraError::Conflict {
        path: path.to_string(),
        message: "integer overflow".into(),
    };
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
            let symbol = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                _ => "*",
            };
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => match op {
                    BinaryOp::Add => x.checked_add(*y),
                    BinaryOp::Sub => x.checked_sub(*y),
                    _ => x.checked_mul(*y),
                }
                .map(Value::Int)
                .ok_or_else(overflow),
                (Value::String(x), Value::String(y)) if op == BinaryOp::Add => {
                    Ok(Value::String(format!("{x}{y}")))
                }
                (Value::List(x), Value::List(y)) if op == BinaryOp::Add => {
                    Ok(Value::List(x.iter().chain(y).cloned().collect()))
                }
                _ => match (a.as_float(), b.as_float()) {
                    (Some(x), Some(y)) => Ok(Value::Float(match op {
                        BinaryOp::Add => x + y,
                        BinaryOp::Sub => x - y,
                        _ => x * y,
                    })),
                    _ => Err(invalid_operands(symbol, a, b, path)),
                },
            }
        }
        BinaryOp::Div => match (a.as_float(), b.as_float()) {
            (Some(_), Some(y)) if y == 0.0 => Err(TesseraError::Conflict {
                path: path.to_string(),
                message: "division by zero".into(),
            }),
            (Some(x), Some(y)) => Ok(Value::Float(x / y)),
            _ => Err(invalid_operands("/", a, b, path)),
        },
        BinaryOp::Eq => Ok(Value::Bool(scalar_equal(a, b))),
        BinaryOp::Ne => Ok(Value::Bool(!scalar_equal(a, b))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (symbol, accept): (&str, fn(std::cmp::Ordering) -> bool) = match op {
                BinaryOp::Lt => ("<", std::cmp::Ordering::is_lt),
                BinaryOp::Le => ("<=", std::cmp::Ordering::is_le),
                BinaryOp::Gt => (">", std::cmp::Ordering::is_gt),
                _ => (">=", std::cmp::Ordering::is_ge),
            };
            compare(a, b)
                .map(|ord| Value::Bool(accept(ord)))
                .ok_or_else(|| invalid_operands(symbol, a, b, path))
        }
        BinaryOp::Match | BinaryOp::NotMatch => match (a, b) {
            (Value::String(text), Value::String(pattern)) => {
                let matched = regex_match(pattern, text, path)?;
                Ok(Value::Bool(matched == (op == BinaryOp::Match)))
            }
            _ => Err(invalid_operands(
                if op == BinaryOp::Match { "=~" } else { "!~" },
                a,
                b,
                path,
            )),
        },
        BinaryOp::And | BinaryOp::Or => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(if op == BinaryOp::And {
                *x && *y
            } else {
                *x || *y
            })),
            _ => Err(invalid_operands(
                if op == BinaryOp::And { "&&" } else { "||" },
                a,
                b,
                path,
            )),
        },
    }
}
