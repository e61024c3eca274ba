//! # Algebra Nodes
//!
//! The relational-algebra tree the planner transforms. An [`AlgNode`] is an
//! operator ([`AlgOp`]), its inputs, its trait set and its output row type. Nodes
//! are immutable values; rules build new nodes instead of editing old ones.
//!
//! ## Logical and physical nodes
//!
//! There is a single operator enum for every convention. A node's convention
//! lives in its trait set: `Convention::None` marks a logical node, anything else
//! a node already implemented in that convention. Conversion rules therefore
//! rewrite a node into the *same* operator with a different convention.
//!
//! ## Row types
//!
//! The output row type is derived when a node is built and kept alongside it.
//! Rebuilding a node with new inputs ([`AlgNode::with_inputs`]) derives it again.
//!
//! ## Digests
//!
//! [`AlgNode::digest`] is a one-line rendering of the whole subtree (operator,
//! arguments, convention and inputs). Two nodes with equal digests compute the
//! same result the same way; the rule engine and the metadata cache key on it.

use crate::entity::EntityHandle;
use crate::rex::{RexNode, ScalarValue};
use crate::traits::{AlgTraitSet, Collation, Convention, DataModel};
use crate::types::{AlgDataType, Field, PolyType, RowType};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with at least one match; right columns are not produced.
    Semi,
    /// Left rows with no match.
    Anti,
}

impl JoinType {
    /// Whether the output carries the right input's columns.
    pub fn projects_right(self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    pub fn generates_nulls_on_left(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }

    pub fn generates_nulls_on_right(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn swap(self) -> Option<JoinType> {
        match self {
            JoinType::Inner => Some(JoinType::Inner),
            JoinType::Left => Some(JoinType::Right),
            JoinType::Right => Some(JoinType::Left),
            JoinType::Full => Some(JoinType::Full),
            JoinType::Semi | JoinType::Anti => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOpKind {
    Union,
    Intersect,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunction {
    Count,
    Sum,
    /// `SUM` that returns 0 instead of `NULL` on empty input.
    Sum0,
    Min,
    Max,
    Avg,
    SingleValue,
}

impl AggFunction {
    pub fn name(self) -> &'static str {
        match self {
            AggFunction::Count => "COUNT",
            AggFunction::Sum => "SUM",
            AggFunction::Sum0 => "$SUM0",
            AggFunction::Min => "MIN",
            AggFunction::Max => "MAX",
            AggFunction::Avg => "AVG",
            AggFunction::SingleValue => "SINGLE_VALUE",
        }
    }
}

/// One aggregate function applied to input fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateCall {
    pub func: AggFunction,
    pub args: Vec<usize>,
    pub distinct: bool,
    pub name: String,
    pub ty: AlgDataType,
}

impl AggregateCall {
    pub fn new(func: AggFunction, args: Vec<usize>, name: impl Into<String>, ty: AlgDataType) -> Self {
        Self {
            func,
            args,
            distinct: false,
            name: name.into(),
            ty,
        }
    }

    pub fn count_star(name: impl Into<String>) -> Self {
        Self::new(
            AggFunction::Count,
            Vec::new(),
            name,
            AlgDataType::scalar(PolyType::BigInt),
        )
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

impl fmt::Display for AggregateCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func.name())?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        let args: Vec<String> = self.args.iter().map(|a| format!("${}", a)).collect();
        write!(f, "{})", args.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifyOperation {
    Insert,
    Update,
    Delete,
    Merge,
}

/// Operator discriminant, used by patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgKind {
    Scan,
    Filter,
    Project,
    Calc,
    Join,
    Aggregate,
    Sort,
    Values,
    SetOp,
    Window,
    TableFunctionScan,
    Unwind,
    Modify,
    Delta,
    Streamer,
    DocumentAggregate,
    DocumentSort,
    DocumentValues,
    Converter,
}

/// An algebra operator and its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum AlgOp {
    /// Read an entity. `filters` and `projects` are pushed into the scan by
    /// scan rules; `projects` of `None` reads every column.
    Scan {
        entity: EntityHandle,
        filters: Vec<RexNode>,
        projects: Option<Vec<usize>>,
    },
    Filter {
        condition: RexNode,
    },
    Project {
        exprs: Vec<RexNode>,
        names: Vec<String>,
    },
    /// Fused filter and project.
    Calc {
        exprs: Vec<RexNode>,
        names: Vec<String>,
        condition: Option<RexNode>,
    },
    Join {
        join_type: JoinType,
        condition: RexNode,
    },
    Aggregate {
        group_set: Vec<usize>,
        calls: Vec<AggregateCall>,
    },
    /// Sort with optional offset and fetch; a sort with an empty collation is a
    /// plain limit.
    Sort {
        collation: Collation,
        offset: Option<usize>,
        fetch: Option<usize>,
    },
    Values {
        tuples: Vec<Vec<ScalarValue>>,
        row_type: RowType,
    },
    SetOp {
        kind: SetOpKind,
        all: bool,
    },
    Window {
        partition: Vec<usize>,
        order: Collation,
        calls: Vec<AggregateCall>,
    },
    TableFunctionScan {
        function: String,
        row_type: RowType,
    },
    /// Flatten the collection in `field` into one row per element.
    Unwind {
        field: usize,
    },
    Modify {
        entity: EntityHandle,
        operation: ModifyOperation,
    },
    /// Turn a relation into the stream of its changes.
    Delta,
    /// Feed each row of the first input to the second (e.g. row-wise inserts).
    Streamer,
    DocumentAggregate {
        group: Option<usize>,
        calls: Vec<AggregateCall>,
    },
    DocumentSort {
        collation: Collation,
        offset: Option<usize>,
        fetch: Option<usize>,
    },
    DocumentValues {
        documents: Vec<serde_json::Value>,
    },
    /// Moves its input from convention `from` into the node's own convention.
    Converter {
        from: Convention,
    },
}

impl AlgOp {
    pub fn kind(&self) -> AlgKind {
        match self {
            AlgOp::Scan { .. } => AlgKind::Scan,
            AlgOp::Filter { .. } => AlgKind::Filter,
            AlgOp::Project { .. } => AlgKind::Project,
            AlgOp::Calc { .. } => AlgKind::Calc,
            AlgOp::Join { .. } => AlgKind::Join,
            AlgOp::Aggregate { .. } => AlgKind::Aggregate,
            AlgOp::Sort { .. } => AlgKind::Sort,
            AlgOp::Values { .. } => AlgKind::Values,
            AlgOp::SetOp { .. } => AlgKind::SetOp,
            AlgOp::Window { .. } => AlgKind::Window,
            AlgOp::TableFunctionScan { .. } => AlgKind::TableFunctionScan,
            AlgOp::Unwind { .. } => AlgKind::Unwind,
            AlgOp::Modify { .. } => AlgKind::Modify,
            AlgOp::Delta => AlgKind::Delta,
            AlgOp::Streamer => AlgKind::Streamer,
            AlgOp::DocumentAggregate { .. } => AlgKind::DocumentAggregate,
            AlgOp::DocumentSort { .. } => AlgKind::DocumentSort,
            AlgOp::DocumentValues { .. } => AlgKind::DocumentValues,
            AlgOp::Converter { .. } => AlgKind::Converter,
        }
    }

    fn describe(&self) -> String {
        fn list<T: fmt::Display>(items: &[T]) -> String {
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
        match self {
            AlgOp::Scan {
                entity,
                filters,
                projects,
            } => {
                let mut s = format!("Scan(entity=[{}]", entity.name());
                if let Some(p) = entity.placement() {
                    s.push_str(&format!(", placement=[{}]", p));
                }
                if !filters.is_empty() {
                    s.push_str(&format!(", filters=[{}]", list(filters)));
                }
                if let Some(projects) = projects {
                    s.push_str(&format!(", projects=[{}]", list(projects)));
                }
                s.push(')');
                s
            }
            AlgOp::Filter { condition } => format!("Filter(condition=[{}])", condition),
            AlgOp::Project { exprs, names } => {
                let items: Vec<String> = names
                    .iter()
                    .zip(exprs)
                    .map(|(n, e)| format!("{}=[{}]", n, e))
                    .collect();
                format!("Project({})", items.join(", "))
            }
            AlgOp::Calc {
                exprs, condition, ..
            } => match condition {
                Some(c) => format!("Calc(exprs=[{}], condition=[{}])", list(exprs), c),
                None => format!("Calc(exprs=[{}])", list(exprs)),
            },
            AlgOp::Join {
                join_type,
                condition,
            } => format!("Join(type={:?}, condition=[{}])", join_type, condition),
            AlgOp::Aggregate { group_set, calls } => {
                format!("Aggregate(group=[{}], calls=[{}])", list(group_set), list(calls))
            }
            AlgOp::Sort {
                collation,
                offset,
                fetch,
            }
            | AlgOp::DocumentSort {
                collation,
                offset,
                fetch,
            } => {
                let name = if matches!(self, AlgOp::Sort { .. }) {
                    "Sort"
                } else {
                    "DocumentSort"
                };
                format!(
                    "{}(collation={}, offset={:?}, fetch={:?})",
                    name, collation, offset, fetch
                )
            }
            AlgOp::Values { tuples, .. } => {
                let rows: Vec<String> = tuples.iter().map(|t| format!("({})", list(t))).collect();
                format!("Values({})", rows.join(", "))
            }
            AlgOp::SetOp { kind, all } => format!("{:?}(all={})", kind, all),
            AlgOp::Window {
                partition,
                order,
                calls,
            } => format!(
                "Window(partition=[{}], order={}, calls=[{}])",
                list(partition),
                order,
                list(calls)
            ),
            AlgOp::TableFunctionScan { function, .. } => {
                format!("TableFunctionScan(function=[{}])", function)
            }
            AlgOp::Unwind { field } => format!("Unwind(field=${})", field),
            AlgOp::Modify { entity, operation } => {
                format!("Modify(entity=[{}], operation={:?})", entity.name(), operation)
            }
            AlgOp::Delta => "Delta".to_string(),
            AlgOp::Streamer => "Streamer".to_string(),
            AlgOp::DocumentAggregate { group, calls } => {
                format!("DocumentAggregate(group={:?}, calls=[{}])", group, list(calls))
            }
            AlgOp::DocumentValues { documents } => {
                format!("DocumentValues({})", list(documents))
            }
            AlgOp::Converter { from } => format!("Converter(from={})", from),
        }
    }
}

/// A node of the algebra tree; see the module docs.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgNode {
    op: AlgOp,
    inputs: Vec<AlgNode>,
    traits: AlgTraitSet,
    row_type: RowType,
}

impl AlgNode {
    /// Build a node, deriving its row type. The data model is taken from the
    /// scanned entity for leaves and from the first input otherwise.
    pub fn new(op: AlgOp, inputs: Vec<AlgNode>, traits: AlgTraitSet) -> Self {
        let row_type = derive_row_type(&op, &inputs);
        Self {
            op,
            inputs,
            traits,
            row_type,
        }
    }

    fn logical(op: AlgOp, inputs: Vec<AlgNode>) -> Self {
        let model = match &op {
            AlgOp::Scan { entity, .. } | AlgOp::Modify { entity, .. } => entity.data_model(),
            AlgOp::DocumentAggregate { .. }
            | AlgOp::DocumentSort { .. }
            | AlgOp::DocumentValues { .. } => DataModel::Document,
            _ => inputs.first().map(|i| i.traits.model).unwrap_or_default(),
        };
        Self::new(op, inputs, AlgTraitSet::logical().replace_model(model))
    }

    pub fn scan(entity: EntityHandle) -> Self {
        Self::logical(
            AlgOp::Scan {
                entity,
                filters: Vec::new(),
                projects: None,
            },
            Vec::new(),
        )
    }

    pub fn filter(input: AlgNode, condition: RexNode) -> Self {
        Self::logical(AlgOp::Filter { condition }, vec![input])
    }

    pub fn project(input: AlgNode, exprs: Vec<RexNode>, names: Vec<String>) -> Self {
        Self::logical(AlgOp::Project { exprs, names }, vec![input])
    }

    /// Project that keeps the input fields at `indexes`, with their names.
    pub fn project_fields(input: AlgNode, indexes: &[usize]) -> Self {
        let fields = input.row_type.fields();
        let (exprs, names) = indexes
            .iter()
            .filter_map(|&i| fields.get(i))
            .map(|f| (RexNode::input_ref(f.index, f.ty.clone()), f.name.clone()))
            .unzip();
        Self::project(input, exprs, names)
    }

    pub fn calc(
        input: AlgNode,
        exprs: Vec<RexNode>,
        names: Vec<String>,
        condition: Option<RexNode>,
    ) -> Self {
        Self::logical(
            AlgOp::Calc {
                exprs,
                names,
                condition,
            },
            vec![input],
        )
    }

    pub fn join(left: AlgNode, right: AlgNode, join_type: JoinType, condition: RexNode) -> Self {
        Self::logical(
            AlgOp::Join {
                join_type,
                condition,
            },
            vec![left, right],
        )
    }

    pub fn aggregate(input: AlgNode, group_set: Vec<usize>, calls: Vec<AggregateCall>) -> Self {
        Self::logical(AlgOp::Aggregate { group_set, calls }, vec![input])
    }

    pub fn sort(
        input: AlgNode,
        collation: Collation,
        offset: Option<usize>,
        fetch: Option<usize>,
    ) -> Self {
        let traits_collation = collation.clone();
        let mut node = Self::logical(
            AlgOp::Sort {
                collation,
                offset,
                fetch,
            },
            vec![input],
        );
        node.traits.collation = traits_collation;
        node
    }

    pub fn values(row_type: RowType, tuples: Vec<Vec<ScalarValue>>) -> Self {
        Self::logical(AlgOp::Values { tuples, row_type }, Vec::new())
    }

    pub fn set_op(kind: SetOpKind, all: bool, inputs: Vec<AlgNode>) -> Self {
        Self::logical(AlgOp::SetOp { kind, all }, inputs)
    }

    pub fn window(
        input: AlgNode,
        partition: Vec<usize>,
        order: Collation,
        calls: Vec<AggregateCall>,
    ) -> Self {
        Self::logical(
            AlgOp::Window {
                partition,
                order,
                calls,
            },
            vec![input],
        )
    }

    pub fn table_function_scan(function: impl Into<String>, row_type: RowType) -> Self {
        Self::logical(
            AlgOp::TableFunctionScan {
                function: function.into(),
                row_type,
            },
            Vec::new(),
        )
    }

    pub fn unwind(input: AlgNode, field: usize) -> Self {
        Self::logical(AlgOp::Unwind { field }, vec![input])
    }

    pub fn modify(input: AlgNode, entity: EntityHandle, operation: ModifyOperation) -> Self {
        Self::logical(AlgOp::Modify { entity, operation }, vec![input])
    }

    pub fn delta(input: AlgNode) -> Self {
        Self::logical(AlgOp::Delta, vec![input])
    }

    pub fn streamer(provider: AlgNode, collector: AlgNode) -> Self {
        Self::logical(AlgOp::Streamer, vec![provider, collector])
    }

    pub fn document_aggregate(input: AlgNode, group: Option<usize>, calls: Vec<AggregateCall>) -> Self {
        Self::logical(AlgOp::DocumentAggregate { group, calls }, vec![input])
    }

    pub fn document_sort(
        input: AlgNode,
        collation: Collation,
        offset: Option<usize>,
        fetch: Option<usize>,
    ) -> Self {
        Self::logical(
            AlgOp::DocumentSort {
                collation,
                offset,
                fetch,
            },
            vec![input],
        )
    }

    pub fn document_values(documents: Vec<serde_json::Value>) -> Self {
        Self::logical(AlgOp::DocumentValues { documents }, Vec::new())
    }

    /// Converter from `input`'s convention into `to`.
    pub fn converter(input: AlgNode, to: Convention) -> Self {
        let traits = input.traits.replace_convention(to);
        let from = input.convention();
        Self::new(AlgOp::Converter { from }, vec![input], traits)
    }

    pub fn op(&self) -> &AlgOp {
        &self.op
    }

    pub fn kind(&self) -> AlgKind {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[AlgNode] {
        &self.inputs
    }

    pub fn input(&self, i: usize) -> Option<&AlgNode> {
        self.inputs.get(i)
    }

    pub fn traits(&self) -> &AlgTraitSet {
        &self.traits
    }

    pub fn convention(&self) -> Convention {
        self.traits.convention()
    }

    pub fn is_logical(&self) -> bool {
        self.convention() == Convention::None
    }

    pub fn row_type(&self) -> &RowType {
        &self.row_type
    }

    /// Same operator and traits over new inputs.
    pub fn with_inputs(&self, inputs: Vec<AlgNode>) -> Self {
        Self::new(self.op.clone(), inputs, self.traits.clone())
    }

    /// Same operator and inputs with a new operator payload.
    pub fn with_op(&self, op: AlgOp) -> Self {
        Self::new(op, self.inputs.clone(), self.traits.clone())
    }

    pub fn with_traits(mut self, traits: AlgTraitSet) -> Self {
        self.traits = traits;
        self
    }

    pub fn with_convention(mut self, convention: Convention) -> Self {
        self.traits = self.traits.replace_convention(convention);
        self
    }

    /// Number of nodes in the subtree.
    pub fn node_count(&self) -> usize {
        1 + self.inputs.iter().map(AlgNode::node_count).sum::<usize>()
    }

    /// Pre-order search for the first node satisfying `predicate`.
    pub fn find(&self, predicate: &dyn Fn(&AlgNode) -> bool) -> Option<&AlgNode> {
        if predicate(self) {
            return Some(self);
        }
        self.inputs.iter().find_map(|i| i.find(predicate))
    }

    /// One-line identity of the subtree. Covers the full trait set and, for
    /// leaves, the row type, so that two scans of one entity through different
    /// handles never share a digest.
    pub fn digest(&self) -> String {
        let mut s = format!("{}.{}", self.op.describe(), self.traits);
        match &self.op {
            AlgOp::Scan { entity, .. } => {
                s.push_str(&format!("<{}>", entity.row_type()));
                if let Some(rows) = entity.row_count_override() {
                    s.push_str(&format!("<rows={}>", rows));
                }
            }
            _ if self.inputs.is_empty() => s.push_str(&format!("<{}>", self.row_type())),
            _ => {}
        }
        if !self.inputs.is_empty() {
            let inputs: Vec<String> = self.inputs.iter().map(AlgNode::digest).collect();
            s.push_str(&format!("[{}]", inputs.join(", ")));
        }
        s
    }

    /// Indented multi-line rendering, one node per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{}.{}\n", self.op.describe(), self.convention()));
        for input in &self.inputs {
            input.explain_into(out, depth + 1);
        }
    }
}

impl fmt::Display for AlgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest())
    }
}

fn input_row(inputs: &[AlgNode], i: usize) -> RowType {
    inputs
        .get(i)
        .map(|n| n.row_type.clone())
        .unwrap_or_else(RowType::empty)
}

fn named(exprs: &[RexNode], names: &[String]) -> RowType {
    let fields = exprs
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let name = names.get(i).cloned().unwrap_or_else(|| format!("${}", i));
            Field::new(name, i, e.ty().clone())
        })
        .collect();
    RowType::new(fields)
}

fn nullable_fields(row: &RowType) -> Vec<Field> {
    row.fields()
        .iter()
        .map(|f| Field::new(f.name.clone(), f.index, f.ty.with_nullable(true)))
        .collect()
}

fn with_calls(mut fields: Vec<Field>, calls: &[AggregateCall]) -> RowType {
    for call in calls {
        fields.push(Field::new(call.name.clone(), fields.len(), call.ty.clone()));
    }
    RowType::new(fields)
}

fn derive_row_type(op: &AlgOp, inputs: &[AlgNode]) -> RowType {
    match op {
        AlgOp::Scan {
            entity, projects, ..
        } => match projects {
            Some(p) => entity.row_type().project(p),
            None => entity.row_type().clone(),
        },
        AlgOp::Filter { .. }
        | AlgOp::Sort { .. }
        | AlgOp::DocumentSort { .. }
        | AlgOp::SetOp { .. }
        | AlgOp::Delta
        | AlgOp::Converter { .. } => input_row(inputs, 0),
        AlgOp::Project { exprs, names } | AlgOp::Calc { exprs, names, .. } => named(exprs, names),
        AlgOp::Join { join_type, .. } => {
            let left = input_row(inputs, 0);
            if !join_type.projects_right() {
                return left;
            }
            let right = input_row(inputs, 1);
            let left_fields = if join_type.generates_nulls_on_left() {
                nullable_fields(&left)
            } else {
                left.fields().to_vec()
            };
            let right_fields = if join_type.generates_nulls_on_right() {
                nullable_fields(&right)
            } else {
                right.fields().to_vec()
            };
            RowType::new(left_fields.into_iter().chain(right_fields).collect())
        }
        AlgOp::Aggregate { group_set, calls } => {
            let input = input_row(inputs, 0);
            with_calls(input.project(group_set).fields().to_vec(), calls)
        }
        AlgOp::Window { calls, .. } => with_calls(input_row(inputs, 0).fields().to_vec(), calls),
        AlgOp::Values { row_type, .. } | AlgOp::TableFunctionScan { row_type, .. } => {
            row_type.clone()
        }
        AlgOp::Unwind { field } => {
            let input = input_row(inputs, 0);
            let fields = input
                .fields()
                .iter()
                .map(|f| match (f.index == *field, f.ty.component()) {
                    (true, Some(component)) => Field::new(f.name.clone(), f.index, component.clone()),
                    _ => f.clone(),
                })
                .collect();
            RowType::new(fields)
        }
        AlgOp::Modify { .. } => RowType::builder()
            .add("ROWCOUNT", AlgDataType::scalar(PolyType::BigInt))
            .build(),
        AlgOp::Streamer => input_row(inputs, 1),
        AlgOp::DocumentAggregate { calls, .. } => with_calls(
            vec![Field::new("_id", 0, AlgDataType::nullable_scalar(PolyType::Document))],
            calls,
        ),
        AlgOp::DocumentValues { .. } => RowType::builder()
            .add("d", AlgDataType::scalar(PolyType::Document))
            .build(),
    }
}
