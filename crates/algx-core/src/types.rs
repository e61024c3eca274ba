//! # Algebra Type System
//!
//! The engine-side type universe that every algebra node and expression is typed
//! in. It is independent of the host runtime's value types; the `bridge` module
//! converts between the two.
//!
//! ## Scalar Kinds
//!
//! [`PolyType`] enumerates the built-in scalar kinds plus the structural kinds
//! (array, multiset, map, row). Kinds are grouped into [`TypeFamily`]s, which is
//! what most consumers actually branch on.
//!
//! ## Row Types
//!
//! A [`RowType`] is an ordered list of named, typed fields. It comes in two
//! flavours:
//!
//! - **Static**: the field list is fixed when the row type is built and never
//!   changes. This is the only flavour an entity may expose to the optimizer.
//! - **Dynamic**: open-ended; referencing an unknown field name adds it (typed
//!   `ANY`). Dynamic row types are snapshotted to static ones with
//!   [`RowType::to_static`] before lowering.
//!
//! Row types are cheap to clone: the field list sits behind an `Arc`, so copies
//! of an entity handle share the schema.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Built-in type kinds of the algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolyType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Float,
    Real,
    Double,
    Date,
    Time,
    TimeWithLocalTimeZone,
    Timestamp,
    TimestampWithLocalTimeZone,
    IntervalYearMonth,
    IntervalDaySecond,
    Char,
    Varchar,
    Binary,
    Varbinary,
    Json,
    Document,
    Graph,
    Node,
    Edge,
    Path,
    Geometry,
    File,
    Image,
    Video,
    Audio,
    Symbol,
    Any,
    Null,
    Cursor,
    ColumnList,
    Array,
    Multiset,
    Map,
    Row,
}

/// Coarse grouping of [`PolyType`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeFamily {
    Boolean,
    ExactNumeric,
    ApproximateNumeric,
    Temporal,
    Interval,
    Character,
    Binary,
    Document,
    Graph,
    Spatial,
    Multimedia,
    Symbol,
    Any,
    Null,
    Cursor,
    Collection,
    Struct,
}

impl PolyType {
    pub fn family(self) -> TypeFamily {
        use PolyType::*;
        match self {
            Boolean => TypeFamily::Boolean,
            TinyInt | SmallInt | Integer | BigInt | Decimal => TypeFamily::ExactNumeric,
            Float | Real | Double => TypeFamily::ApproximateNumeric,
            Date | Time | TimeWithLocalTimeZone | Timestamp | TimestampWithLocalTimeZone => {
                TypeFamily::Temporal
            }
            IntervalYearMonth | IntervalDaySecond => TypeFamily::Interval,
            Char | Varchar | Json => TypeFamily::Character,
            Binary | Varbinary => TypeFamily::Binary,
            Document => TypeFamily::Document,
            Graph | Node | Edge | Path => TypeFamily::Graph,
            Geometry => TypeFamily::Spatial,
            File | Image | Video | Audio => TypeFamily::Multimedia,
            Symbol => TypeFamily::Symbol,
            Any => TypeFamily::Any,
            Null => TypeFamily::Null,
            Cursor | ColumnList => TypeFamily::Cursor,
            Array | Multiset | Map => TypeFamily::Collection,
            Row => TypeFamily::Struct,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self.family(),
            TypeFamily::ExactNumeric | TypeFamily::ApproximateNumeric
        )
    }

    pub fn name(self) -> &'static str {
        use PolyType::*;
        match self {
            Boolean => "BOOLEAN",
            TinyInt => "TINYINT",
            SmallInt => "SMALLINT",
            Integer => "INTEGER",
            BigInt => "BIGINT",
            Decimal => "DECIMAL",
            Float => "FLOAT",
            Real => "REAL",
            Double => "DOUBLE",
            Date => "DATE",
            Time => "TIME",
            TimeWithLocalTimeZone => "TIME_WITH_LOCAL_TIME_ZONE",
            Timestamp => "TIMESTAMP",
            TimestampWithLocalTimeZone => "TIMESTAMP_WITH_LOCAL_TIME_ZONE",
            IntervalYearMonth => "INTERVAL_YEAR_MONTH",
            IntervalDaySecond => "INTERVAL_DAY_SECOND",
            Char => "CHAR",
            Varchar => "VARCHAR",
            Binary => "BINARY",
            Varbinary => "VARBINARY",
            Json => "JSON",
            Document => "DOCUMENT",
            Graph => "GRAPH",
            Node => "NODE",
            Edge => "EDGE",
            Path => "PATH",
            Geometry => "GEOMETRY",
            File => "FILE",
            Image => "IMAGE",
            Video => "VIDEO",
            Audio => "AUDIO",
            Symbol => "SYMBOL",
            Any => "ANY",
            Null => "NULL",
            Cursor => "CURSOR",
            ColumnList => "COLUMN_LIST",
            Array => "ARRAY",
            Multiset => "MULTISET",
            Map => "MAP",
            Row => "ROW",
        }
    }
}

impl fmt::Display for PolyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type in the algebra.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlgDataType {
    Scalar {
        kind: PolyType,
        nullable: bool,
        precision: Option<u32>,
        scale: Option<u32>,
    },
    /// Array; `max_cardinality` is -1 when unbounded.
    Array {
        component: Box<AlgDataType>,
        max_cardinality: i64,
        nullable: bool,
    },
    Multiset {
        component: Box<AlgDataType>,
        nullable: bool,
    },
    Map {
        key: Box<AlgDataType>,
        value: Box<AlgDataType>,
        nullable: bool,
    },
    Record {
        row: RowType,
        nullable: bool,
    },
}

impl AlgDataType {
    /// Non-nullable scalar of the given kind.
    pub fn scalar(kind: PolyType) -> Self {
        AlgDataType::Scalar {
            kind,
            nullable: false,
            precision: None,
            scale: None,
        }
    }

    pub fn nullable_scalar(kind: PolyType) -> Self {
        AlgDataType::scalar(kind).with_nullable(true)
    }

    pub fn varchar(precision: u32) -> Self {
        AlgDataType::Scalar {
            kind: PolyType::Varchar,
            nullable: true,
            precision: Some(precision),
            scale: None,
        }
    }

    pub fn decimal(precision: u32, scale: u32) -> Self {
        AlgDataType::Scalar {
            kind: PolyType::Decimal,
            nullable: true,
            precision: Some(precision),
            scale: Some(scale),
        }
    }

    /// The general-purpose nullable `ANY` type.
    pub fn any() -> Self {
        AlgDataType::nullable_scalar(PolyType::Any)
    }

    pub fn array(component: AlgDataType, max_cardinality: i64) -> Self {
        AlgDataType::Array {
            component: Box::new(component),
            max_cardinality,
            nullable: false,
        }
    }

    pub fn multiset(component: AlgDataType) -> Self {
        AlgDataType::Multiset {
            component: Box::new(component),
            nullable: false,
        }
    }

    pub fn map(key: AlgDataType, value: AlgDataType) -> Self {
        AlgDataType::Map {
            key: Box::new(key),
            value: Box::new(value),
            nullable: false,
        }
    }

    pub fn record(row: RowType) -> Self {
        AlgDataType::Record {
            row,
            nullable: false,
        }
    }

    pub fn poly_type(&self) -> PolyType {
        match self {
            AlgDataType::Scalar { kind, .. } => *kind,
            AlgDataType::Array { .. } => PolyType::Array,
            AlgDataType::Multiset { .. } => PolyType::Multiset,
            AlgDataType::Map { .. } => PolyType::Map,
            AlgDataType::Record { .. } => PolyType::Row,
        }
    }

    pub fn family(&self) -> TypeFamily {
        self.poly_type().family()
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            AlgDataType::Scalar { nullable, .. }
            | AlgDataType::Array { nullable, .. }
            | AlgDataType::Multiset { nullable, .. }
            | AlgDataType::Map { nullable, .. }
            | AlgDataType::Record { nullable, .. } => *nullable,
        }
    }

    /// Copy of this type with the given nullability.
    pub fn with_nullable(&self, nullable: bool) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            AlgDataType::Scalar { nullable: n, .. }
            | AlgDataType::Array { nullable: n, .. }
            | AlgDataType::Multiset { nullable: n, .. }
            | AlgDataType::Map { nullable: n, .. }
            | AlgDataType::Record { nullable: n, .. } => *n = nullable,
        }
        copy
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, AlgDataType::Record { .. })
    }

    pub fn row(&self) -> Option<&RowType> {
        match self {
            AlgDataType::Record { row, .. } => Some(row),
            _ => None,
        }
    }

    pub fn field_count(&self) -> usize {
        self.row().map(RowType::field_count).unwrap_or(0)
    }

    pub fn precision(&self) -> Option<u32> {
        match self {
            AlgDataType::Scalar { precision, .. } => *precision,
            _ => None,
        }
    }

    pub fn component(&self) -> Option<&AlgDataType> {
        match self {
            AlgDataType::Array { component, .. } | AlgDataType::Multiset { component, .. } => {
                Some(component)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AlgDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgDataType::Scalar {
                kind,
                precision,
                scale,
                ..
            } => {
                write!(f, "{}", kind)?;
                match (precision, scale) {
                    (Some(p), Some(s)) => write!(f, "({}, {})", p, s)?,
                    (Some(p), None) => write!(f, "({})", p)?,
                    _ => {}
                }
            }
            AlgDataType::Array {
                component,
                max_cardinality,
                ..
            } => {
                write!(f, "{} ARRAY", component)?;
                if *max_cardinality >= 0 {
                    write!(f, "({})", max_cardinality)?;
                }
            }
            AlgDataType::Multiset { component, .. } => write!(f, "{} MULTISET", component)?,
            AlgDataType::Map { key, value, .. } => write!(f, "MAP<{}, {}>", key, value)?,
            AlgDataType::Record { row, .. } => write!(f, "{}", row)?,
        }
        if !self.is_nullable() {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// A named, positioned field of a row type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub index: usize,
    pub ty: AlgDataType,
}

impl Field {
    pub fn new(name: impl Into<String>, index: usize, ty: AlgDataType) -> Self {
        Self {
            name: name.into(),
            index,
            ty,
        }
    }
}

enum RowRepr {
    Static {
        fields: Arc<[Field]>,
        origin: Option<String>,
    },
    Dynamic(RwLock<Arc<[Field]>>),
}

/// Ordered, named, typed fields; see the module docs for static vs. dynamic.
#[derive(Clone)]
pub struct RowType {
    repr: Arc<RowRepr>,
}

impl RowType {
    /// Static row type from a field list. Field indexes are renumbered by position.
    pub fn new(fields: Vec<Field>) -> Self {
        Self::build(fields, None)
    }

    /// Static row type that remembers the host class it was reflected from.
    pub fn with_origin(fields: Vec<Field>, origin: impl Into<String>) -> Self {
        Self::build(fields, Some(origin.into()))
    }

    fn build(fields: Vec<Field>, origin: Option<String>) -> Self {
        let fields: Vec<Field> = fields
            .into_iter()
            .enumerate()
            .map(|(i, f)| Field::new(f.name, i, f.ty))
            .collect();
        Self {
            repr: Arc::new(RowRepr::Static {
                fields: fields.into(),
                origin,
            }),
        }
    }

    /// Open-ended row type, seeded with `fields`.
    pub fn dynamic(fields: Vec<Field>) -> Self {
        let fields: Vec<Field> = fields
            .into_iter()
            .enumerate()
            .map(|(i, f)| Field::new(f.name, i, f.ty))
            .collect();
        Self {
            repr: Arc::new(RowRepr::Dynamic(RwLock::new(fields.into()))),
        }
    }

    pub fn builder() -> RowTypeBuilder {
        RowTypeBuilder::default()
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(*self.repr, RowRepr::Dynamic(_))
    }

    /// Snapshot of the field list.
    pub fn fields(&self) -> Arc<[Field]> {
        match &*self.repr {
            RowRepr::Static { fields, .. } => Arc::clone(fields),
            RowRepr::Dynamic(lock) => Arc::clone(&lock.read()),
        }
    }

    pub fn field_count(&self) -> usize {
        self.fields().len()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields().iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, index: usize) -> Option<Field> {
        self.fields().get(index).cloned()
    }

    pub fn field_by_name(&self, name: &str) -> Option<Field> {
        self.fields().iter().find(|f| f.name == name).cloned()
    }

    /// Host class this row type was reflected from, if any.
    pub fn origin(&self) -> Option<&str> {
        match &*self.repr {
            RowRepr::Static { origin, .. } => origin.as_deref(),
            RowRepr::Dynamic(_) => None,
        }
    }

    /// Look a field up by name; on a dynamic row type an unknown name is added as
    /// a nullable `ANY` field. Static row types return `None` for unknown names.
    pub fn field_or_add(&self, name: &str) -> Option<Field> {
        match &*self.repr {
            RowRepr::Static { .. } => self.field_by_name(name),
            RowRepr::Dynamic(lock) => {
                if let Some(f) = lock.read().iter().find(|f| f.name == name) {
                    return Some(f.clone());
                }
                let mut guard = lock.write();
                let mut fields: Vec<Field> = guard.iter().cloned().collect();
                let field = Field::new(name, fields.len(), AlgDataType::any());
                fields.push(field.clone());
                *guard = fields.into();
                Some(field)
            }
        }
    }

    /// Immutable snapshot. Static row types are returned as-is (shared).
    pub fn to_static(&self) -> RowType {
        match &*self.repr {
            RowRepr::Static { .. } => self.clone(),
            RowRepr::Dynamic(lock) => RowType::new(lock.read().to_vec()),
        }
    }

    /// Whether both handles point at the same field storage.
    pub fn ptr_eq(&self, other: &RowType) -> bool {
        Arc::ptr_eq(&self.repr, &other.repr)
    }

    /// New static row type with `extra` appended.
    pub fn extend(&self, extra: Vec<Field>) -> RowType {
        let mut fields: Vec<Field> = self.fields().to_vec();
        fields.extend(extra);
        RowType::new(fields)
    }

    /// Concatenation of two row types (e.g. the output of a join).
    pub fn concat(left: &RowType, right: &RowType) -> RowType {
        left.extend(right.fields().to_vec())
    }

    /// New static row type keeping only the fields at `indexes`, in that order.
    pub fn project(&self, indexes: &[usize]) -> RowType {
        let fields = self.fields();
        RowType::new(
            indexes
                .iter()
                .filter_map(|&i| fields.get(i).cloned())
                .collect(),
        )
    }
}

impl PartialEq for RowType {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.is_dynamic() == other.is_dynamic()
            && self.origin() == other.origin()
            && self.fields() == other.fields()
    }
}

impl Eq for RowType {}

impl Hash for RowType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_dynamic().hash(state);
        self.origin().hash(state);
        self.fields().hash(state);
    }
}

impl fmt::Debug for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dynamic() {
            write!(f, "DynamicRecord")?;
        } else if let Some(origin) = self.origin() {
            write!(f, "{}", origin)?;
        } else {
            write!(f, "RecordType")?;
        }
        write!(f, "(")?;
        for (i, field) in self.fields().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", field.ty, field.name)?;
        }
        write!(f, ")")
    }
}

/// Accumulates fields for a static row type.
#[derive(Debug, Default)]
pub struct RowTypeBuilder {
    fields: Vec<Field>,
}

impl RowTypeBuilder {
    pub fn add(mut self, name: impl Into<String>, ty: AlgDataType) -> Self {
        let index = self.fields.len();
        self.fields.push(Field::new(name, index, ty));
        self
    }

    pub fn add_field(self, field: &Field) -> Self {
        self.add(field.name.clone(), field.ty.clone())
    }

    pub fn build(self) -> RowType {
        RowType::new(self.fields)
    }
}
