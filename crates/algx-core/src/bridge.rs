//! # Type Bridge
//!
//! Converts between the host runtime's value types ([`HostType`]) and the
//! algebra's type system ([`AlgDataType`]).
//!
//! ## Host → Algebra
//!
//! - Primitives map to non-nullable scalar kinds, their boxed counterparts to the
//!   same kinds made nullable, through a fixed lookup table.
//! - Arrays and maps carry the nullability of their component / key / value
//!   independently of the container's own nullability.
//! - Classes with no table entry are treated as structs: their non-static member
//!   fields are reflected recursively into a record type that remembers the class
//!   it came from. Self-referential class graphs are cut by a visited set; the
//!   back edge is typed `ANY`.
//!
//! ## Algebra → Host
//!
//! - Records built from a class echo that class. Other records are turned into a
//!   synthetic record type, canonicalized by the ordered `(host type, nullable)`
//!   sequence of its fields, so structurally identical shapes yield the *same*
//!   object. The zero-field shape is the `Unit` singleton.
//! - Scalars follow a deliberately lossy dispatch table onto [`ValueCategory`]:
//!   every numeric kind becomes `Number`, every temporal kind `Temporal`, and so
//!   on. Kinds with no mapping return `None`; callers fall back to
//!   [`ValueCategory::Value`].
//!
//! The synthetic registry belongs to one bridge instance (one planning session)
//! and is dropped with it.

use crate::types::{AlgDataType, Field, PolyType, RowType};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Host primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

/// Host-side value categories used for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueCategory {
    Boolean,
    Number,
    Temporal,
    Interval,
    String,
    Binary,
    Symbol,
    List,
    Map,
    Document,
    Graph,
    Node,
    Edge,
    Path,
    Geometry,
    Blob,
    /// The most general category; the fallback for unmapped types.
    Value,
}

/// A type in the host runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    Primitive(Primitive),
    Boxed(Primitive),
    String,
    Decimal,
    ByteString,
    Date,
    Time,
    Timestamp,
    /// The root object type.
    Object,
    /// Untyped list class.
    List,
    /// Untyped map class.
    Map,
    /// Native host array.
    NativeArray(Box<HostType>),
    /// Array with declared component nullability and cardinality.
    Array {
        component: Box<HostType>,
        component_nullable: bool,
        max_cardinality: i64,
    },
    /// Map with declared key and value nullability.
    MapOf {
        key: Box<HostType>,
        key_nullable: bool,
        value: Box<HostType>,
        value_nullable: bool,
    },
    /// A reflected class, by name; see [`HostClass`].
    Class(String),
    Synthetic(SyntheticRef),
    Unit,
    Category(ValueCategory),
}

impl HostType {
    pub fn is_primitive(&self) -> bool {
        matches!(self, HostType::Primitive(_))
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Primitive(p) => write!(f, "{:?}", p),
            HostType::Boxed(p) => write!(f, "Boxed{:?}", p),
            HostType::NativeArray(c) => write!(f, "{}[]", c),
            HostType::Array { component, .. } => write!(f, "Array<{}>", component),
            HostType::MapOf { key, value, .. } => write!(f, "Map<{}, {}>", key, value),
            HostType::Class(name) => f.write_str(name),
            HostType::Synthetic(s) => f.write_str(&s.name),
            HostType::Category(c) => write!(f, "Poly{:?}", c),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A member field of a host class.
#[derive(Debug, Clone)]
pub struct HostField {
    pub name: String,
    pub ty: HostType,
    pub is_static: bool,
}

impl HostField {
    pub fn new(name: impl Into<String>, ty: HostType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_static: false,
        }
    }

    pub fn static_field(name: impl Into<String>, ty: HostType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_static: true,
        }
    }
}

/// Reflection data for a host class.
#[derive(Debug, Clone)]
pub struct HostClass {
    pub name: String,
    pub fields: Vec<HostField>,
}

impl HostClass {
    pub fn new(name: impl Into<String>, fields: Vec<HostField>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// A field of a synthetic record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub ty: HostType,
    pub nullable: bool,
}

/// A record type synthesized for an algebra row shape.
#[derive(Debug)]
pub struct SyntheticRecordType {
    pub name: String,
    pub fields: Vec<RecordField>,
    /// The algebra row type this record was synthesized from, if any.
    pub alg_type: Option<RowType>,
}

/// Shared handle to a canonical synthetic record type. Equality and hashing are
/// by identity: the registry guarantees one object per shape.
#[derive(Debug, Clone)]
pub struct SyntheticRef(Arc<SyntheticRecordType>);

impl SyntheticRef {
    pub fn ptr_eq(&self, other: &SyntheticRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for SyntheticRef {
    type Target = SyntheticRecordType;

    fn deref(&self) -> &SyntheticRecordType {
        &self.0
    }
}

impl PartialEq for SyntheticRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SyntheticRef {}

impl Hash for SyntheticRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

type SyntheticKey = Vec<(HostType, bool)>;

/// Per-session converter between host and algebra types.
#[derive(Debug, Default)]
pub struct TypeBridge {
    classes: HashMap<String, Arc<HostClass>>,
    synthetic: HashMap<SyntheticKey, SyntheticRef>,
}

impl TypeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a class's reflection data available to the bridge.
    pub fn register_class(&mut self, class: HostClass) {
        self.classes.insert(class.name.clone(), Arc::new(class));
    }

    pub fn class(&self, name: &str) -> Option<Arc<HostClass>> {
        self.classes.get(name).cloned()
    }

    /// Number of canonical synthetic record types created so far.
    pub fn synthetic_count(&self) -> usize {
        self.synthetic.len()
    }

    // ------------------------------------------------------------------
    // Host -> algebra
    // ------------------------------------------------------------------

    pub fn to_algebra_type(&self, host: &HostType) -> AlgDataType {
        let mut visiting = HashSet::new();
        self.create_type(host, &mut visiting)
    }

    /// Reflect a registered class into a static row type that remembers the class.
    /// Unknown classes yield an empty row type.
    pub fn create_struct_type_from(&self, class_name: &str) -> RowType {
        let mut visiting = HashSet::new();
        self.struct_row(class_name, &mut visiting)
    }

    fn struct_row(&self, class_name: &str, visiting: &mut HashSet<String>) -> RowType {
        let Some(class) = self.classes.get(class_name).cloned() else {
            warn!(class = class_name, "no reflection data for class; using empty struct");
            return RowType::with_origin(Vec::new(), class_name);
        };
        visiting.insert(class.name.clone());
        let mut fields = Vec::new();
        for member in class.fields.iter().filter(|f| !f.is_static) {
            let ty = self.create_type(&member.ty, visiting);
            fields.push(Field::new(member.name.clone(), fields.len(), ty));
        }
        visiting.remove(&class.name);
        RowType::with_origin(fields, class.name.clone())
    }

    fn create_type(&self, host: &HostType, visiting: &mut HashSet<String>) -> AlgDataType {
        match host {
            HostType::Primitive(p) => AlgDataType::scalar(primitive_kind(*p)),
            HostType::Boxed(p) => AlgDataType::nullable_scalar(primitive_kind(*p)),
            HostType::String => AlgDataType::nullable_scalar(PolyType::Varchar),
            HostType::Decimal => AlgDataType::nullable_scalar(PolyType::Decimal),
            HostType::ByteString => AlgDataType::nullable_scalar(PolyType::Varbinary),
            HostType::Date => AlgDataType::nullable_scalar(PolyType::Date),
            HostType::Time => AlgDataType::nullable_scalar(PolyType::Time),
            HostType::Timestamp => AlgDataType::nullable_scalar(PolyType::Timestamp),
            HostType::Object => AlgDataType::any(),
            HostType::List => AlgDataType::array(AlgDataType::any(), -1),
            HostType::Map => AlgDataType::map(AlgDataType::any(), AlgDataType::any()),
            HostType::NativeArray(component) => {
                AlgDataType::multiset(self.create_type(component, visiting))
            }
            HostType::Array {
                component,
                component_nullable,
                max_cardinality,
            } => {
                let component = self
                    .create_type(component, visiting)
                    .with_nullable(*component_nullable);
                AlgDataType::array(component, *max_cardinality)
            }
            HostType::MapOf {
                key,
                key_nullable,
                value,
                value_nullable,
            } => AlgDataType::map(
                self.create_type(key, visiting).with_nullable(*key_nullable),
                self.create_type(value, visiting)
                    .with_nullable(*value_nullable),
            ),
            HostType::Class(name) => {
                if visiting.contains(name) {
                    warn!(class = %name, "self-referential class graph; typing back edge as ANY");
                    return AlgDataType::any();
                }
                AlgDataType::record(self.struct_row(name, visiting))
            }
            HostType::Synthetic(s) => match &s.alg_type {
                Some(row) => AlgDataType::record(row.clone()),
                None => {
                    let fields = s
                        .fields
                        .iter()
                        .enumerate()
                        .map(|(i, f)| {
                            Field::new(
                                f.name.clone(),
                                i,
                                self.create_type(&f.ty, visiting).with_nullable(f.nullable),
                            )
                        })
                        .collect();
                    AlgDataType::record(RowType::new(fields))
                }
            },
            HostType::Unit => AlgDataType::record(RowType::empty()),
            HostType::Category(c) => category_type(*c),
        }
    }

    // ------------------------------------------------------------------
    // Algebra -> host
    // ------------------------------------------------------------------

    /// Host type for an algebra type, or `None` when the kind has no mapping.
    pub fn to_host_type(&mut self, ty: &AlgDataType) -> Option<HostType> {
        if let Some(row) = ty.row() {
            if row.field_count() == 1 {
                let only = row.fields()[0].ty.clone();
                return self.to_host_type(&only);
            }
            if let Some(origin) = row.origin() {
                return Some(HostType::Class(origin.to_string()));
            }
            return Some(self.synthesize_record(row));
        }
        match ty {
            AlgDataType::Map { .. } => Some(HostType::Category(ValueCategory::Map)),
            AlgDataType::Array { .. } | AlgDataType::Multiset { .. } => {
                Some(HostType::Category(ValueCategory::List))
            }
            _ => {
                let mapped = scalar_category(ty.poly_type()).map(HostType::Category);
                if mapped.is_none() {
                    debug!(ty = %ty, "no host mapping for algebra type");
                }
                mapped
            }
        }
    }

    /// Like [`TypeBridge::to_host_type`], falling back to the most general category.
    pub fn to_host_type_or_value(&mut self, ty: &AlgDataType) -> HostType {
        self.to_host_type(ty)
            .unwrap_or(HostType::Category(ValueCategory::Value))
    }

    fn synthesize_record(&mut self, row: &RowType) -> HostType {
        if row.field_count() == 0 {
            return HostType::Unit;
        }
        let mut fields = Vec::with_capacity(row.field_count());
        for field in row.fields().iter() {
            let host = self.to_host_type_or_value(&field.ty);
            let nullable = field.ty.is_nullable() && !host.is_primitive();
            fields.push(RecordField {
                name: field.name.clone(),
                ty: host,
                nullable,
            });
        }
        let name = format!("Record{}_{}", fields.len(), self.synthetic.len());
        self.register(SyntheticRecordType {
            name,
            fields,
            alg_type: Some(row.clone()),
        })
    }

    /// Positional synthetic record (`f0`, `f1`, ...) over the given host types.
    /// An empty list yields `Unit`.
    pub fn create_synthetic_type(&mut self, types: &[HostType]) -> HostType {
        if types.is_empty() {
            return HostType::Unit;
        }
        let fields = types
            .iter()
            .enumerate()
            .map(|(i, t)| RecordField {
                name: format!("f{}", i),
                ty: t.clone(),
                nullable: !t.is_primitive(),
            })
            .collect();
        let name = format!("Record{}_{}", types.len(), self.synthetic.len());
        self.register(SyntheticRecordType {
            name,
            fields,
            alg_type: None,
        })
    }

    fn register(&mut self, candidate: SyntheticRecordType) -> HostType {
        let key: SyntheticKey = candidate
            .fields
            .iter()
            .map(|f| (f.ty.clone(), f.nullable))
            .collect();
        let canonical = self
            .synthetic
            .entry(key)
            .or_insert_with(|| SyntheticRef(Arc::new(candidate)))
            .clone();
        HostType::Synthetic(canonical)
    }

    /// Strip host-specific information from a type: records lose the class they
    /// were reflected from, recursively.
    pub fn to_sql_type(&self, ty: &AlgDataType) -> AlgDataType {
        match ty {
            AlgDataType::Record { row, nullable } => {
                let fields = row
                    .fields()
                    .iter()
                    .map(|f| Field::new(f.name.clone(), f.index, self.to_sql_type(&f.ty)))
                    .collect();
                AlgDataType::Record {
                    row: RowType::new(fields),
                    nullable: *nullable,
                }
            }
            other => other.clone(),
        }
    }
}

fn primitive_kind(p: Primitive) -> PolyType {
    match p {
        Primitive::Boolean => PolyType::Boolean,
        Primitive::Byte => PolyType::TinyInt,
        Primitive::Short => PolyType::SmallInt,
        Primitive::Int => PolyType::Integer,
        Primitive::Long => PolyType::BigInt,
        Primitive::Float => PolyType::Real,
        Primitive::Double => PolyType::Double,
        Primitive::Char => PolyType::Char,
    }
}

fn category_type(c: ValueCategory) -> AlgDataType {
    let kind = match c {
        ValueCategory::Boolean => PolyType::Boolean,
        ValueCategory::Number => PolyType::Decimal,
        ValueCategory::Temporal => PolyType::Timestamp,
        ValueCategory::Interval => PolyType::IntervalDaySecond,
        ValueCategory::String => PolyType::Varchar,
        ValueCategory::Binary => PolyType::Varbinary,
        ValueCategory::Symbol => PolyType::Symbol,
        ValueCategory::Document => PolyType::Document,
        ValueCategory::Graph => PolyType::Graph,
        ValueCategory::Node => PolyType::Node,
        ValueCategory::Edge => PolyType::Edge,
        ValueCategory::Path => PolyType::Path,
        ValueCategory::Geometry => PolyType::Geometry,
        ValueCategory::Blob => PolyType::File,
        ValueCategory::Value => PolyType::Any,
        ValueCategory::List => return AlgDataType::array(AlgDataType::any(), -1),
        ValueCategory::Map => return AlgDataType::map(AlgDataType::any(), AlgDataType::any()),
    };
    AlgDataType::nullable_scalar(kind)
}

/// Fixed dispatch from scalar kind to host category.
fn scalar_category(kind: PolyType) -> Option<ValueCategory> {
    use PolyType::*;
    let category = match kind {
        Boolean => ValueCategory::Boolean,
        TinyInt | SmallInt | Integer | BigInt | Decimal | Float | Real | Double => {
            ValueCategory::Number
        }
        Date | Time | TimeWithLocalTimeZone | Timestamp | TimestampWithLocalTimeZone => {
            ValueCategory::Temporal
        }
        IntervalYearMonth | IntervalDaySecond => ValueCategory::Interval,
        Char | Varchar | Json => ValueCategory::String,
        Binary | Varbinary => ValueCategory::Binary,
        Document => ValueCategory::Document,
        Graph => ValueCategory::Graph,
        Node => ValueCategory::Node,
        Edge => ValueCategory::Edge,
        Path => ValueCategory::Path,
        Geometry => ValueCategory::Geometry,
        File | Image | Video | Audio => ValueCategory::Blob,
        Symbol => ValueCategory::Symbol,
        Any => ValueCategory::Value,
        Array | Multiset => ValueCategory::List,
        Map => ValueCategory::Map,
        Null | Cursor | ColumnList | Row => return None,
    };
    Some(category)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_field_row(second_nullable: bool) -> AlgDataType {
        AlgDataType::record(
            RowType::builder()
                .add("id", AlgDataType::scalar(PolyType::Integer))
                .add(
                    "name",
                    AlgDataType::scalar(PolyType::Varchar).with_nullable(second_nullable),
                )
                .build(),
        )
    }

    #[test]
    fn test_primitive_and_boxed_nullability() {
        let bridge = TypeBridge::new();
        let int = bridge.to_algebra_type(&HostType::Primitive(Primitive::Int));
        let boxed = bridge.to_algebra_type(&HostType::Boxed(Primitive::Int));
        assert_eq!(int.poly_type(), PolyType::Integer);
        assert!(!int.is_nullable());
        assert!(boxed.is_nullable());
    }

    #[test]
    fn test_array_component_nullability_is_independent() {
        let bridge = TypeBridge::new();
        let ty = bridge.to_algebra_type(&HostType::Array {
            component: Box::new(HostType::Primitive(Primitive::Long)),
            component_nullable: true,
            max_cardinality: 8,
        });
        let AlgDataType::Array {
            component,
            max_cardinality,
            nullable,
        } = ty
        else {
            panic!("expected array");
        };
        assert!(component.is_nullable());
        assert!(!nullable);
        assert_eq!(max_cardinality, 8);
    }

    #[test]
    fn test_map_key_and_value_nullability() {
        let bridge = TypeBridge::new();
        let ty = bridge.to_algebra_type(&HostType::MapOf {
            key: Box::new(HostType::String),
            key_nullable: false,
            value: Box::new(HostType::Primitive(Primitive::Double)),
            value_nullable: true,
        });
        let AlgDataType::Map { key, value, .. } = ty else {
            panic!("expected map");
        };
        assert!(!key.is_nullable());
        assert!(value.is_nullable());
    }

    #[test]
    fn test_identical_shapes_share_one_synthetic_type() {
        let mut bridge = TypeBridge::new();
        let a = bridge.to_host_type(&two_field_row(true)).unwrap();
        let b = bridge.to_host_type(&two_field_row(true)).unwrap();
        let (HostType::Synthetic(a), HostType::Synthetic(b)) = (&a, &b) else {
            panic!("expected synthetic records");
        };
        assert!(a.ptr_eq(b));
        assert_eq!(bridge.synthetic_count(), 1);
    }

    #[test]
    fn test_nullability_difference_yields_distinct_type() {
        let mut bridge = TypeBridge::new();
        let a = bridge.to_host_type(&two_field_row(true)).unwrap();
        let b = bridge.to_host_type(&two_field_row(false)).unwrap();
        assert_ne!(a, b);
        assert_eq!(bridge.synthetic_count(), 2);
    }

    #[test]
    fn test_zero_field_record_is_unit() {
        let mut bridge = TypeBridge::new();
        let unit = bridge.to_host_type(&AlgDataType::record(RowType::empty()));
        assert_eq!(unit, Some(HostType::Unit));
        assert_eq!(bridge.create_synthetic_type(&[]), HostType::Unit);
    }

    #[test]
    fn test_single_field_record_unwraps_but_path_does_not() {
        let mut bridge = TypeBridge::new();
        let single = AlgDataType::record(
            RowType::builder()
                .add("id", AlgDataType::scalar(PolyType::Integer))
                .build(),
        );
        assert_eq!(
            bridge.to_host_type(&single),
            Some(HostType::Category(ValueCategory::Number))
        );
        assert_eq!(
            bridge.to_host_type(&AlgDataType::scalar(PolyType::Path)),
            Some(HostType::Category(ValueCategory::Path))
        );
        assert_eq!(bridge.synthetic_count(), 0);
    }

    #[test]
    fn test_scalar_dispatch_is_lossy() {
        let mut bridge = TypeBridge::new();
        for kind in [PolyType::TinyInt, PolyType::BigInt, PolyType::Double] {
            assert_eq!(
                bridge.to_host_type(&AlgDataType::scalar(kind)),
                Some(HostType::Category(ValueCategory::Number))
            );
        }
        assert_eq!(
            bridge.to_host_type(&AlgDataType::scalar(PolyType::Date)),
            bridge.to_host_type(&AlgDataType::scalar(PolyType::Timestamp)),
        );
    }

    #[test]
    fn test_unmapped_kind_returns_none_and_falls_back() {
        let mut bridge = TypeBridge::new();
        let cursor = AlgDataType::scalar(PolyType::Cursor);
        assert_eq!(bridge.to_host_type(&cursor), None);
        assert_eq!(
            bridge.to_host_type_or_value(&cursor),
            HostType::Category(ValueCategory::Value)
        );
    }

    #[test]
    fn test_self_referential_class_is_guarded() {
        let mut bridge = TypeBridge::new();
        bridge.register_class(HostClass::new(
            "TreeNode",
            vec![
                HostField::new("value", HostType::Primitive(Primitive::Int)),
                HostField::new("parent", HostType::Class("TreeNode".into())),
                HostField::static_field("ROOT", HostType::Class("TreeNode".into())),
            ],
        ));
        let row = bridge.create_struct_type_from("TreeNode");
        assert_eq!(row.field_names(), vec!["value", "parent"]);
        assert_eq!(row.field(1).unwrap().ty, AlgDataType::any());
        assert_eq!(row.origin(), Some("TreeNode"));
    }

    #[test]
    fn test_reflected_struct_echoes_its_class() {
        let mut bridge = TypeBridge::new();
        bridge.register_class(HostClass::new(
            "Employee",
            vec![
                HostField::new("id", HostType::Primitive(Primitive::Long)),
                HostField::new("name", HostType::String),
            ],
        ));
        let ty = bridge.to_algebra_type(&HostType::Class("Employee".into()));
        assert_eq!(
            bridge.to_host_type(&ty),
            Some(HostType::Class("Employee".into()))
        );
        let sql = bridge.to_sql_type(&ty);
        assert_eq!(sql.row().unwrap().origin(), None);
    }

    #[test]
    fn test_positional_synthetic_nullability_follows_primitiveness() {
        let mut bridge = TypeBridge::new();
        let HostType::Synthetic(record) = bridge.create_synthetic_type(&[
            HostType::Primitive(Primitive::Int),
            HostType::String,
        ]) else {
            panic!("expected synthetic record");
        };
        assert_eq!(record.fields[0].name, "f0");
        assert!(!record.fields[0].nullable);
        assert!(record.fields[1].nullable);
    }
}
