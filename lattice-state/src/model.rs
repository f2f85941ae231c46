//! By-name access to reactive fields.
//!
//! A type implementing [`Model`] lists its reactive fields. The first time a
//! model type is accessed by name, its field kinds are recorded in a
//! process-wide descriptor registry keyed by `(TypeId, field name)`, so two
//! types that happen to share a field name never share a descriptor.

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::error::{Error, ReadOnlyFieldError, Result};
use crate::field::{FieldKind, ReactiveField};

/// A value whose reactive fields can be read and written by name.
///
/// ```rust,ignore
/// impl Model for Counter {
///     fn fields(&self) -> Vec<(&'static str, &dyn ReactiveField)> {
///         vec![("count", &self.count), ("doubled", &self.doubled)]
///     }
/// }
/// ```
pub trait Model: Send + Sync + 'static {
    fn fields(&self) -> Vec<(&'static str, &dyn ReactiveField)>;
}

/// The registered shape of one field of a model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

type Descriptors = Arc<IndexMap<&'static str, FieldKind>>;

static REGISTRY: OnceLock<DashMap<TypeId, Descriptors>> = OnceLock::new();

fn registry() -> &'static DashMap<TypeId, Descriptors> {
    REGISTRY.get_or_init(DashMap::new)
}

fn describe<M: Model>(model: &M) -> Descriptors {
    if let Some(known) = registry().get(&TypeId::of::<M>()) {
        return known.clone();
    }

    // `fields()` is user code; no shard lock may be held while it runs.
    let fields: IndexMap<_, _> = model
        .fields()
        .into_iter()
        .map(|(name, field)| (name, field.kind()))
        .collect();

    registry()
        .entry(TypeId::of::<M>())
        .or_insert_with(|| {
            tracing::trace!(model = type_name::<M>(), fields = fields.len(), "registered model fields");
            Arc::new(fields)
        })
        .clone()
}

/// The registered fields of `M`, in declaration order.
pub fn descriptors<M: Model>(model: &M) -> Vec<FieldDescriptor> {
    describe(model)
        .iter()
        .map(|(&name, &kind)| FieldDescriptor { name, kind })
        .collect()
}

fn resolve<M: Model>(model: &M, name: &str) -> Result<(&'static str, FieldKind)> {
    describe(model)
        .get_key_value(name)
        .map(|(&name, &kind)| (name, kind))
        .ok_or_else(|| Error::UnknownField {
            type_name: type_name::<M>(),
            field: name.to_string(),
        })
}

fn with_field<M: Model, R>(
    model: &M,
    name: &'static str,
    f: impl FnOnce(&dyn ReactiveField) -> Result<R>,
) -> Result<R> {
    let fields = model.fields();
    let (_, field) = fields
        .into_iter()
        .find(|(field_name, _)| *field_name == name)
        .ok_or_else(|| Error::UnknownField {
            type_name: type_name::<M>(),
            field: name.to_string(),
        })?;
    f(field)
}

/// Read field `name` of `model` (tracked).
pub fn read<M: Model, V: 'static>(model: &M, name: &str) -> Result<V> {
    let (name, _) = resolve(model, name)?;
    with_field(model, name, |field| {
        let value: Box<dyn Any> = field.read_any();
        value
            .downcast::<V>()
            .map(|value| *value)
            .map_err(|_| Error::FieldType {
                type_name: type_name::<M>(),
                field: name,
                expected: type_name::<V>(),
            })
    })
}

/// Write `value` to field `name` of `model`.
///
/// Fails with [`ReadOnlyFieldError`] for computed fields.
pub fn write<M: Model, V: Send + 'static>(model: &M, name: &str, value: V) -> Result<()> {
    let (name, kind) = resolve(model, name)?;
    if kind == FieldKind::Derived {
        return Err(ReadOnlyFieldError {
            type_name: type_name::<M>(),
            field: name,
        }
        .into());
    }
    with_field(model, name, |field| {
        field
            .write_any(Box::new(value))
            .map_err(|_| Error::FieldType {
                type_name: type_name::<M>(),
                field: name,
                expected: field.value_type(),
            })
    })
}
