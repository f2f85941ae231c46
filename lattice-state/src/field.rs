//! Reactive struct fields.
//!
//! A [`Field`] is a plain reactive field and a [`Computed`] a derived one.
//! Neither touches the signal engine until first access: the backing
//! [`Signal`]/[`Memo`] is created then, once per field instance, and every
//! later access forwards straight to it.
//!
//! Clones share the same backing cell, so a computed field can capture
//! clones of its sibling fields:
//!
//! ```rust,ignore
//! struct Counter {
//!     count: Field<i32>,
//!     doubled: Computed<i32>,
//! }
//!
//! impl Counter {
//!     fn new() -> Self {
//!         let count = Field::new(1);
//!         let doubled = Computed::new({
//!             let count = count.clone();
//!             move || count.get() * 2
//!         });
//!         Self { count, doubled }
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::reactive::{Memo, Signal};

type Initializer<T> = Box<dyn FnOnce() -> T + Send>;
type Getter<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Whether a field stores a value or derives one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Plain,
    Derived,
}

/// Type-erased access to a reactive field, used for by-name access.
pub trait ReactiveField: Send + Sync {
    fn kind(&self) -> FieldKind;

    /// Whether the backing signal or memo exists yet.
    fn is_materialized(&self) -> bool;

    /// Name of the value type, for error messages.
    fn value_type(&self) -> &'static str;

    /// Read the current value (tracked).
    fn read_any(&self) -> Box<dyn Any>;

    /// Write a value. Gives the value back if it has the wrong type or the
    /// field cannot be written.
    fn write_any(&self, value: Box<dyn Any>) -> Result<(), Box<dyn Any>>;
}

// ----------------------------------------------------------------------------
// Plain fields
// ----------------------------------------------------------------------------

/// A lazily created reactive cell.
pub struct Field<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<FieldInner<T>>,
}

struct FieldInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    cell: OnceLock<Signal<T>>,
    init: Mutex<Option<Initializer<T>>>,
}

impl<T> Field<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// A field whose initial value is `value`.
    pub fn new(value: T) -> Self {
        Self::with(move || value)
    }

    /// A field whose initial value is produced by `init` on first access.
    pub fn with(init: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            inner: Arc::new(FieldInner {
                cell: OnceLock::new(),
                init: Mutex::new(Some(Box::new(init))),
            }),
        }
    }

    /// The backing signal, created on first call.
    ///
    /// # Panics
    ///
    /// If the initializer panicked on an earlier access, every later access
    /// panics too.
    pub fn signal(&self) -> &Signal<T> {
        self.inner.cell.get_or_init(|| {
            // The initializer is only ever taken here, inside the once-cell.
            let init = self.inner.init.lock().take();
            match init {
                Some(init) => Signal::new(init()),
                None => initializer_panicked(),
            }
        })
    }

    pub fn get(&self) -> T {
        self.signal().get()
    }

    pub fn get_untracked(&self) -> T {
        self.signal().get_untracked()
    }

    /// Set the value. A first access by write still runs the initializer
    /// exactly once before the write is applied.
    pub fn set(&self, value: T) {
        self.signal().set(value);
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.signal().update(f);
    }

    pub fn is_materialized(&self) -> bool {
        self.inner.cell.get().is_some()
    }
}

// The once-cell stays empty when its initializer unwinds, but the
// initializer itself has already been consumed.
#[cold]
fn initializer_panicked<T>() -> T {
    panic!("field initializer panicked on an earlier access")
}

impl<T> Default for Field<T>
where
    T: Clone + PartialEq + Send + Sync + Default + 'static,
{
    fn default() -> Self {
        Self::with(T::default)
    }
}

impl<T> Clone for Field<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Field<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.cell.get() {
            Some(signal) => f.debug_tuple("Field").field(&signal.get_untracked()).finish(),
            None => f.write_str("Field(<uninitialized>)"),
        }
    }
}

impl<T> ReactiveField for Field<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn kind(&self) -> FieldKind {
        FieldKind::Plain
    }

    fn is_materialized(&self) -> bool {
        Field::is_materialized(self)
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn read_any(&self) -> Box<dyn Any> {
        Box::new(self.get())
    }

    fn write_any(&self, value: Box<dyn Any>) -> Result<(), Box<dyn Any>> {
        let value = value.downcast::<T>()?;
        self.set(*value);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Computed fields
// ----------------------------------------------------------------------------

/// A lazily created derived value. Read-only.
pub struct Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    memo: OnceLock<Memo<T>>,
    getter: Mutex<Option<Getter<T>>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(getter: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ComputedInner {
                memo: OnceLock::new(),
                getter: Mutex::new(Some(Box::new(getter))),
            }),
        }
    }

    /// The backing memo, created on first call.
    pub fn memo(&self) -> &Memo<T> {
        self.inner.memo.get_or_init(|| {
            let getter = self.inner.getter.lock().take();
            match getter {
                Some(getter) => Memo::new(getter),
                None => unreachable!("computed getter consumed outside of its once-cell"),
            }
        })
    }

    pub fn get(&self) -> T {
        self.memo().get()
    }

    pub fn get_untracked(&self) -> T {
        self.memo().get_untracked()
    }

    pub fn is_materialized(&self) -> bool {
        self.inner.memo.get().is_some()
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

impl<T> ReactiveField for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn kind(&self) -> FieldKind {
        FieldKind::Derived
    }

    fn is_materialized(&self) -> bool {
        Computed::is_materialized(self)
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn read_any(&self) -> Box<dyn Any> {
        Box::new(self.get())
    }

    fn write_any(&self, value: Box<dyn Any>) -> Result<(), Box<dyn Any>> {
        Err(value)
    }
}
