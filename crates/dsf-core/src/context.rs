use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::SessionId;

/// Identity fields of a single context node.
///
/// Implemented for every `Eq + Hash + Debug` type, so services declare their
/// node kinds as plain structs (`ThreadContext { id: 3 }`) and get structural
/// equality for free.
pub trait ContextData: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn ContextData) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> ContextData for T
where
    T: Any + Send + Sync + fmt::Debug + Eq + Hash,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ContextData) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

struct ContextInner {
    session_id: SessionId,
    parents: Vec<DmContext>,
    data: Box<dyn ContextData>,
}

/// Immutable, hierarchical identity of a debug entity.
///
/// A context is a node (its typed identity fields) plus the contexts it was
/// derived from. Cloning is cheap. Two contexts are equal when their session,
/// parents and identity fields are equal, so logically identical contexts
/// built at different times compare (and hash) the same.
#[derive(Clone)]
pub struct DmContext {
    inner: Arc<ContextInner>,
}

impl DmContext {
    pub fn new<D>(session_id: SessionId, parents: Vec<DmContext>, data: D) -> Self
    where
        D: ContextData,
    {
        Self {
            inner: Arc::new(ContextInner {
                session_id,
                parents,
                data: Box::new(data),
            }),
        }
    }

    /// Convenience for the common single-parent case.
    pub fn child<D: ContextData>(&self, data: D) -> Self {
        Self::new(self.inner.session_id, vec![self.clone()], data)
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn parents(&self) -> &[DmContext] {
        &self.inner.parents
    }

    pub fn is<D: Any>(&self) -> bool {
        self.data::<D>().is_some()
    }

    /// The identity fields of this node, if they are of type `D`.
    pub fn data<D: Any>(&self) -> Option<&D> {
        (*self.inner.data).as_any().downcast_ref::<D>()
    }

    /// Searches this context and then its parents (depth first, in parent
    /// order) for the first node of type `D`.
    pub fn ancestor_of_type<D: Any>(&self) -> Option<&DmContext> {
        if self.is::<D>() {
            return Some(self);
        }
        self.inner
            .parents
            .iter()
            .find_map(|parent| parent.ancestor_of_type::<D>())
    }

    /// Identity fields of the nearest node of type `D`.
    pub fn ancestor_data<D: Any>(&self) -> Option<&D> {
        self.ancestor_of_type::<D>()?.data::<D>()
    }

    /// Returns `true` when `self` equals `other` or is one of its ancestors.
    pub fn is_ancestor_of(&self, other: &DmContext) -> bool {
        if self == other {
            return true;
        }
        other
            .inner
            .parents
            .iter()
            .any(|parent| self.is_ancestor_of(parent))
    }
}

impl PartialEq for DmContext {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        self.inner.session_id == other.inner.session_id
            && self.inner.parents == other.inner.parents
            && self.inner.data.dyn_eq(&*other.inner.data)
    }
}

impl Eq for DmContext {}

impl Hash for DmContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.session_id.hash(state);
        self.inner.parents.hash(state);
        self.inner.data.dyn_hash(state);
    }
}

impl fmt::Debug for DmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmContext")
            .field("session", &self.inner.session_id)
            .field("data", &self.inner.data)
            .field("parents", &self.inner.parents)
            .finish()
    }
}

impl fmt::Display for DmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.parents.as_slice() {
            [] => write!(f, "{}", self.inner.session_id)?,
            [single] => write!(f, "{single}")?,
            many => {
                f.write_str("(")?;
                for (idx, parent) in many.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{parent}")?;
                }
                f.write_str(")")?;
            }
        }
        write!(f, ".{:?}", self.inner.data)
    }
}
