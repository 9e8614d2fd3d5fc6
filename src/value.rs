//! Immutable, type-erased plug values.

use std::any::Any;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::sync::Arc;

use crate::hash::{StructuralHash, StructuralHasher};

/// Object-safe equality comparison.
///
/// This trait enables comparing two trait objects for equality
/// by downcasting and comparing the concrete types.
pub trait DynEq: Any {
    /// Compare self with another value for equality.
    ///
    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + 'static> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// Size accounting used as the cache cost of a value.
///
/// Implementations report the total number of bytes owned by the value,
/// including heap allocations.
pub trait MemoryUsage {
    /// Bytes owned by this value.
    fn memory_usage(&self) -> usize;
}

macro_rules! impl_memory_usage_for_pod {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MemoryUsage for $ty {
                #[inline]
                fn memory_usage(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

impl_memory_usage_for_pod!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize,
    &'static str,
);

impl MemoryUsage for String {
    fn memory_usage(&self) -> usize {
        std::mem::size_of::<String>() + self.capacity()
    }
}

impl<T: MemoryUsage> MemoryUsage for Vec<T> {
    fn memory_usage(&self) -> usize {
        let spare = (self.capacity() - self.len()) * std::mem::size_of::<T>();
        std::mem::size_of::<Vec<T>>() + spare + self.iter().map(T::memory_usage).sum::<usize>()
    }
}

impl<T: MemoryUsage> MemoryUsage for Box<T> {
    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Box<T>>() + (**self).memory_usage()
    }
}

impl<T: MemoryUsage> MemoryUsage for Option<T> {
    fn memory_usage(&self) -> usize {
        match self {
            Some(inner) => {
                std::mem::size_of::<Option<T>>() - std::mem::size_of::<T>() + inner.memory_usage()
            }
            None => std::mem::size_of::<Option<T>>(),
        }
    }
}

impl<A: MemoryUsage, B: MemoryUsage> MemoryUsage for (A, B) {
    fn memory_usage(&self) -> usize {
        self.0.memory_usage() + self.1.memory_usage()
    }
}

impl<A: MemoryUsage, B: MemoryUsage, C: MemoryUsage> MemoryUsage for (A, B, C) {
    fn memory_usage(&self) -> usize {
        self.0.memory_usage() + self.1.memory_usage() + self.2.memory_usage()
    }
}

/// Trait for types that can be stored on a plug.
///
/// It is automatically implemented for all types that implement
/// `Hash + Eq + Debug + MemoryUsage + Send + Sync + 'static`. Types with
/// floating point data can implement it by hand, hashing the bit patterns.
///
/// # Object Safety
///
/// This trait is object-safe; [`Value`] wraps an `Arc<dyn PlugValue>`.
pub trait PlugValue: DynEq + Debug + Send + Sync {
    /// Get the value as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared value into a shared `Any`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Get the type name of this value.
    fn type_name(&self) -> &'static str;

    /// Append the content of this value to `hasher`.
    fn hash_into(&self, hasher: &mut StructuralHasher);

    /// Bytes owned by this value, used as its cache cost.
    fn memory_usage(&self) -> usize;
}

impl<T> PlugValue for T
where
    T: Hash + Eq + Debug + MemoryUsage + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn hash_into(&self, hasher: &mut StructuralHasher) {
        hasher.append(std::any::type_name::<T>());
        hasher.append(self);
    }

    fn memory_usage(&self) -> usize {
        MemoryUsage::memory_usage(self)
    }
}

/// An immutable, reference-counted plug value.
///
/// Cloning is cheap. Values are shared between plugs, computation frames and
/// the [`ValueCache`](crate::ValueCache).
#[derive(Clone)]
pub struct Value(Arc<dyn PlugValue>);

impl Value {
    /// Wrap a concrete value.
    pub fn new<T: PlugValue + 'static>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an already shared value.
    pub fn from_arc(value: Arc<dyn PlugValue>) -> Self {
        Self(value)
    }

    /// Downcast to a concrete type.
    pub fn downcast<T: PlugValue + 'static>(&self) -> Option<Arc<T>> {
        self.0.clone().into_any().downcast::<T>().ok()
    }

    /// Borrow as a concrete type.
    pub fn downcast_ref<T: PlugValue + 'static>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        (*self.0).type_name()
    }

    /// Structural hash of the wrapped value.
    pub fn hash(&self) -> StructuralHash {
        let mut hasher = StructuralHasher::new();
        (*self.0).hash_into(&mut hasher);
        hasher.finish_structural()
    }

    /// Bytes owned by the wrapped value.
    pub fn memory_usage(&self) -> usize {
        (*self.0).memory_usage()
    }

    /// Returns true if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (*self.0).dyn_eq((*other.0).as_any())
    }
}

impl Eq for Value {}

impl Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dyn_equality() {
        assert_eq!(Value::new(5i32), Value::new(5i32));
        assert_ne!(Value::new(5i32), Value::new(6i32));
        // Same payload, different types.
        assert_ne!(Value::new(5i32), Value::new(5i64));
    }

    #[test]
    fn test_hash_distinguishes_types() {
        assert_eq!(Value::new(5i32).hash(), Value::new(5i32).hash());
        assert_ne!(Value::new(5i32).hash(), Value::new(5i64).hash());
    }

    #[test]
    fn test_downcast() {
        let value = Value::new(String::from("grid"));
        assert_eq!(value.downcast::<String>().as_deref(), Some(&String::from("grid")));
        assert!(value.downcast::<i32>().is_none());
        assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("grid"));
        assert!(value.type_name().ends_with("String"));
    }

    #[test]
    fn test_memory_usage() {
        assert_eq!(Value::new(1u64).memory_usage(), 8);

        let mut voxels: Vec<u32> = Vec::with_capacity(16);
        voxels.extend([1, 2, 3, 4]);
        let expected = std::mem::size_of::<Vec<u32>>() + 16 * 4;
        assert_eq!(MemoryUsage::memory_usage(&voxels), expected);

        let name = String::with_capacity(32);
        assert_eq!(
            MemoryUsage::memory_usage(&name),
            std::mem::size_of::<String>() + 32
        );
    }
}
