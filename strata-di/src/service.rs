//! Service instances and type-erased downcasting

use downcast_rs::{impl_downcast, DowncastSync};
use std::any::Any;
use std::sync::Arc;

use crate::error::{DiError, DiResult};

/// Trait that all service instances implement
pub trait Service: DowncastSync {
    /// Get the type name of the service
    fn service_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl_downcast!(sync Service);

/// Blanket implementation for all suitable types
impl<T: Any + Send + Sync> Service for T {}

/// A live, shared service instance
pub type Instance = Arc<dyn Service>;

/// An instance still owned by its creator (construction and injection phase)
pub type Partial = Box<dyn Service>;

/// Downcast a shared instance to its concrete type
pub fn downcast_instance<T: Service>(instance: Instance) -> DiResult<Arc<T>> {
    let actual = (*instance).service_type_name();
    instance.downcast_arc::<T>().map_err(|_| DiError::TypeMismatch {
        expected: std::any::type_name::<T>().to_string(),
        actual: actual.to_string(),
    })
}

/// Borrow a type-erased value as `T` inside member closures
pub(crate) fn expect_mut<T: 'static>(target: &mut dyn Any) -> anyhow::Result<&mut T> {
    target
        .downcast_mut::<T>()
        .ok_or_else(|| anyhow::anyhow!("instance is not a {}", std::any::type_name::<T>()))
}

/// Shared-reference variant of [`expect_mut`]
pub(crate) fn expect_ref<T: 'static>(target: &dyn Any) -> anyhow::Result<&T> {
    target
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow::anyhow!("instance is not a {}", std::any::type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    #[test]
    fn test_downcast_instance() {
        let instance: Instance = Arc::new(Widget(7));
        let widget = downcast_instance::<Widget>(instance).unwrap();
        assert_eq!(widget.0, 7);
    }

    #[test]
    fn test_downcast_mismatch_names_both_types() {
        let instance: Instance = Arc::new(Widget(7));
        let err = downcast_instance::<String>(instance).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("String"));
        assert!(text.contains("Widget"));
    }
}
