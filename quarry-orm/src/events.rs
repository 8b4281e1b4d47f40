//! Model lifecycle events and observers.
//!
//! Listeners and observers are registered per model name on the
//! [`Registry`](crate::Registry). Events ending in `-ing` run before the
//! operation and halt it when any listener returns `false`; the others run
//! afterwards and their return value is ignored.

use std::fmt;
use std::sync::Arc;

use crate::model::Model;

/// A model lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    /// A model was hydrated from a query result.
    Retrieved,
    /// Before the first insert.
    Creating,
    /// After the first insert.
    Created,
    /// Before an update of an existing model.
    Updating,
    /// After an update of an existing model.
    Updated,
    /// Before any save.
    Saving,
    /// After any save.
    Saved,
    /// Before a delete (soft or hard).
    Deleting,
    /// After a delete (soft or hard).
    Deleted,
    /// Before a soft-deleted model is restored.
    Restoring,
    /// After a soft-deleted model was restored.
    Restored,
}

impl ModelEvent {
    /// Every event, in lifecycle order.
    pub const ALL: [ModelEvent; 11] = [
        Self::Retrieved,
        Self::Creating,
        Self::Created,
        Self::Updating,
        Self::Updated,
        Self::Saving,
        Self::Saved,
        Self::Deleting,
        Self::Deleted,
        Self::Restoring,
        Self::Restored,
    ];

    /// Event name, e.g. `"creating"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieved => "retrieved",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Restoring => "restoring",
            Self::Restored => "restored",
        }
    }

    /// Whether a `false` from a listener stops the operation.
    pub fn halts(&self) -> bool {
        matches!(
            self,
            Self::Creating | Self::Updating | Self::Saving | Self::Deleting | Self::Restoring
        )
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A closure listening for one event of one model.
pub type Listener = Arc<dyn Fn(&mut Model) -> bool + Send + Sync>;

/// Handles every lifecycle event of a model.
///
/// Implement only the hooks you need; the defaults let the operation
/// continue.
///
/// ```rust
/// use quarry_orm::{Model, Observer};
///
/// struct Slugger;
///
/// impl Observer for Slugger {
///     fn saving(&self, model: &mut Model) -> bool {
///         if let Ok(title) = model.get("title") {
///             let slug = title.to_string().to_lowercase().replace(' ', "-");
///             let _ = model.set("slug", slug);
///         }
///         true
///     }
/// }
/// ```
#[allow(unused_variables)]
pub trait Observer: Send + Sync {
    /// See [`ModelEvent::Retrieved`].
    fn retrieved(&self, model: &mut Model) {}
    /// See [`ModelEvent::Creating`].
    fn creating(&self, model: &mut Model) -> bool {
        true
    }
    /// See [`ModelEvent::Created`].
    fn created(&self, model: &mut Model) {}
    /// See [`ModelEvent::Updating`].
    fn updating(&self, model: &mut Model) -> bool {
        true
    }
    /// See [`ModelEvent::Updated`].
    fn updated(&self, model: &mut Model) {}
    /// See [`ModelEvent::Saving`].
    fn saving(&self, model: &mut Model) -> bool {
        true
    }
    /// See [`ModelEvent::Saved`].
    fn saved(&self, model: &mut Model) {}
    /// See [`ModelEvent::Deleting`].
    fn deleting(&self, model: &mut Model) -> bool {
        true
    }
    /// See [`ModelEvent::Deleted`].
    fn deleted(&self, model: &mut Model) {}
    /// See [`ModelEvent::Restoring`].
    fn restoring(&self, model: &mut Model) -> bool {
        true
    }
    /// See [`ModelEvent::Restored`].
    fn restored(&self, model: &mut Model) {}

    /// Dispatch `event` to the matching hook.
    fn handle(&self, event: ModelEvent, model: &mut Model) -> bool {
        match event {
            ModelEvent::Retrieved => self.retrieved(model),
            ModelEvent::Creating => return self.creating(model),
            ModelEvent::Created => self.created(model),
            ModelEvent::Updating => return self.updating(model),
            ModelEvent::Updated => self.updated(model),
            ModelEvent::Saving => return self.saving(model),
            ModelEvent::Saved => self.saved(model),
            ModelEvent::Deleting => return self.deleting(model),
            ModelEvent::Deleted => self.deleted(model),
            ModelEvent::Restoring => return self.restoring(model),
            ModelEvent::Restored => self.restored(model),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halting_events() {
        let halting: Vec<&str> = ModelEvent::ALL
            .iter()
            .filter(|e| e.halts())
            .map(|e| e.as_str())
            .collect();
        assert_eq!(halting, vec!["creating", "updating", "saving", "deleting", "restoring"]);
    }
}
