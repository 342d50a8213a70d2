//! Entity trait: records with a stable identity across status transitions.

/// Entity marker + minimal interface.
///
/// Invoices and customers are entities: an update replaces every field but the
/// identifier, so two records with the same id describe the same entity.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}
