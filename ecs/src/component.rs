//! The [`Component`] marker trait.

/// Trait for data stored in the [`Registry`](crate::Registry).
///
/// Components can be any `Send + Sync + 'static` type. `NAME` is used in
/// diagnostics and error messages without requiring an instance.
///
/// ```
/// use umbra_ecs::Component;
///
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     const NAME: &'static str = "Health";
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// The struct name as a static string (e.g. `"Transform"`).
    const NAME: &'static str;

    /// Returns the struct name.
    fn component_name(&self) -> &'static str {
        Self::NAME
    }
}
