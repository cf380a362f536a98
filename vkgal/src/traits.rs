/// Describes GPU objects which must be handed back to the device they came from
pub trait Destructible {
    /// Destroy the resource
    fn destroy(&mut self);
}
