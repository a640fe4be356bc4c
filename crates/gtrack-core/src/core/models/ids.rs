use slotmap::new_key_type;

new_key_type! {
    /// Arena-stable handle of a particle stored in a `ParticlePool`.
    pub struct ParticleId;
}
