//! Event serialization, with an optional buffer-reusing fast path.

use crate::config::SerializerType;
use crate::event::Event;
use crate::performance::buffer_pool::BufferPool;

/// Produces wire bytes for an [`Event`].
///
/// Both implementations must produce byte-identical output for the same
/// input; `Optimized` differs only in where its scratch buffer comes from.
pub trait Serializer: Send + Sync {
    fn serialize<E: Event>(&self, event: &E) -> crate::Result<Vec<u8>>;
}

pub struct StandardSerializer;

impl Serializer for StandardSerializer {
    fn serialize<E: Event>(&self, event: &E) -> crate::Result<Vec<u8>> {
        event.to_json()
    }
}

pub struct OptimizedSerializer<'a> {
    buffers: &'a BufferPool,
}

impl<'a> OptimizedSerializer<'a> {
    #[must_use]
    pub const fn new(buffers: &'a BufferPool) -> Self {
        Self { buffers }
    }
}

impl Serializer for OptimizedSerializer<'_> {
    fn serialize<E: Event>(&self, event: &E) -> crate::Result<Vec<u8>> {
        let mut buf = self.buffers.get();
        let encoded = event.to_json()?;
        buf.extend_from_slice(&encoded);
        let result = buf.clone();
        self.buffers.put(buf);
        Ok(result)
    }
}

/// Hands out the serializer implementation selected by [`SerializerType`].
pub struct SerializerFactory {
    kind: SerializerType,
    buffers: BufferPool,
}

impl SerializerFactory {
    #[must_use]
    pub fn new(kind: SerializerType, buffer_pool_capacity: usize, buffer_size_hint: usize) -> Self {
        Self {
            kind,
            buffers: BufferPool::new(buffer_pool_capacity, buffer_size_hint),
        }
    }

    pub fn serialize<E: Event>(&self, event: &E) -> crate::Result<Vec<u8>> {
        match self.kind {
            SerializerType::Standard => StandardSerializer.serialize(event),
            SerializerType::Optimized => OptimizedSerializer::new(&self.buffers).serialize(event),
        }
    }

    #[must_use]
    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffers
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Tick {
        n: u32,
    }

    impl Event for Tick {
        fn event_type(&self) -> &str {
            "tick"
        }
    }

    #[test]
    fn standard_and_optimized_produce_identical_bytes() {
        let factory_std = SerializerFactory::new(SerializerType::Standard, 4, 64);
        let factory_opt = SerializerFactory::new(SerializerType::Optimized, 4, 64);
        let event = Tick { n: 5 };
        assert_eq!(
            factory_std.serialize(&event).unwrap(),
            factory_opt.serialize(&event).unwrap()
        );
    }
}
