use crate::nulls::NullPolicy;

/// Registry-wide codec settings. Fixed when the [`Registry`](crate::Registry) is created;
/// every schema generated by that registry uses them on both the encode and decode side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// How nullable scalar and nested-object fields record presence.
    pub null_policy: NullPolicy,
    /// Write map string keys/values behind a patched 4-byte length slot instead of a varint.
    pub map_backpatch: bool,
    /// Initial capacity of the buffer allocated by `serialize`.
    pub initial_capacity: usize,
    /// Maximum nesting of records and containers on encode and decode. Each level costs
    /// several stack frames, so keep it well below what the calling thread's stack can hold.
    pub max_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            null_policy: NullPolicy::Bitmap,
            map_backpatch: true,
            initial_capacity: 64,
            max_depth: 128,
        }
    }
}

impl CodecConfig {
    pub fn with_null_policy(mut self, policy: NullPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    pub fn with_map_backpatch(mut self, enabled: bool) -> Self {
        self.map_backpatch = enabled;
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
